// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Application handoff: jump table read, interrupt quiesce, vector
//! relocation and the final jump.

use torque_common::jump_table::{JumpTable, JumpTableError, JUMP_TABLE_WORDS};
use torque_common::protocol::JUMP_TABLE_START;

/// Read and validate the jump table from its flash page.
pub fn read_jump_table() -> Result<JumpTable, JumpTableError> {
    let mut words = [0u32; JUMP_TABLE_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        let addr = JUMP_TABLE_START + (i as u32) * 4;
        *word = unsafe { (addr as *const u32).read_volatile() };
    }
    JumpTable::from_words(&words)
}

/// Hand control to the application described by a validated jump table.
///
/// # Safety
/// `table` must come from a successfully validated jump table; the entry
/// point and vector table are trusted from here on.
pub unsafe fn jump_to_application(table: &JumpTable) -> ! {
    cortex_m::interrupt::disable();

    // Clear pending and disable all NVIC interrupts so the application
    // starts from a quiet controller.
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
    NVIC_ICER.offset(1).write_volatile(0xFFFF_FFFF);
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);
    NVIC_ICPR.offset(1).write_volatile(0xFFFF_FFFF);

    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(table.interrupt_vector);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();

    // Word 0 of the vector table is the application's initial stack pointer.
    let initial_sp = (table.interrupt_vector as *const u32).read_volatile();

    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {entry}",
        sp = in(reg) initial_sp,
        entry = in(reg) table.entry_point,
        options(noreturn)
    );
}
