// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Torque bootloader for STM32F105 automotive ECUs: CAN-driven firmware
//! download with a jump-table handoff to the resident application.

#![no_std]
#![no_main]

mod backup;
mod boot;
mod can;
mod flash;
mod peripherals;

use defmt_rtt as _;
use panic_probe as _;

defmt::timestamp!("{=u32:ms}", peripherals::millis());

use cortex_m_rt::entry;
use torque_common::console::Console;
use torque_common::flash::FlashController;
use torque_common::jump_table::JumpTable;
use torque_common::memory::TARGET_MEMORY_MAP;
use torque_common::poll::Poller;
use torque_common::protocol::{
    Reply, UnitId, BEACON_PERIOD_MS, CAN_CHECK_WINDOW_MS, SOFTWARE_BUILD_PERIOD_MS,
};
use torque_common::rate::RateLimiter;
use torque_common::reset::{decide_boot, BootDecision, EntryReason, ResetCoordinator};
use torque_common::transaction::Bootloader;

/// This ECU's address on the bus.
const UNIT: UnitId = 1;

/// Spin budget for one flash operation. A page erase finishes in ~40 ms;
/// this is comfortably past that at 72 MHz.
const FLASH_SPINS: u32 = 20_000_000;

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut coordinator = ResetCoordinator::new(backup::BackupRegister::enable(), backup::CoreReset);
    let magic = coordinator.take_boot_magic();
    let table = boot::read_jump_table();

    match decide_boot(magic, table) {
        BootDecision::RunApplication(jt) => {
            defmt::println!("Direct handoff to application at {:#010x}", jt.entry_point);
            unsafe { boot::jump_to_application(&jt) }
        }
        BootDecision::StayInBootloader(reason) => run_bootloader(coordinator, reason, None),
        BootDecision::CanCheckWindow(jt) => {
            run_bootloader(coordinator, EntryReason::StartupCanCheck, Some(jt))
        }
    }
}

fn run_bootloader(
    mut coordinator: ResetCoordinator<backup::BackupRegister, backup::CoreReset>,
    reason: EntryReason,
    mut handoff: Option<JumpTable>,
) -> ! {
    let mut board = peripherals::init();
    defmt::println!("Resident, reason {}", reason);

    let flash = FlashController::new(flash::FpecFlash::unlock(), Poller::new(FLASH_SPINS));
    let mut bl = Bootloader::new(flash, TARGET_MEMORY_MAP, UNIT, reason);

    let mut console = Console::new();
    console.write_str("torque bootloader resident\n");

    let mut beacon = RateLimiter::new(BEACON_PERIOD_MS);
    let mut build = RateLimiter::new(SOFTWARE_BUILD_PERIOD_MS);
    let started = peripherals::millis();

    loop {
        let now = peripherals::millis();

        // Startup CAN check: give the host a short window to claim the unit,
        // then hand off to the validated application.
        if let Some(jt) = handoff {
            if bl.host_claimed() {
                defmt::println!("Host claimed the unit, staying resident");
                handoff = None;
            } else if now.wrapping_sub(started) >= CAN_CHECK_WINDOW_MS {
                unsafe { boot::jump_to_application(&jt) }
            }
        }

        if beacon.ready(now) {
            board.transport.send_blocking(&bl.beacon());
        }
        if build.ready(now) {
            board.transport.send_blocking(&software_build());
        }
        if let Some(text) = console.poll(now) {
            board.transport.send_blocking(&text);
        }

        while let Some(req) = board.transport.try_receive() {
            if let Some(reply) = bl.process(req, now) {
                board.transport.send_blocking(&reply);
            }
            if let Some(target) = bl.take_pending_reset() {
                defmt::println!("Exit confirmed, resetting to {}", target);
                coordinator.reset_to(target);
            }
        }

        bl.on_tick(now);
    }
}

/// Compile-time commit identity, injected by build.rs.
fn software_build() -> Reply {
    const HASH: &str = env!("GIT_COMMIT_HASH");
    const DIRTY: &str = env!("GIT_TREE_DIRTY");

    let mut commit = [0u8; 7];
    let hex = HASH.as_bytes();
    for (i, byte) in commit.iter_mut().enumerate() {
        *byte = (nibble(hex[i * 2]) << 4) | nibble(hex[i * 2 + 1]);
    }
    Reply::SoftwareBuild {
        commit,
        dirty: DIRTY == "1",
    }
}

fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}
