// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! STM32F1 flash programming and erase controller (FPEC) as a `FlashDevice`.
//!
//! The sequencing (clear flags, busy-wait, latch PG/PER, classify SR) lives
//! in `torque_common::flash::FlashController`; this is only the raw register
//! access. SR error flags are write-1-to-clear.

use torque_common::flash::{FlashDevice, FlashErrors};

const FLASH_R_BASE: u32 = 0x4002_2000;
const FLASH_KEYR: *mut u32 = (FLASH_R_BASE + 0x04) as *mut u32;
const FLASH_SR: *mut u32 = (FLASH_R_BASE + 0x0C) as *mut u32;
const FLASH_CR: *mut u32 = (FLASH_R_BASE + 0x10) as *mut u32;
const FLASH_AR: *mut u32 = (FLASH_R_BASE + 0x14) as *mut u32;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

const SR_BSY: u32 = 1 << 0;
const SR_PGERR: u32 = 1 << 2;
const SR_WRPRTERR: u32 = 1 << 4;
const SR_EOP: u32 = 1 << 5;

const CR_PG: u32 = 1 << 0;
const CR_PER: u32 = 1 << 1;
const CR_STRT: u32 = 1 << 6;
const CR_LOCK: u32 = 1 << 7;

pub struct FpecFlash {
    _priv: (),
}

impl FpecFlash {
    /// Unlock the FPEC and hand out the device. One instance per boot.
    pub fn unlock() -> Self {
        unsafe {
            if FLASH_CR.read_volatile() & CR_LOCK != 0 {
                FLASH_KEYR.write_volatile(KEY1);
                FLASH_KEYR.write_volatile(KEY2);
            }
        }
        Self { _priv: () }
    }

    fn modify_cr(set: u32, clear: u32) {
        unsafe {
            let cr = FLASH_CR.read_volatile();
            FLASH_CR.write_volatile((cr & !clear) | set);
        }
    }
}

impl FlashDevice for FpecFlash {
    fn busy(&self) -> bool {
        unsafe { FLASH_SR.read_volatile() & SR_BSY != 0 }
    }

    fn take_errors(&mut self) -> FlashErrors {
        unsafe {
            let sr = FLASH_SR.read_volatile();
            FLASH_SR.write_volatile(SR_PGERR | SR_WRPRTERR | SR_EOP);
            FlashErrors {
                programming: sr & SR_PGERR != 0,
                write_protect: sr & SR_WRPRTERR != 0,
            }
        }
    }

    fn set_programming(&mut self, enable: bool) {
        if enable {
            Self::modify_cr(CR_PG, 0);
        } else {
            Self::modify_cr(0, CR_PG);
        }
    }

    fn start_page_erase(&mut self, page_addr: u32) {
        Self::modify_cr(CR_PER, 0);
        unsafe {
            FLASH_AR.write_volatile(page_addr);
        }
        Self::modify_cr(CR_STRT, 0);
    }

    fn end_page_erase(&mut self) {
        Self::modify_cr(0, CR_PER);
    }

    fn program_half_word(&mut self, addr: u32, value: u16) {
        unsafe {
            (addr as *mut u16).write_volatile(value);
        }
    }

    fn read_half_word(&self, addr: u32) -> u16 {
        unsafe { (addr as *const u16).read_volatile() }
    }
}
