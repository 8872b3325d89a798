// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Backup-domain register and core reset ports.
//!
//! BKP_DR1 is the one half-word surviving system reset; it carries the boot
//! magic between the application, the bootloader and the reset paths. The
//! backup domain is write-protected until PWR/BKP clocks are enabled and the
//! DBP bit is set.

use torque_common::reset::{BackupDomain, ResetControl};

const RCC_APB1ENR: *mut u32 = 0x4002_101C as *mut u32;
const APB1ENR_BKPEN: u32 = 1 << 27;
const APB1ENR_PWREN: u32 = 1 << 28;

const PWR_CR: *mut u32 = 0x4000_7000 as *mut u32;
const PWR_CR_DBP: u32 = 1 << 8;

const BKP_DR1: *mut u32 = 0x4000_6C04 as *mut u32;

pub struct BackupRegister {
    _priv: (),
}

impl BackupRegister {
    /// Enable the backup-domain clocks and lift write protection.
    pub fn enable() -> Self {
        unsafe {
            let enr = RCC_APB1ENR.read_volatile();
            RCC_APB1ENR.write_volatile(enr | APB1ENR_BKPEN | APB1ENR_PWREN);
            let cr = PWR_CR.read_volatile();
            PWR_CR.write_volatile(cr | PWR_CR_DBP);
        }
        Self { _priv: () }
    }
}

impl BackupDomain for BackupRegister {
    fn read(&self) -> u16 {
        unsafe { BKP_DR1.read_volatile() as u16 }
    }

    fn write(&mut self, value: u16) {
        unsafe {
            BKP_DR1.write_volatile(value as u32);
        }
    }
}

pub struct CoreReset;

impl ResetControl for CoreReset {
    fn system_reset(&mut self) -> ! {
        cortex_m::peripheral::SCB::sys_reset()
    }
}
