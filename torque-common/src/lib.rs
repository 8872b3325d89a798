// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and logic for the torque CAN bootloader.
//!
//! Everything with a correctness requirement lives here so it can run on a
//! host: the protocol types and CAN frame codec, the memory region
//! classifier, the erased-page tracker, the flash programming sequencer, the
//! bootloader transaction state machine, and the jump-table/reset handoff.
//! Hardware is reached only through the `FlashDevice`, `BackupDomain` and
//! `ResetControl` traits; `torque-bootloader` provides the STM32F105
//! implementations.

#![cfg_attr(not(test), no_std)]

pub mod console;
pub mod flash;
pub mod jump_table;
pub mod memory;
pub mod poll;
pub mod protocol;
pub mod rate;
pub mod reset;
pub mod tracker;
pub mod transaction;
pub mod wire;

// Re-export the types most callers touch.
pub use protocol::{
    BootloaderStatus, ControlCommand, EntryReason, HandshakeResponse, Register, Reply, Request,
    UnitId, WritePayload, WriteStatus,
};
pub use protocol::{AVAILABLE_FLASH_END, AVAILABLE_FLASH_START, PAGE_SIZE};
pub use transaction::Bootloader;
