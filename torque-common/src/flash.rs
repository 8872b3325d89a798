// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash programming sequencer.
//!
//! `FlashDevice` abstracts the raw flash controller: a busy flag, sticky
//! error flags, a program-mode latch, page erase, and half-word stores.
//! `FlashController` owns the operation sequencing the reference controller
//! requires: clear stale flags, bounded busy-wait, program low half then high
//! half for word writes, then classify the resulting flags. Both erase and
//! program waits are bounded; a stuck controller reports a timeout instead of
//! hanging the bootloader.

pub mod sim;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::poll::Poller;
use crate::protocol::WritePayload;

/// Same polynomial on both ends of the link; the host computes this over the
/// firmware file, the bootloader over the programmed region.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Sticky error flags, read-and-cleared in one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlashErrors {
    /// Programming error: the destination was not blank. Flash programming
    /// can only clear bits, so the store was skipped by hardware.
    pub programming: bool,
    /// Write-protection error. Never expected on an address the region
    /// classifier approved; the caller escalates it.
    pub write_protect: bool,
}

impl FlashErrors {
    pub fn any(&self) -> bool {
        self.programming || self.write_protect
    }
}

/// Raw flash controller operations. Implemented over the STM32F105 FPEC in
/// `torque-bootloader` and by [`sim::FlashSim`] for host tests.
pub trait FlashDevice {
    fn busy(&self) -> bool;
    /// Read the sticky error flags and clear them.
    fn take_errors(&mut self) -> FlashErrors;
    /// Latch or release half-word programming mode.
    fn set_programming(&mut self, enable: bool);
    /// Launch a page erase. Completion is observed via `busy`.
    fn start_page_erase(&mut self, page_addr: u32);
    /// Release the erase latch after completion.
    fn end_page_erase(&mut self);
    /// The memory-mapped store. Only meaningful with programming latched.
    fn program_half_word(&mut self, addr: u32, value: u16);
    fn read_half_word(&self, addr: u32) -> u16;
}

/// Outcome of one program operation, before protocol mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    /// Destination was not blank; the store was a hardware no-op.
    AlreadyWritten,
    /// Write-protection tripped. Upstream gates make this unreachable for
    /// approved addresses, so the state machine treats it as fatal.
    ProtectViolation,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseError {
    Failed,
    Timeout,
}

pub struct FlashController<D> {
    dev: D,
    poller: Poller,
}

impl<D: FlashDevice> FlashController<D> {
    pub fn new(dev: D, poller: Poller) -> Self {
        Self { dev, poller }
    }

    /// Erase one page. The caller restricts the destination to AvailableFlash
    /// or the JumpTable page; this layer only sequences the hardware.
    pub fn erase_page(&mut self, page_addr: u32) -> Result<(), EraseError> {
        if self.poller.wait(|| !self.dev.busy()).is_err() {
            return Err(EraseError::Timeout);
        }
        self.dev.take_errors();

        self.dev.start_page_erase(page_addr);
        let waited = self.poller.wait(|| !self.dev.busy());
        self.dev.end_page_erase();
        if waited.is_err() {
            return Err(EraseError::Timeout);
        }

        if self.dev.take_errors().any() {
            return Err(EraseError::Failed);
        }
        Ok(())
    }

    /// Program a half-word or a word. Words are two sequential half-word
    /// stores, low half first, each preceded by a busy-wait.
    pub fn write(&mut self, addr: u32, payload: WritePayload) -> WriteOutcome {
        match payload {
            WritePayload::HalfWord(v) => self.write_half_word(addr, v),
            WritePayload::Word(w) => {
                let low = self.write_half_word(addr, w as u16);
                if matches!(low, WriteOutcome::ProtectViolation | WriteOutcome::Timeout) {
                    return low;
                }
                let high = self.write_half_word(addr + 2, (w >> 16) as u16);
                match (low, high) {
                    (_, WriteOutcome::ProtectViolation) => WriteOutcome::ProtectViolation,
                    (_, WriteOutcome::Timeout) => WriteOutcome::Timeout,
                    (WriteOutcome::AlreadyWritten, _) | (_, WriteOutcome::AlreadyWritten) => {
                        WriteOutcome::AlreadyWritten
                    }
                    _ => WriteOutcome::Ok,
                }
            }
        }
    }

    fn write_half_word(&mut self, addr: u32, value: u16) -> WriteOutcome {
        if self.poller.wait(|| !self.dev.busy()).is_err() {
            return WriteOutcome::Timeout;
        }
        // Drop stale flags so the classification below sees only this store.
        self.dev.take_errors();

        self.dev.set_programming(true);
        self.dev.program_half_word(addr, value);
        let waited = self.poller.wait(|| !self.dev.busy());
        self.dev.set_programming(false);
        if waited.is_err() {
            return WriteOutcome::Timeout;
        }

        let errors = self.dev.take_errors();
        if errors.write_protect {
            WriteOutcome::ProtectViolation
        } else if errors.programming {
            WriteOutcome::AlreadyWritten
        } else {
            WriteOutcome::Ok
        }
    }

    pub fn read_half_word(&self, addr: u32) -> u16 {
        self.dev.read_half_word(addr)
    }

    /// CRC-32 over `len` bytes of flash starting at `start`.
    pub fn checksum(&self, start: u32, len: u32) -> u32 {
        let mut digest = CRC32.digest();
        let mut addr = start;
        let mut remaining = len;
        while remaining > 0 {
            let half = self.dev.read_half_word(addr).to_le_bytes();
            let take = remaining.min(2) as usize;
            digest.update(&half[..take]);
            addr += 2;
            remaining -= take as u32;
        }
        digest.finalize()
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }
}

#[cfg(test)]
mod tests {
    use super::sim::FlashSim;
    use super::*;
    use crate::memory::Span;

    const BASE: u32 = 0x0800_0000;
    const PAGE: u32 = 0x800;

    fn controller(storage: &mut [u16]) -> FlashController<FlashSim<'_>> {
        FlashController::new(FlashSim::new(storage, BASE, PAGE), Poller::new(1000))
    }

    #[test]
    fn write_to_erased_half_word() {
        let mut mem = [0xFFFFu16; 1024];
        let mut c = controller(&mut mem);
        assert_eq!(c.write(BASE, WritePayload::HalfWord(0x1234)), WriteOutcome::Ok);
        assert_eq!(c.read_half_word(BASE), 0x1234);
    }

    #[test]
    fn write_word_low_half_first_layout() {
        let mut mem = [0xFFFFu16; 1024];
        let mut c = controller(&mut mem);
        assert_eq!(c.write(BASE + 4, WritePayload::Word(0x1234_5678)), WriteOutcome::Ok);
        assert_eq!(c.read_half_word(BASE + 4), 0x5678);
        assert_eq!(c.read_half_word(BASE + 6), 0x1234);
    }

    #[test]
    fn rewrite_reports_already_written() {
        let mut mem = [0xFFFFu16; 1024];
        let mut c = controller(&mut mem);
        assert_eq!(c.write(BASE, WritePayload::Word(0x1234_5678)), WriteOutcome::Ok);
        assert_eq!(
            c.write(BASE, WritePayload::Word(0x1234_5678)),
            WriteOutcome::AlreadyWritten
        );
        // The skipped store must not have corrupted the cell.
        assert_eq!(c.read_half_word(BASE), 0x5678);
    }

    #[test]
    fn protect_violation_reported() {
        let mut mem = [0xFFFFu16; 1024];
        let mut sim = FlashSim::new(&mut mem, BASE, PAGE);
        sim.protect(Span::new(BASE, BASE + PAGE));
        let mut c = FlashController::new(sim, Poller::new(1000));
        assert_eq!(
            c.write(BASE, WritePayload::HalfWord(0)),
            WriteOutcome::ProtectViolation
        );
    }

    #[test]
    fn erase_restores_blank_state() {
        let mut mem = [0xFFFFu16; 1024];
        let mut c = controller(&mut mem);
        assert_eq!(c.write(BASE, WritePayload::Word(0)), WriteOutcome::Ok);
        assert_eq!(c.erase_page(BASE), Ok(()));
        assert_eq!(c.read_half_word(BASE), 0xFFFF);
        assert_eq!(c.write(BASE, WritePayload::Word(0)), WriteOutcome::Ok);
    }

    #[test]
    fn stuck_device_times_out() {
        let mut mem = [0xFFFFu16; 1024];
        let mut sim = FlashSim::new(&mut mem, BASE, PAGE);
        sim.stuck = true;
        let mut c = FlashController::new(sim, Poller::new(10));
        assert_eq!(c.write(BASE, WritePayload::HalfWord(1)), WriteOutcome::Timeout);
        assert_eq!(c.erase_page(BASE), Err(EraseError::Timeout));
    }

    #[test]
    fn checksum_matches_host_computation() {
        let mut mem = [0xFFFFu16; 1024];
        let mut c = controller(&mut mem);
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02];
        c.write(BASE, WritePayload::Word(u32::from_le_bytes([0xDE, 0xAD, 0xBE, 0xEF])));
        c.write(BASE + 4, WritePayload::HalfWord(u16::from_le_bytes([0x01, 0x02])));
        assert_eq!(c.checksum(BASE, 6), CRC32.checksum(&bytes));
        // Odd length reads only the low byte of the final half-word.
        assert_eq!(c.checksum(BASE, 5), CRC32.checksum(&bytes[..5]));
    }
}
