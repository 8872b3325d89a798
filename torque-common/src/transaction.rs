// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader transaction state machine.
//!
//! Drives a flashing session from handshake negotiation through erase,
//! download and metadata commit. Every inbound message produces a typed
//! acknowledgement; protocol violations are reported with a precise
//! rejection code and never disturb the bootloader itself. The data write
//! path runs a two-stage gate (region classification, then the erase
//! record) so protected memory and stale erase state are rejected before
//! any hardware programming is attempted.
//!
//! Runs on the main loop only; the transport's receive side lives in
//! interrupt context and hands frames over through an SPSC queue.

use heapless::Vec;

use crate::flash::{EraseError, FlashController, FlashDevice, WriteOutcome};
use crate::jump_table::JumpTable;
use crate::memory::{MemoryMap, Region};
use crate::protocol::{
    BootloaderStatus, ControlCommand, HandshakeResponse, Register, Reply, Request, UnitId,
    WritePayload, WriteStatus, ENTRY_SEQ_ARM, ENTRY_SEQ_CONFIRM, STALL_TIMEOUT_MS,
};
use crate::reset::{EntryReason, ResetTarget};
use crate::tracker::ErasedPageTracker;

/// Upper bound on host-declared logical blocks per transaction.
pub const MAX_LOGICAL_BLOCKS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LogicalBlock {
    start: u32,
    size: u32,
}

impl LogicalBlock {
    fn end(&self) -> u32 {
        self.start + self.size
    }

    fn overlaps(&self, other: &LogicalBlock) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Session state accumulated between a Transaction Magic and commit/abort.
#[derive(Debug, Default)]
struct Transaction {
    magic: u16,
    entry_point: Option<u32>,
    interrupt_vector: Option<u32>,
    erase_budget: Option<u32>,
    erased_pages: u32,
    declared_blocks: Option<u32>,
    blocks: Vec<LogicalBlock, MAX_LOGICAL_BLOCKS>,
    pending_block_start: Option<u32>,
    firmware_size: Option<u32>,
    firmware_crc: Option<u32>,
    firmware_version: Option<u32>,
    data_writes: u32,
}

pub struct Bootloader<D> {
    flash: FlashController<D>,
    map: MemoryMap,
    tracker: ErasedPageTracker,
    status: BootloaderStatus,
    txn: Option<Transaction>,
    unit: UnitId,
    reason: EntryReason,
    entry_armed: bool,
    host_claimed: bool,
    pending_reset: Option<ResetTarget>,
    last_activity_ms: u32,
}

impl<D: FlashDevice> Bootloader<D> {
    pub fn new(
        flash: FlashController<D>,
        map: MemoryMap,
        unit: UnitId,
        reason: EntryReason,
    ) -> Self {
        debug_assert!(map.is_coherent());
        Self {
            flash,
            map,
            tracker: ErasedPageTracker::new(),
            status: BootloaderStatus::Ready,
            txn: None,
            unit,
            reason,
            entry_armed: false,
            host_claimed: false,
            pending_reset: None,
            last_activity_ms: 0,
        }
    }

    pub fn status(&self) -> BootloaderStatus {
        self.status
    }

    /// True once the host completed the entry sequence; keeps the startup
    /// CAN check window from handing off to the application.
    pub fn host_claimed(&self) -> bool {
        self.host_claimed
    }

    /// Reset requested by a confirmed exit. The caller sends the ack first,
    /// then performs the reset.
    pub fn take_pending_reset(&mut self) -> Option<ResetTarget> {
        self.pending_reset.take()
    }

    pub fn beacon(&self) -> Reply {
        Reply::Beacon {
            status: self.status,
            target: self.unit,
            flash_kib: self.map.available_kib(),
            reason: self.reason,
        }
    }

    /// Dispatch one decoded request. `None` means no acknowledgement is due
    /// (a message addressed to another unit, or an incomplete entry
    /// sequence).
    pub fn process(&mut self, req: Request, now_ms: u32) -> Option<Reply> {
        match req {
            Request::Entry { sequence, target } => self.process_entry(sequence, target, now_ms),
            Request::Handshake { register, value } => {
                self.last_activity_ms = now_ms;
                let (response, value) = self.process_handshake(register, value);
                Some(Reply::HandshakeAck {
                    register,
                    response,
                    value,
                })
            }
            Request::Data { address, payload } => {
                self.last_activity_ms = now_ms;
                let status = self.write(address, payload);
                Some(Reply::DataAck { address, status })
            }
            Request::Exit => {
                self.last_activity_ms = now_ms;
                Some(self.process_exit())
            }
        }
    }

    /// Stall watchdog: a transaction left idle too long degrades to
    /// CommunicationStalled (terminal until reset).
    pub fn on_tick(&mut self, now_ms: u32) {
        if matches!(
            self.status,
            BootloaderStatus::Ready | BootloaderStatus::Error | BootloaderStatus::CommunicationStalled
        ) {
            return;
        }
        if now_ms.wrapping_sub(self.last_activity_ms) >= STALL_TIMEOUT_MS {
            self.status = BootloaderStatus::CommunicationStalled;
        }
    }

    // --- Entry / exit ---

    fn process_entry(&mut self, sequence: u8, target: UnitId, now_ms: u32) -> Option<Reply> {
        if target != self.unit {
            return None;
        }
        self.last_activity_ms = now_ms;
        match sequence {
            ENTRY_SEQ_ARM => {
                self.entry_armed = true;
                None
            }
            ENTRY_SEQ_CONFIRM if self.entry_armed => {
                self.entry_armed = false;
                self.host_claimed = true;
                Some(Reply::EntryAck { target })
            }
            _ => {
                // Out-of-order sequence disarms; the host starts over.
                self.entry_armed = false;
                None
            }
        }
    }

    fn process_exit(&mut self) -> Reply {
        // Mid-transaction exits are refused; Error and CommunicationStalled
        // are terminal-until-reset, and this reset is the way out.
        let confirmed = matches!(
            self.status,
            BootloaderStatus::Ready | BootloaderStatus::Error | BootloaderStatus::CommunicationStalled
        );
        if confirmed {
            self.pending_reset = Some(ResetTarget::ApplicationSkipCanCheck);
        }
        Reply::ExitAck { confirmed }
    }

    // --- Handshake ---

    /// Validate a register access against the current state and apply it.
    /// Returns the response code and the value echoed in the ack (reads and
    /// some diagnostics replace it).
    pub fn process_handshake(&mut self, register: Register, value: u32) -> (HandshakeResponse, u32) {
        if matches!(
            self.status,
            BootloaderStatus::Error | BootloaderStatus::CommunicationStalled
        ) {
            return (HandshakeResponse::WrongState, value);
        }

        match register {
            Register::TransactionMagic => self.handle_magic(value),
            Register::Command => self.handle_command(value),
            Register::EntryPoint => self.handle_entry_point(value),
            Register::InterruptVector => self.handle_interrupt_vector(value),
            Register::EraseCount => self.handle_erase_count(value),
            Register::PhysicalBlockToErase => self.handle_erase_page(value),
            Register::LogicalBlockCount => self.handle_block_count(value),
            Register::LogicalBlockStart => self.handle_block_start(value),
            Register::LogicalBlockSize => self.handle_block_size(value),
            Register::FirmwareSize => self.handle_firmware_size(value),
            Register::FirmwareChecksum => self.handle_metadata(value, MetadataField::Checksum),
            Register::FirmwareVersion => self.handle_metadata(value, MetadataField::Version),
            // Read-only registers: value 0 reads, anything else is a
            // rejected write.
            Register::PhysicalBlockSize => self.read_register(value, self.map.page_size),
            Register::PhysicalBlockCount => self.read_register(value, self.map.available_pages()),
            Register::AvailableFlashStart => self.read_register(value, self.map.available.start),
        }
    }

    fn read_register(&self, written: u32, current: u32) -> (HandshakeResponse, u32) {
        if written != 0 {
            (HandshakeResponse::RegisterReadOnly, written)
        } else {
            (HandshakeResponse::Accepted, current)
        }
    }

    fn handle_magic(&mut self, value: u32) -> (HandshakeResponse, u32) {
        if self.txn.is_some() {
            return (HandshakeResponse::TransactionAlreadyActive, value);
        }
        if value == 0 || value > u16::MAX as u32 {
            return (HandshakeResponse::MagicOutOfRange, value);
        }
        // New session: the previous transaction's erase record must never
        // grant write access again.
        self.tracker.reset();
        self.txn = Some(Transaction {
            magic: value as u16,
            ..Transaction::default()
        });
        self.status = BootloaderStatus::Initialization;
        (HandshakeResponse::Accepted, value)
    }

    fn handle_command(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let Some(cmd) = ControlCommand::from_wire(value) else {
            return (HandshakeResponse::UnknownCommand, value);
        };
        if self.txn.is_none() {
            return (HandshakeResponse::TransactionNotStarted, value);
        }
        let response = match cmd {
            ControlCommand::RequestBlockInfo => match self.status {
                BootloaderStatus::Initialization
                | BootloaderStatus::TransmittingPhysicalMemoryBlocks => {
                    self.status = BootloaderStatus::TransmittingPhysicalMemoryBlocks;
                    HandshakeResponse::Accepted
                }
                _ => HandshakeResponse::CommandNotExpected,
            },
            ControlCommand::BeginMemoryMap => match self.status {
                BootloaderStatus::Initialization
                | BootloaderStatus::TransmittingPhysicalMemoryBlocks => {
                    self.status = BootloaderStatus::ReceivingFirmwareMemoryMap;
                    HandshakeResponse::Accepted
                }
                _ => HandshakeResponse::CommandNotExpected,
            },
            ControlCommand::BeginDownload => match self.status {
                BootloaderStatus::ErasingPhysicalBlocks => {
                    self.status = BootloaderStatus::DownloadingFirmware;
                    HandshakeResponse::Accepted
                }
                _ => HandshakeResponse::CommandNotExpected,
            },
            ControlCommand::FinishDownload => match self.status {
                BootloaderStatus::DownloadingFirmware => {
                    if self.txn.as_ref().is_some_and(|t| t.data_writes == 0) {
                        HandshakeResponse::DownloadIncomplete
                    } else {
                        self.status = BootloaderStatus::ReceivingFirmwareMetadata;
                        HandshakeResponse::Accepted
                    }
                }
                _ => HandshakeResponse::CommandNotExpected,
            },
            ControlCommand::CommitFirmware => match self.status {
                BootloaderStatus::ReceivingFirmwareMetadata => return self.commit(value),
                _ => HandshakeResponse::CommandNotExpected,
            },
            ControlCommand::AbortTransaction => {
                self.end_transaction();
                HandshakeResponse::Accepted
            }
        };
        (response, value)
    }

    fn handle_entry_point(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[
            BootloaderStatus::Initialization,
            BootloaderStatus::ReceivingFirmwareMetadata,
        ]) {
            Err(r) => r,
            Ok(()) => {
                // Thumb entry points carry bit 0 set.
                if value & 1 == 0 {
                    HandshakeResponse::EntryPointMisaligned
                } else if self.map.classify(value & !1) != Region::AvailableFlash {
                    HandshakeResponse::EntryPointNotInFlash
                } else {
                    self.txn_mut().entry_point = Some(value);
                    HandshakeResponse::Accepted
                }
            }
        };
        (response, value)
    }

    fn handle_interrupt_vector(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[
            BootloaderStatus::Initialization,
            BootloaderStatus::ReceivingFirmwareMetadata,
        ]) {
            Err(r) => r,
            Ok(()) => {
                // VTOR alignment for this vector count.
                if value % 512 != 0 {
                    HandshakeResponse::VectorTableMisaligned
                } else if self.map.classify(value) != Region::AvailableFlash {
                    HandshakeResponse::VectorTableNotInFlash
                } else {
                    self.txn_mut().interrupt_vector = Some(value);
                    HandshakeResponse::Accepted
                }
            }
        };
        (response, value)
    }

    fn handle_erase_count(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[
            BootloaderStatus::Initialization,
            BootloaderStatus::TransmittingPhysicalMemoryBlocks,
            BootloaderStatus::ReceivingFirmwareMemoryMap,
        ]) {
            Err(r) => r,
            Ok(()) => {
                if value > self.map.available_pages() {
                    HandshakeResponse::EraseCountTooLarge
                } else {
                    self.txn_mut().erase_budget = Some(value);
                    HandshakeResponse::Accepted
                }
            }
        };
        (response, value)
    }

    fn handle_erase_page(&mut self, value: u32) -> (HandshakeResponse, u32) {
        match self.status {
            BootloaderStatus::Initialization
            | BootloaderStatus::TransmittingPhysicalMemoryBlocks
            | BootloaderStatus::ErasingPhysicalBlocks => {}
            BootloaderStatus::ReceivingFirmwareMemoryMap => {
                if !self.memory_map_complete() {
                    return (HandshakeResponse::LogicalBlockListIncomplete, value);
                }
            }
            BootloaderStatus::Ready => return (HandshakeResponse::TransactionNotStarted, value),
            _ => return (HandshakeResponse::WrongState, value),
        }

        if !self.map.is_page_aligned(value) {
            return (HandshakeResponse::PageAddressNotAligned, value);
        }
        match self.map.classify(value) {
            Region::AvailableFlash => {}
            Region::BootloaderFlash | Region::JumpTable => {
                return (HandshakeResponse::PageProtected, value)
            }
            Region::Ram | Region::Unknown => {
                return (HandshakeResponse::PageNotInAvailableFlash, value)
            }
        }

        let already_erased = self.tracker.is_erased(value);
        let txn = self.txn.as_ref().expect("active state implies transaction");
        if let Some(budget) = txn.erase_budget {
            if !already_erased && txn.erased_pages >= budget {
                return (HandshakeResponse::EraseCountExceeded, value);
            }
        }

        match self.flash.erase_page(value) {
            Err(EraseError::Timeout) => {
                self.status = BootloaderStatus::Error;
                (HandshakeResponse::EraseTimeout, value)
            }
            Err(EraseError::Failed) => {
                self.status = BootloaderStatus::Error;
                (HandshakeResponse::EraseFailed, value)
            }
            Ok(()) => {
                if !already_erased {
                    self.txn_mut().erased_pages += 1;
                }
                self.tracker.mark_erased(value);
                self.status = BootloaderStatus::ErasingPhysicalBlocks;
                (HandshakeResponse::Accepted, value)
            }
        }
    }

    fn handle_block_count(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[BootloaderStatus::ReceivingFirmwareMemoryMap]) {
            Err(r) => r,
            Ok(()) => {
                if value as usize > MAX_LOGICAL_BLOCKS {
                    HandshakeResponse::LogicalBlockCountTooLarge
                } else {
                    let txn = self.txn_mut();
                    txn.declared_blocks = Some(value);
                    txn.blocks.clear();
                    txn.pending_block_start = None;
                    HandshakeResponse::Accepted
                }
            }
        };
        (response, value)
    }

    fn handle_block_start(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[BootloaderStatus::ReceivingFirmwareMemoryMap]) {
            Err(r) => r,
            Ok(()) => {
                let declared = self.txn.as_ref().and_then(|t| t.declared_blocks);
                match declared {
                    None => HandshakeResponse::WrongState,
                    Some(n) if self.txn_ref().blocks.len() as u32 >= n => {
                        HandshakeResponse::LogicalBlockCountTooLarge
                    }
                    Some(_) => {
                        if value % 2 != 0 {
                            HandshakeResponse::LogicalBlockMisaligned
                        } else if self.map.classify(value) != Region::AvailableFlash {
                            HandshakeResponse::LogicalBlockOutOfRange
                        } else {
                            self.txn_mut().pending_block_start = Some(value);
                            HandshakeResponse::Accepted
                        }
                    }
                }
            }
        };
        (response, value)
    }

    fn handle_block_size(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[BootloaderStatus::ReceivingFirmwareMemoryMap]) {
            Err(r) => r,
            Ok(()) => match self.pending_block_start() {
                None => HandshakeResponse::WrongState,
                Some(start) => {
                    let block = LogicalBlock { start, size: value };
                    if value == 0 || value % 2 != 0 {
                        HandshakeResponse::LogicalBlockMisaligned
                    } else if start.checked_add(value).is_none()
                        || self.map.classify(block.end() - 1) != Region::AvailableFlash
                    {
                        HandshakeResponse::LogicalBlockOutOfRange
                    } else if self.txn_ref().blocks.iter().any(|b| b.overlaps(&block)) {
                        HandshakeResponse::LogicalBlocksOverlapping
                    } else {
                        let txn = self.txn_mut();
                        txn.pending_block_start = None;
                        // Capacity bounded by declared_blocks <= MAX.
                        let _ = txn.blocks.push(block);
                        HandshakeResponse::Accepted
                    }
                }
            },
        };
        (response, value)
    }

    fn handle_firmware_size(&mut self, value: u32) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[BootloaderStatus::ReceivingFirmwareMetadata]) {
            Err(r) => r,
            Ok(()) => {
                if value == 0 {
                    HandshakeResponse::FirmwareSizeZero
                } else if value > self.map.available.len() {
                    HandshakeResponse::FirmwareSizeTooLarge
                } else {
                    self.txn_mut().firmware_size = Some(value);
                    HandshakeResponse::Accepted
                }
            }
        };
        (response, value)
    }

    fn handle_metadata(&mut self, value: u32, field: MetadataField) -> (HandshakeResponse, u32) {
        let response = match self.require_states(&[BootloaderStatus::ReceivingFirmwareMetadata]) {
            Err(r) => r,
            Ok(()) => {
                let txn = self.txn_mut();
                match field {
                    MetadataField::Checksum => txn.firmware_crc = Some(value),
                    MetadataField::Version => txn.firmware_version = Some(value),
                }
                HandshakeResponse::Accepted
            }
        };
        (response, value)
    }

    /// Verify the checksum and publish the new jump table. On success the
    /// transaction is over and the ack's value echoes the command; on a
    /// checksum mismatch the value carries the computed CRC so the host can
    /// see what the device read back.
    fn commit(&mut self, command_value: u32) -> (HandshakeResponse, u32) {
        let txn = self.txn_ref();
        let (Some(entry), Some(vector), Some(size), Some(crc)) = (
            txn.entry_point,
            txn.interrupt_vector,
            txn.firmware_size,
            txn.firmware_crc,
        ) else {
            return (HandshakeResponse::MetadataIncomplete, command_value);
        };

        let computed = self.flash.checksum(self.map.available.start, size);
        if computed != crc {
            return (HandshakeResponse::ChecksumMismatch, computed);
        }

        // Invalidate first: a reset during the update leaves a table that
        // fails validation, never a half-trusted one.
        if self.invalidate_jump_table().is_err() {
            self.status = BootloaderStatus::Error;
            return (HandshakeResponse::JumpTableWriteFailed, command_value);
        }
        let table = JumpTable {
            entry_point: entry,
            interrupt_vector: vector,
        };
        for (i, word) in table.to_words().iter().enumerate() {
            let addr = self.map.jump_table.start + (i as u32) * 4;
            if self.flash.write(addr, WritePayload::Word(*word)) != WriteOutcome::Ok {
                self.status = BootloaderStatus::Error;
                return (HandshakeResponse::JumpTableWriteFailed, command_value);
            }
        }

        self.end_transaction();
        (HandshakeResponse::Accepted, command_value)
    }

    /// Erase the jump table page. Flash cannot be rolled back, so
    /// erase-before-write is the atomicity mechanism for table updates.
    pub fn invalidate_jump_table(&mut self) -> Result<(), EraseError> {
        self.flash.erase_page(self.map.jump_table.start)
    }

    // --- Data path ---

    /// The core safety contract: classify, then check the erase record, then
    /// program. Protected regions and non-flash addresses never reach the
    /// hardware layer.
    pub fn write(&mut self, address: u32, payload: WritePayload) -> WriteStatus {
        match self.map.classify(address) {
            Region::BootloaderFlash | Region::JumpTable => return WriteStatus::MemoryProtected,
            Region::Ram | Region::Unknown => return WriteStatus::NotInFlash,
            Region::AvailableFlash => {}
        }
        let end = address + payload.len() - 1;
        if self.map.classify(end) != Region::AvailableFlash {
            return WriteStatus::NotInFlash;
        }

        // Outside the erase/download phases there is no valid erase record.
        if !matches!(
            self.status,
            BootloaderStatus::ErasingPhysicalBlocks | BootloaderStatus::DownloadingFirmware
        ) {
            return WriteStatus::NotInErasedMemory;
        }
        // A word write may straddle a page boundary; both pages must have
        // been erased this session.
        if !self.tracker.is_erased(self.map.page_base(address))
            || !self.tracker.is_erased(self.map.page_base(end))
        {
            return WriteStatus::NotInErasedMemory;
        }

        match self.flash.write(address, payload) {
            WriteOutcome::Ok => {
                self.note_data_write();
                WriteStatus::Ok
            }
            WriteOutcome::AlreadyWritten => {
                self.note_data_write();
                WriteStatus::AlreadyWritten
            }
            WriteOutcome::Timeout => WriteStatus::Timeout,
            WriteOutcome::ProtectViolation => {
                // The classifier approved this address; hardware protection
                // disagreeing means the gates no longer match reality.
                panic!("write protection fault in available flash @ {address:#010x}");
            }
        }
    }

    fn note_data_write(&mut self) {
        self.txn_mut().data_writes += 1;
        if self.status == BootloaderStatus::ErasingPhysicalBlocks {
            self.status = BootloaderStatus::DownloadingFirmware;
        }
    }

    // --- Helpers ---

    fn require_states(&self, allowed: &[BootloaderStatus]) -> Result<(), HandshakeResponse> {
        if self.txn.is_none() {
            return Err(HandshakeResponse::TransactionNotStarted);
        }
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(HandshakeResponse::WrongState)
        }
    }

    fn pending_block_start(&self) -> Option<u32> {
        self.txn_ref().pending_block_start
    }

    fn memory_map_complete(&self) -> bool {
        let txn = self.txn_ref();
        match txn.declared_blocks {
            Some(n) => txn.blocks.len() as u32 == n && txn.pending_block_start.is_none(),
            None => false,
        }
    }

    fn end_transaction(&mut self) {
        self.txn = None;
        // Stale erase records must not leak into a later session.
        self.tracker.reset();
        self.status = BootloaderStatus::Ready;
    }

    fn txn_ref(&self) -> &Transaction {
        self.txn.as_ref().expect("active state implies transaction")
    }

    fn txn_mut(&mut self) -> &mut Transaction {
        self.txn.as_mut().expect("active state implies transaction")
    }

    /// Session token of the active transaction, if any.
    pub fn transaction_magic(&self) -> Option<u16> {
        self.txn.as_ref().map(|t| t.magic)
    }

    pub fn firmware_version(&self) -> Option<u32> {
        self.txn.as_ref().and_then(|t| t.firmware_version)
    }
}

enum MetadataField {
    Checksum,
    Version,
}
