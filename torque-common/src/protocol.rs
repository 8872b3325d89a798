// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol types for bootloader <-> host communication.
//!
//! One module holds everything both sides of the CAN link agree on: the
//! memory-layout constants, the handshake register set, the acknowledgement
//! taxonomies and the decoded message types. The byte-level frame layout
//! lives in [`crate::wire`].

pub use crate::reset::EntryReason;

// --- Flash layout constants (STM32F105RC defaults) ---

pub const FLASH_BASE: u32 = 0x0800_0000;
pub const PAGE_SIZE: u32 = 2 * 1024;

pub const BOOTLOADER_FLASH_START: u32 = 0x0800_0000;
pub const BOOTLOADER_FLASH_END: u32 = 0x0800_4000;

/// One page, isolated so invalidation never touches firmware.
pub const JUMP_TABLE_START: u32 = 0x0800_4000;
pub const JUMP_TABLE_END: u32 = JUMP_TABLE_START + PAGE_SIZE;

pub const AVAILABLE_FLASH_START: u32 = 0x0800_4800;
pub const AVAILABLE_FLASH_END: u32 = 0x0804_0000;

pub const RAM_START: u32 = 0x2000_0000;
pub const RAM_END: u32 = 0x2001_0000;

/// Upper bound on erasable pages in AvailableFlash. Must be a power of two
/// (index-set capacity) and is checked against the real page count at compile
/// time in `memory.rs`.
pub const MAX_AVAILABLE_PAGES: usize = 128;

// --- Protocol timing ---

/// Unsolicited status broadcast period.
pub const BEACON_PERIOD_MS: u32 = 500;
/// SoftwareBuild broadcast: at most once per 10 seconds.
pub const SOFTWARE_BUILD_PERIOD_MS: u32 = 10_000;
/// SerialOutput frames: at most once per 40 ms.
pub const SERIAL_OUTPUT_PERIOD_MS: u32 = 40;
/// Inactivity in a mid-transaction state before CommunicationStalled.
pub const STALL_TIMEOUT_MS: u32 = 10_000;
/// How long the startup CAN check listens for an entry request.
pub const CAN_CHECK_WINDOW_MS: u32 = 500;

// --- Entry request arming sequence ---

pub const ENTRY_SEQ_ARM: u8 = 0x55;
pub const ENTRY_SEQ_CONFIRM: u8 = 0xAA;

/// Bus address of one ECU.
pub type UnitId = u8;

// --- Handshake registers ---

/// Register ids exchanged during the handshake phase. Wire codes are fixed;
/// both mapping directions are exhaustive matches so an added register cannot
/// silently go unmapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    TransactionMagic,
    EntryPoint,
    InterruptVector,
    PhysicalBlockSize,
    PhysicalBlockCount,
    AvailableFlashStart,
    EraseCount,
    PhysicalBlockToErase,
    LogicalBlockCount,
    LogicalBlockStart,
    LogicalBlockSize,
    FirmwareSize,
    FirmwareChecksum,
    FirmwareVersion,
    Command,
}

impl Register {
    pub fn to_wire(self) -> u8 {
        match self {
            Register::TransactionMagic => 0x01,
            Register::EntryPoint => 0x02,
            Register::InterruptVector => 0x03,
            Register::PhysicalBlockSize => 0x04,
            Register::PhysicalBlockCount => 0x05,
            Register::AvailableFlashStart => 0x06,
            Register::EraseCount => 0x07,
            Register::PhysicalBlockToErase => 0x08,
            Register::LogicalBlockCount => 0x09,
            Register::LogicalBlockStart => 0x0A,
            Register::LogicalBlockSize => 0x0B,
            Register::FirmwareSize => 0x0C,
            Register::FirmwareChecksum => 0x0D,
            Register::FirmwareVersion => 0x0E,
            Register::Command => 0x0F,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Register::TransactionMagic,
            0x02 => Register::EntryPoint,
            0x03 => Register::InterruptVector,
            0x04 => Register::PhysicalBlockSize,
            0x05 => Register::PhysicalBlockCount,
            0x06 => Register::AvailableFlashStart,
            0x07 => Register::EraseCount,
            0x08 => Register::PhysicalBlockToErase,
            0x09 => Register::LogicalBlockCount,
            0x0A => Register::LogicalBlockStart,
            0x0B => Register::LogicalBlockSize,
            0x0C => Register::FirmwareSize,
            0x0D => Register::FirmwareChecksum,
            0x0E => Register::FirmwareVersion,
            0x0F => Register::Command,
            _ => return None,
        })
    }

    /// Registers the host may only read (value returned in the ack).
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Register::PhysicalBlockSize
                | Register::PhysicalBlockCount
                | Register::AvailableFlashStart
        )
    }
}

/// Control actions written to [`Register::Command`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlCommand {
    RequestBlockInfo,
    BeginMemoryMap,
    BeginDownload,
    FinishDownload,
    CommitFirmware,
    AbortTransaction,
}

impl ControlCommand {
    pub fn to_wire(self) -> u32 {
        match self {
            ControlCommand::RequestBlockInfo => 1,
            ControlCommand::BeginMemoryMap => 2,
            ControlCommand::BeginDownload => 3,
            ControlCommand::FinishDownload => 4,
            ControlCommand::CommitFirmware => 5,
            ControlCommand::AbortTransaction => 6,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            1 => ControlCommand::RequestBlockInfo,
            2 => ControlCommand::BeginMemoryMap,
            3 => ControlCommand::BeginDownload,
            4 => ControlCommand::FinishDownload,
            5 => ControlCommand::CommitFirmware,
            6 => ControlCommand::AbortTransaction,
            _ => return None,
        })
    }
}

// --- Acknowledgement taxonomies ---

/// Outcome of a handshake register write/read. The precision is deliberate:
/// the flashing host can retry the one thing that was wrong instead of
/// aborting the whole transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeResponse {
    Accepted,
    UnknownRegister,
    RegisterReadOnly,
    TransactionNotStarted,
    TransactionAlreadyActive,
    MagicOutOfRange,
    WrongState,
    UnknownCommand,
    CommandNotExpected,
    EntryPointMisaligned,
    EntryPointNotInFlash,
    VectorTableMisaligned,
    VectorTableNotInFlash,
    PageAddressNotAligned,
    PageNotInAvailableFlash,
    PageProtected,
    EraseCountTooLarge,
    EraseCountExceeded,
    EraseFailed,
    EraseTimeout,
    LogicalBlockCountTooLarge,
    LogicalBlocksOverlapping,
    LogicalBlockOutOfRange,
    LogicalBlockMisaligned,
    LogicalBlockListIncomplete,
    FirmwareSizeZero,
    FirmwareSizeTooLarge,
    ChecksumMismatch,
    MetadataIncomplete,
    DownloadIncomplete,
    JumpTableWriteFailed,
}

impl HandshakeResponse {
    pub fn to_wire(self) -> u8 {
        match self {
            HandshakeResponse::Accepted => 0,
            HandshakeResponse::UnknownRegister => 1,
            HandshakeResponse::RegisterReadOnly => 2,
            HandshakeResponse::TransactionNotStarted => 3,
            HandshakeResponse::TransactionAlreadyActive => 4,
            HandshakeResponse::MagicOutOfRange => 5,
            HandshakeResponse::WrongState => 6,
            HandshakeResponse::UnknownCommand => 7,
            HandshakeResponse::CommandNotExpected => 8,
            HandshakeResponse::EntryPointMisaligned => 9,
            HandshakeResponse::EntryPointNotInFlash => 10,
            HandshakeResponse::VectorTableMisaligned => 11,
            HandshakeResponse::VectorTableNotInFlash => 12,
            HandshakeResponse::PageAddressNotAligned => 13,
            HandshakeResponse::PageNotInAvailableFlash => 14,
            HandshakeResponse::PageProtected => 15,
            HandshakeResponse::EraseCountTooLarge => 16,
            HandshakeResponse::EraseCountExceeded => 17,
            HandshakeResponse::EraseFailed => 18,
            HandshakeResponse::EraseTimeout => 19,
            HandshakeResponse::LogicalBlockCountTooLarge => 20,
            HandshakeResponse::LogicalBlocksOverlapping => 21,
            HandshakeResponse::LogicalBlockOutOfRange => 22,
            HandshakeResponse::LogicalBlockMisaligned => 23,
            HandshakeResponse::LogicalBlockListIncomplete => 24,
            HandshakeResponse::FirmwareSizeZero => 25,
            HandshakeResponse::FirmwareSizeTooLarge => 26,
            HandshakeResponse::ChecksumMismatch => 27,
            HandshakeResponse::MetadataIncomplete => 28,
            HandshakeResponse::DownloadIncomplete => 29,
            HandshakeResponse::JumpTableWriteFailed => 30,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0 => HandshakeResponse::Accepted,
            1 => HandshakeResponse::UnknownRegister,
            2 => HandshakeResponse::RegisterReadOnly,
            3 => HandshakeResponse::TransactionNotStarted,
            4 => HandshakeResponse::TransactionAlreadyActive,
            5 => HandshakeResponse::MagicOutOfRange,
            6 => HandshakeResponse::WrongState,
            7 => HandshakeResponse::UnknownCommand,
            8 => HandshakeResponse::CommandNotExpected,
            9 => HandshakeResponse::EntryPointMisaligned,
            10 => HandshakeResponse::EntryPointNotInFlash,
            11 => HandshakeResponse::VectorTableMisaligned,
            12 => HandshakeResponse::VectorTableNotInFlash,
            13 => HandshakeResponse::PageAddressNotAligned,
            14 => HandshakeResponse::PageNotInAvailableFlash,
            15 => HandshakeResponse::PageProtected,
            16 => HandshakeResponse::EraseCountTooLarge,
            17 => HandshakeResponse::EraseCountExceeded,
            18 => HandshakeResponse::EraseFailed,
            19 => HandshakeResponse::EraseTimeout,
            20 => HandshakeResponse::LogicalBlockCountTooLarge,
            21 => HandshakeResponse::LogicalBlocksOverlapping,
            22 => HandshakeResponse::LogicalBlockOutOfRange,
            23 => HandshakeResponse::LogicalBlockMisaligned,
            24 => HandshakeResponse::LogicalBlockListIncomplete,
            25 => HandshakeResponse::FirmwareSizeZero,
            26 => HandshakeResponse::FirmwareSizeTooLarge,
            27 => HandshakeResponse::ChecksumMismatch,
            28 => HandshakeResponse::MetadataIncomplete,
            29 => HandshakeResponse::DownloadIncomplete,
            30 => HandshakeResponse::JumpTableWriteFailed,
            _ => return None,
        })
    }
}

/// Outcome of an attempted flash data write.
///
/// `AlreadyWritten` means the programming unit reported the destination was
/// not blank; flash programming can only clear bits, so this is a recoverable
/// host-side condition, not a hardware fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteStatus {
    Ok,
    NotInErasedMemory,
    MemoryProtected,
    NotInFlash,
    AlreadyWritten,
    Timeout,
}

impl WriteStatus {
    pub fn to_wire(self) -> u8 {
        match self {
            WriteStatus::Ok => 0,
            WriteStatus::NotInErasedMemory => 1,
            WriteStatus::MemoryProtected => 2,
            WriteStatus::NotInFlash => 3,
            WriteStatus::AlreadyWritten => 4,
            WriteStatus::Timeout => 5,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0 => WriteStatus::Ok,
            1 => WriteStatus::NotInErasedMemory,
            2 => WriteStatus::MemoryProtected,
            3 => WriteStatus::NotInFlash,
            4 => WriteStatus::AlreadyWritten,
            5 => WriteStatus::Timeout,
            _ => return None,
        })
    }
}

/// Protocol-visible phase of the transaction state machine, broadcast in the
/// beacon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootloaderStatus {
    Ready,
    Initialization,
    TransmittingPhysicalMemoryBlocks,
    ReceivingFirmwareMemoryMap,
    ErasingPhysicalBlocks,
    DownloadingFirmware,
    ReceivingFirmwareMetadata,
    Error,
    CommunicationStalled,
}

impl BootloaderStatus {
    pub fn to_wire(self) -> u8 {
        match self {
            BootloaderStatus::Ready => 0,
            BootloaderStatus::Initialization => 1,
            BootloaderStatus::TransmittingPhysicalMemoryBlocks => 2,
            BootloaderStatus::ReceivingFirmwareMemoryMap => 3,
            BootloaderStatus::ErasingPhysicalBlocks => 4,
            BootloaderStatus::DownloadingFirmware => 5,
            BootloaderStatus::ReceivingFirmwareMetadata => 6,
            BootloaderStatus::Error => 7,
            BootloaderStatus::CommunicationStalled => 8,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0 => BootloaderStatus::Ready,
            1 => BootloaderStatus::Initialization,
            2 => BootloaderStatus::TransmittingPhysicalMemoryBlocks,
            3 => BootloaderStatus::ReceivingFirmwareMemoryMap,
            4 => BootloaderStatus::ErasingPhysicalBlocks,
            5 => BootloaderStatus::DownloadingFirmware,
            6 => BootloaderStatus::ReceivingFirmwareMetadata,
            7 => BootloaderStatus::Error,
            8 => BootloaderStatus::CommunicationStalled,
            _ => return None,
        })
    }
}

// --- Decoded messages ---

/// A 16- or 32-bit data payload. Words are programmed as two sequential
/// half-word operations, low half first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WritePayload {
    HalfWord(u16),
    Word(u32),
}

impl WritePayload {
    pub fn len(&self) -> u32 {
        match self {
            WritePayload::HalfWord(_) => 2,
            WritePayload::Word(_) => 4,
        }
    }
}

/// Inbound protocol messages, as delivered by the transport adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    Entry { sequence: u8, target: UnitId },
    Handshake { register: Register, value: u32 },
    Data { address: u32, payload: WritePayload },
    Exit,
}

/// Outbound protocol messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    EntryAck {
        target: UnitId,
    },
    HandshakeAck {
        register: Register,
        response: HandshakeResponse,
        value: u32,
    },
    DataAck {
        address: u32,
        status: WriteStatus,
    },
    ExitAck {
        confirmed: bool,
    },
    Beacon {
        status: BootloaderStatus,
        target: UnitId,
        flash_kib: u16,
        reason: EntryReason,
    },
    SoftwareBuild {
        commit: [u8; 7],
        dirty: bool,
    },
    SerialOutput {
        text: heapless::Vec<u8, 8>,
    },
}
