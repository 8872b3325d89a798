// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end tests for the bootloader transaction state machine, driven
//! against the NOR flash simulator.

use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use torque_common::flash::sim::FlashSim;
use torque_common::flash::{FlashController, CRC32};
use torque_common::jump_table::{JumpTable, JUMP_TABLE_MAGIC_1, JUMP_TABLE_MAGIC_3};
use torque_common::memory::{Span, TARGET_MEMORY_MAP};
use torque_common::poll::Poller;
use torque_common::protocol::{
    BootloaderStatus, ControlCommand, HandshakeResponse, Register, Reply, Request, WritePayload,
    WriteStatus, AVAILABLE_FLASH_START, ENTRY_SEQ_ARM, ENTRY_SEQ_CONFIRM, JUMP_TABLE_START,
    PAGE_SIZE, RAM_START, STALL_TIMEOUT_MS,
};
use torque_common::reset::{
    BackupDomain, EntryReason, ResetControl, ResetCoordinator, ResetTarget,
};
use torque_common::transaction::Bootloader;

const FLASH_BASE: u32 = 0x0800_0000;
const FLASH_HALF_WORDS: usize = 0x40000 / 2;
const UNIT: u8 = 3;
const MAGIC: u32 = 0xABCD;

fn page(n: u32) -> u32 {
    AVAILABLE_FLASH_START + n * PAGE_SIZE
}

fn storage() -> Vec<u16> {
    vec![0u16; FLASH_HALF_WORDS]
}

fn bootloader(mem: &mut [u16]) -> Bootloader<FlashSim<'_>> {
    let sim = FlashSim::new(mem, FLASH_BASE, PAGE_SIZE);
    Bootloader::new(
        FlashController::new(sim, Poller::new(1000)),
        TARGET_MEMORY_MAP,
        UNIT,
        EntryReason::HostRequest,
    )
}

fn handshake(
    bl: &mut Bootloader<FlashSim<'_>>,
    register: Register,
    value: u32,
) -> HandshakeResponse {
    bl.process_handshake(register, value).0
}

fn command(bl: &mut Bootloader<FlashSim<'_>>, cmd: ControlCommand) -> HandshakeResponse {
    handshake(bl, Register::Command, cmd.to_wire())
}

fn start_transaction(bl: &mut Bootloader<FlashSim<'_>>) {
    assert_eq!(
        handshake(bl, Register::TransactionMagic, MAGIC),
        HandshakeResponse::Accepted
    );
    assert_eq!(bl.status(), BootloaderStatus::Initialization);
}

// --- Handshake validation ---

#[test]
fn writes_rejected_before_transaction_magic() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    assert_eq!(
        handshake(&mut bl, Register::EraseCount, 4),
        HandshakeResponse::TransactionNotStarted
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::TransactionNotStarted
    );
}

#[test]
fn magic_must_be_nonzero_sixteen_bit() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    assert_eq!(
        handshake(&mut bl, Register::TransactionMagic, 0),
        HandshakeResponse::MagicOutOfRange
    );
    assert_eq!(
        handshake(&mut bl, Register::TransactionMagic, 0x1_0000),
        HandshakeResponse::MagicOutOfRange
    );
    assert_eq!(bl.status(), BootloaderStatus::Ready);
}

#[test]
fn second_magic_during_session_is_rejected() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::TransactionMagic, 0x1111),
        HandshakeResponse::TransactionAlreadyActive
    );
}

#[test]
fn read_only_registers_report_layout() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        bl.process_handshake(Register::PhysicalBlockSize, 0),
        (HandshakeResponse::Accepted, PAGE_SIZE)
    );
    assert_eq!(
        bl.process_handshake(Register::PhysicalBlockCount, 0),
        (HandshakeResponse::Accepted, 119)
    );
    assert_eq!(
        bl.process_handshake(Register::AvailableFlashStart, 0),
        (HandshakeResponse::Accepted, AVAILABLE_FLASH_START)
    );
    // A write to a read-only register is refused.
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockSize, 4096),
        HandshakeResponse::RegisterReadOnly
    );
}

#[test]
fn erase_count_bounded_by_available_pages() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::EraseCount, 120),
        HandshakeResponse::EraseCountTooLarge
    );
    assert_eq!(
        handshake(&mut bl, Register::EraseCount, 119),
        HandshakeResponse::Accepted
    );
}

#[test]
fn erase_budget_is_enforced() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(handshake(&mut bl, Register::EraseCount, 1), HandshakeResponse::Accepted);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    // Re-erasing the same page does not consume budget.
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(1)),
        HandshakeResponse::EraseCountExceeded
    );
}

#[test]
fn erase_page_address_validation() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0) + 2),
        HandshakeResponse::PageAddressNotAligned
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, JUMP_TABLE_START),
        HandshakeResponse::PageProtected
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, 0x0800_0000),
        HandshakeResponse::PageProtected
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, RAM_START),
        HandshakeResponse::PageNotInAvailableFlash
    );
}

#[test]
fn entry_point_and_vector_validation() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    // Entry points are Thumb addresses: bit 0 must be set.
    assert_eq!(
        handshake(&mut bl, Register::EntryPoint, page(1)),
        HandshakeResponse::EntryPointMisaligned
    );
    assert_eq!(
        handshake(&mut bl, Register::EntryPoint, 0x2000_0001),
        HandshakeResponse::EntryPointNotInFlash
    );
    assert_eq!(
        handshake(&mut bl, Register::EntryPoint, page(1) | 1),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::InterruptVector, page(0) + 4),
        HandshakeResponse::VectorTableMisaligned
    );
    assert_eq!(
        handshake(&mut bl, Register::InterruptVector, RAM_START),
        HandshakeResponse::VectorTableNotInFlash
    );
    assert_eq!(
        handshake(&mut bl, Register::InterruptVector, page(0)),
        HandshakeResponse::Accepted
    );
}

#[test]
fn logical_block_map_validation() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(command(&mut bl, ControlCommand::BeginMemoryMap), HandshakeResponse::Accepted);
    assert_eq!(bl.status(), BootloaderStatus::ReceivingFirmwareMemoryMap);

    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockCount, 17),
        HandshakeResponse::LogicalBlockCountTooLarge
    );
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockCount, 2),
        HandshakeResponse::Accepted
    );

    // Block 0: two pages.
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockStart, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockSize, 2 * PAGE_SIZE),
        HandshakeResponse::Accepted
    );

    // Block 1 overlapping block 0 is rejected.
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockStart, page(1)),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockSize, PAGE_SIZE),
        HandshakeResponse::LogicalBlocksOverlapping
    );

    // Leaving the map early is refused until the declared count is reached.
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::LogicalBlockListIncomplete
    );

    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockStart, page(2)),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::LogicalBlockSize, PAGE_SIZE),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(bl.status(), BootloaderStatus::ErasingPhysicalBlocks);
}

#[test]
fn command_rejected_when_state_expects_data() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(command(&mut bl, ControlCommand::BeginDownload), HandshakeResponse::Accepted);
    assert_eq!(
        command(&mut bl, ControlCommand::BeginMemoryMap),
        HandshakeResponse::CommandNotExpected
    );
    assert_eq!(
        command(&mut bl, ControlCommand::CommitFirmware),
        HandshakeResponse::CommandNotExpected
    );
    assert_eq!(handshake(&mut bl, Register::Command, 99), HandshakeResponse::UnknownCommand);
}

// --- Data path gates ---

#[test]
fn write_requires_prior_erase() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    // Page 1 was never erased this session.
    assert_eq!(
        bl.write(page(1), WritePayload::Word(0x1234_5678)),
        WriteStatus::NotInErasedMemory
    );
    assert_eq!(bl.write(page(0), WritePayload::Word(0x1234_5678)), WriteStatus::Ok);
}

#[test]
fn protected_and_non_flash_writes_always_rejected() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        bl.write(0x0800_0100, WritePayload::HalfWord(0)),
        WriteStatus::MemoryProtected
    );
    assert_eq!(
        bl.write(JUMP_TABLE_START, WritePayload::Word(0)),
        WriteStatus::MemoryProtected
    );
    assert_eq!(bl.write(RAM_START, WritePayload::HalfWord(0)), WriteStatus::NotInFlash);
    assert_eq!(bl.write(0x6000_0000, WritePayload::Word(0)), WriteStatus::NotInFlash);
}

#[test]
fn word_write_straddling_pages_needs_both_erased() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    let straddle = page(1) - 2;
    assert_eq!(
        bl.write(straddle, WritePayload::Word(0xAABB_CCDD)),
        WriteStatus::NotInErasedMemory
    );
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(1)),
        HandshakeResponse::Accepted
    );
    assert_eq!(bl.write(straddle, WritePayload::Word(0xAABB_CCDD)), WriteStatus::Ok);
}

#[test]
fn fresh_magic_invalidates_previous_erase_record() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(bl.write(page(0), WritePayload::Word(0x1111_2222)), WriteStatus::Ok);

    assert_eq!(command(&mut bl, ControlCommand::AbortTransaction), HandshakeResponse::Accepted);
    assert_eq!(bl.status(), BootloaderStatus::Ready);

    // Same page, new session: the old erase record must not be trusted.
    assert_eq!(
        handshake(&mut bl, Register::TransactionMagic, 0x5A5A),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        bl.write(page(0) + 8, WritePayload::Word(0x3333_4444)),
        WriteStatus::NotInErasedMemory
    );
}

#[test]
fn write_protect_fault_on_approved_address_is_fatal() {
    let mut mem = storage();
    let sim = {
        let mut sim = FlashSim::new(&mut mem, FLASH_BASE, PAGE_SIZE);
        // Protect a few half-words inside an otherwise writable page; the
        // page base stays erasable so the gates approve the write.
        sim.protect(Span::new(page(0) + 16, page(0) + 32));
        sim
    };
    let mut bl = Bootloader::new(
        FlashController::new(sim, Poller::new(1000)),
        TARGET_MEMORY_MAP,
        UNIT,
        EntryReason::HostRequest,
    );
    start_transaction(&mut bl);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        bl.write(page(0) + 16, WritePayload::HalfWord(0))
    }));
    assert!(result.is_err(), "protect violation must be a fatal assertion");
}

// --- Full scenarios ---

#[test]
fn erase_then_write_then_rewrite_sequence() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);

    assert_eq!(
        bl.process(
            Request::Handshake {
                register: Register::TransactionMagic,
                value: MAGIC
            },
            0
        ),
        Some(Reply::HandshakeAck {
            register: Register::TransactionMagic,
            response: HandshakeResponse::Accepted,
            value: MAGIC
        })
    );
    assert_eq!(bl.status(), BootloaderStatus::Initialization);

    assert_eq!(
        bl.process(
            Request::Handshake {
                register: Register::PhysicalBlockToErase,
                value: page(5)
            },
            1
        ),
        Some(Reply::HandshakeAck {
            register: Register::PhysicalBlockToErase,
            response: HandshakeResponse::Accepted,
            value: page(5)
        })
    );
    assert_eq!(bl.status(), BootloaderStatus::ErasingPhysicalBlocks);

    let data = Request::Data {
        address: page(5),
        payload: WritePayload::Word(0x1234_5678),
    };
    assert_eq!(
        bl.process(data, 2),
        Some(Reply::DataAck {
            address: page(5),
            status: WriteStatus::Ok
        })
    );
    assert_eq!(bl.status(), BootloaderStatus::DownloadingFirmware);

    // Identical write again without re-erase: program-only-clears-bits flash
    // reports the destination as not blank.
    assert_eq!(
        bl.process(data, 3),
        Some(Reply::DataAck {
            address: page(5),
            status: WriteStatus::AlreadyWritten
        })
    );
}

#[test]
fn full_transaction_commits_jump_table() {
    let mut mem = storage();
    let firmware: Vec<u8> = (0u32..2048).map(|i| (i * 7 + 1) as u8).collect();
    let crc = CRC32.checksum(&firmware);

    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(command(&mut bl, ControlCommand::RequestBlockInfo), HandshakeResponse::Accepted);
    assert_eq!(bl.status(), BootloaderStatus::TransmittingPhysicalMemoryBlocks);

    assert_eq!(handshake(&mut bl, Register::EraseCount, 1), HandshakeResponse::Accepted);
    assert_eq!(
        handshake(&mut bl, Register::PhysicalBlockToErase, page(0)),
        HandshakeResponse::Accepted
    );

    for (i, chunk) in firmware.chunks(4).enumerate() {
        let word = u32::from_le_bytes(chunk.try_into().unwrap());
        assert_eq!(
            bl.write(page(0) + (i as u32) * 4, WritePayload::Word(word)),
            WriteStatus::Ok
        );
    }
    assert_eq!(command(&mut bl, ControlCommand::FinishDownload), HandshakeResponse::Accepted);
    assert_eq!(bl.status(), BootloaderStatus::ReceivingFirmwareMetadata);

    // Commit without metadata is refused.
    assert_eq!(
        command(&mut bl, ControlCommand::CommitFirmware),
        HandshakeResponse::MetadataIncomplete
    );

    assert_eq!(
        handshake(&mut bl, Register::FirmwareSize, firmware.len() as u32),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::EntryPoint, page(0) | 1),
        HandshakeResponse::Accepted
    );
    assert_eq!(
        handshake(&mut bl, Register::InterruptVector, page(0)),
        HandshakeResponse::Accepted
    );
    assert_eq!(handshake(&mut bl, Register::FirmwareVersion, 42), HandshakeResponse::Accepted);

    // Wrong checksum first: the ack value carries what the device computed.
    assert_eq!(
        handshake(&mut bl, Register::FirmwareChecksum, 0xDEAD_0000),
        HandshakeResponse::Accepted
    );
    let (resp, computed) = bl.process_handshake(
        Register::Command,
        ControlCommand::CommitFirmware.to_wire(),
    );
    assert_eq!(resp, HandshakeResponse::ChecksumMismatch);
    assert_eq!(computed, crc);

    assert_eq!(handshake(&mut bl, Register::FirmwareChecksum, crc), HandshakeResponse::Accepted);
    assert_eq!(command(&mut bl, ControlCommand::CommitFirmware), HandshakeResponse::Accepted);
    assert_eq!(bl.status(), BootloaderStatus::Ready);
    drop(bl);

    // Jump table landed with guards and addresses in place.
    let read_word = |mem: &[u16], addr: u32| -> u32 {
        let i = ((addr - FLASH_BASE) / 2) as usize;
        (mem[i] as u32) | ((mem[i + 1] as u32) << 16)
    };
    assert_eq!(read_word(&mem, JUMP_TABLE_START), JUMP_TABLE_MAGIC_1);
    assert_eq!(read_word(&mem, JUMP_TABLE_START + 4), page(0) | 1);
    assert_eq!(read_word(&mem, JUMP_TABLE_START + 12), page(0));
    assert_eq!(read_word(&mem, JUMP_TABLE_START + 16), JUMP_TABLE_MAGIC_3);
    let words = [
        read_word(&mem, JUMP_TABLE_START),
        read_word(&mem, JUMP_TABLE_START + 4),
        read_word(&mem, JUMP_TABLE_START + 8),
        read_word(&mem, JUMP_TABLE_START + 12),
        read_word(&mem, JUMP_TABLE_START + 16),
    ];
    assert_eq!(
        JumpTable::from_words(&words),
        Ok(JumpTable {
            entry_point: page(0) | 1,
            interrupt_vector: page(0)
        })
    );
}

// --- Entry, exit, beacon, stall ---

#[test]
fn entry_requires_arm_confirm_sequence_for_this_unit() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);

    // Wrong unit: silence.
    assert_eq!(
        bl.process(Request::Entry { sequence: ENTRY_SEQ_ARM, target: UNIT + 1 }, 0),
        None
    );
    // Confirm without arm: silence.
    assert_eq!(
        bl.process(Request::Entry { sequence: ENTRY_SEQ_CONFIRM, target: UNIT }, 1),
        None
    );
    // Proper two-step sequence.
    assert_eq!(
        bl.process(Request::Entry { sequence: ENTRY_SEQ_ARM, target: UNIT }, 2),
        None
    );
    assert_eq!(
        bl.process(Request::Entry { sequence: ENTRY_SEQ_CONFIRM, target: UNIT }, 3),
        Some(Reply::EntryAck { target: UNIT })
    );
    assert!(bl.host_claimed());
}

#[test]
fn exit_confirmed_only_outside_transactions() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    start_transaction(&mut bl);
    assert_eq!(bl.process(Request::Exit, 0), Some(Reply::ExitAck { confirmed: false }));
    assert!(bl.take_pending_reset().is_none());

    assert_eq!(command(&mut bl, ControlCommand::AbortTransaction), HandshakeResponse::Accepted);
    assert_eq!(bl.process(Request::Exit, 1), Some(Reply::ExitAck { confirmed: true }));
    assert_eq!(
        bl.take_pending_reset(),
        Some(ResetTarget::ApplicationSkipCanCheck)
    );
}

#[test]
fn beacon_reports_state_and_layout() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);
    assert_eq!(
        bl.beacon(),
        Reply::Beacon {
            status: BootloaderStatus::Ready,
            target: UNIT,
            flash_kib: 238,
            reason: EntryReason::HostRequest,
        }
    );
    start_transaction(&mut bl);
    assert!(matches!(
        bl.beacon(),
        Reply::Beacon {
            status: BootloaderStatus::Initialization,
            ..
        }
    ));
}

#[test]
fn idle_transaction_degrades_to_stalled() {
    let mut mem = storage();
    let mut bl = bootloader(&mut mem);

    // Ready never stalls.
    bl.on_tick(STALL_TIMEOUT_MS * 10);
    assert_eq!(bl.status(), BootloaderStatus::Ready);

    assert_eq!(
        bl.process(
            Request::Handshake {
                register: Register::TransactionMagic,
                value: MAGIC
            },
            1000
        ),
        Some(Reply::HandshakeAck {
            register: Register::TransactionMagic,
            response: HandshakeResponse::Accepted,
            value: MAGIC
        })
    );
    bl.on_tick(1000 + STALL_TIMEOUT_MS - 1);
    assert_eq!(bl.status(), BootloaderStatus::Initialization);
    bl.on_tick(1000 + STALL_TIMEOUT_MS);
    assert_eq!(bl.status(), BootloaderStatus::CommunicationStalled);

    // Terminal until reset: handshakes are refused, exit is allowed.
    assert_eq!(
        handshake(&mut bl, Register::TransactionMagic, 0x2222),
        HandshakeResponse::WrongState
    );
    assert_eq!(bl.process(Request::Exit, 99_999), Some(Reply::ExitAck { confirmed: true }));
}

// --- Reset coordination ---

struct FakeBackup(Rc<Cell<u16>>);

impl BackupDomain for FakeBackup {
    fn read(&self) -> u16 {
        self.0.get()
    }
    fn write(&mut self, value: u16) {
        self.0.set(value);
    }
}

struct PanicReset;

impl ResetControl for PanicReset {
    fn system_reset(&mut self) -> ! {
        panic!("system reset issued");
    }
}

#[test]
fn reset_to_application_writes_magic_before_resetting() {
    let backup = Rc::new(Cell::new(0xFFFF));
    let mut coordinator = ResetCoordinator::new(FakeBackup(backup.clone()), PanicReset);
    let result =
        std::panic::catch_unwind(AssertUnwindSafe(|| coordinator.reset_to_application()));
    // The reset "fired"; nothing after it executed.
    assert!(result.is_err());
    assert_eq!(backup.get(), 0xC0DE);
}

#[test]
fn reset_to_bootloader_writes_request_magic() {
    let backup = Rc::new(Cell::new(0x0000));
    let mut coordinator = ResetCoordinator::new(FakeBackup(backup.clone()), PanicReset);
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        coordinator.reset_to(ResetTarget::Bootloader)
    }));
    assert!(result.is_err());
    assert_eq!(backup.get(), 0xB007);
}

#[test]
fn boot_magic_is_consumed_on_read() {
    let backup = Rc::new(Cell::new(0xB007));
    let mut coordinator = ResetCoordinator::new(FakeBackup(backup.clone()), PanicReset);
    assert_eq!(coordinator.take_boot_magic(), 0xB007);
    // Cleared to the app-entry default so the reason is observed only once.
    assert_eq!(backup.get(), 0x0000);
    assert_eq!(coordinator.take_boot_magic(), 0x0000);
}
