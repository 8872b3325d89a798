// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use torque_common::protocol::{
    BootloaderStatus, ControlCommand, HandshakeResponse, Register, Reply, Request, WritePayload,
    WriteStatus, ENTRY_SEQ_ARM, ENTRY_SEQ_CONFIRM,
};

use crate::transport::{CanLink, DEFAULT_TIMEOUT_MS};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);
/// A page erase busy-waits on the device; give it headroom.
const ERASE_TIMEOUT: Duration = Duration::from_secs(10);

/// One handshake exchange: send the register write, wait for its ack.
fn handshake(
    link: &mut CanLink,
    register: Register,
    value: u32,
    timeout: Duration,
) -> Result<(HandshakeResponse, u32)> {
    link.send_request(&Request::Handshake { register, value })?;
    let reply = link.wait_reply(timeout, |r| {
        matches!(r, Reply::HandshakeAck { register: ack_reg, .. } if *ack_reg == register)
    })?;
    match reply {
        Reply::HandshakeAck {
            response, value, ..
        } => Ok((response, value)),
        _ => unreachable!("wait_reply filtered for a handshake ack"),
    }
}

fn expect_accepted(
    link: &mut CanLink,
    register: Register,
    value: u32,
    what: &str,
) -> Result<u32> {
    let (response, ack_value) = handshake(link, register, value, TIMEOUT)?;
    if response != HandshakeResponse::Accepted {
        bail!("{what} rejected: {response:?}");
    }
    Ok(ack_value)
}

fn command(link: &mut CanLink, cmd: ControlCommand, what: &str) -> Result<()> {
    expect_accepted(link, Register::Command, cmd.to_wire(), what)?;
    Ok(())
}

fn read_register(link: &mut CanLink, register: Register, what: &str) -> Result<u32> {
    expect_accepted(link, register, 0, what)
}

/// Listen for the next beacon and report the bootloader's state.
pub fn status(link: &mut CanLink) -> Result<()> {
    println!("Listening for beacon...");
    let reply = link.wait_reply(Duration::from_secs(3), |r| matches!(r, Reply::Beacon { .. }))?;

    if let Reply::Beacon {
        status,
        target,
        flash_kib,
        reason,
    } = reply
    {
        println!("Bootloader Status:");
        println!("  Unit:         {}", target);
        println!("  State:        {:?}", status);
        println!("  Flash:        {} KiB available", flash_kib);
        println!("  Entry reason: {:?}", reason);
    }
    Ok(())
}

/// Claim the unit with the arm/confirm entry sequence.
pub fn enter(link: &mut CanLink, unit: u8) -> Result<()> {
    link.send_request(&Request::Entry {
        sequence: ENTRY_SEQ_ARM,
        target: unit,
    })?;
    link.send_request(&Request::Entry {
        sequence: ENTRY_SEQ_CONFIRM,
        target: unit,
    })?;
    link.wait_reply(TIMEOUT, |r| {
        matches!(r, Reply::EntryAck { target } if *target == unit)
    })
    .context("No entry acknowledgement; is the unit in bootloader mode?")?;
    println!("Unit {} claimed.", unit);
    Ok(())
}

/// Flash a firmware image through a complete transaction.
pub fn flash(link: &mut CanLink, file: &Path, unit: u8, version: u32) -> Result<()> {
    let firmware = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if firmware.len() < 8 {
        bail!("Image too small to hold a vector table");
    }
    let size = firmware.len() as u32;
    let crc = CRC32.checksum(&firmware);

    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        size,
        crc
    );
    println!("Target:   unit {}", unit);
    println!("Version:  {}", version);
    println!();

    enter(link, unit)?;

    // Make sure no other transaction is in flight.
    let beacon = link.wait_reply(Duration::from_secs(2), |r| matches!(r, Reply::Beacon { .. }))?;
    if let Reply::Beacon { status, .. } = beacon {
        if status != BootloaderStatus::Ready {
            bail!("Bootloader is not ready (state {:?})", status);
        }
    }

    // Session token from the clock; any nonzero 16-bit value works.
    let magic = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() % 0xFFFE + 1)
        .unwrap_or(0xABCD);
    expect_accepted(link, Register::TransactionMagic, magic, "Transaction magic")?;

    // Physical layout, straight from the device.
    command(link, ControlCommand::RequestBlockInfo, "Block info request")?;
    let page_size = read_register(link, Register::PhysicalBlockSize, "Page size read")?;
    let page_count = read_register(link, Register::PhysicalBlockCount, "Page count read")?;
    let start = read_register(link, Register::AvailableFlashStart, "Flash start read")?;
    if size > page_size * page_count {
        bail!(
            "Firmware ({} bytes) does not fit in available flash ({} bytes)",
            size,
            page_size * page_count
        );
    }

    // One logical block covering the whole image.
    command(link, ControlCommand::BeginMemoryMap, "Memory map start")?;
    expect_accepted(link, Register::LogicalBlockCount, 1, "Logical block count")?;
    expect_accepted(link, Register::LogicalBlockStart, start, "Logical block start")?;
    expect_accepted(
        link,
        Register::LogicalBlockSize,
        size.next_multiple_of(2),
        "Logical block size",
    )?;

    // Erase the pages the image will occupy.
    let pages = size.div_ceil(page_size);
    expect_accepted(link, Register::EraseCount, pages, "Erase count")?;

    let pb = ProgressBar::new(pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} erasing [{bar:40.cyan/blue}] {pos}/{len} pages")?
            .progress_chars("#>-"),
    );
    for i in 0..pages {
        let page = start + i * page_size;
        let (response, _) = handshake(link, Register::PhysicalBlockToErase, page, ERASE_TIMEOUT)?;
        if response != HandshakeResponse::Accepted {
            pb.abandon();
            bail!("Erase of page 0x{:08x} rejected: {:?}", page, response);
        }
        pb.set_position((i + 1) as u64);
    }
    pb.finish();

    command(link, ControlCommand::BeginDownload, "Download start")?;

    // Stream the image as word writes; the tail is padded with erased-state
    // bytes so it stays outside the checksummed size.
    let pb = ProgressBar::new(size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut offset = 0usize;
    while offset < firmware.len() {
        let remaining = firmware.len() - offset;
        let payload = if remaining >= 4 {
            WritePayload::Word(u32::from_le_bytes(
                firmware[offset..offset + 4].try_into().unwrap(),
            ))
        } else {
            let mut tail = [0xFFu8; 4];
            tail[..remaining].copy_from_slice(&firmware[offset..]);
            if remaining <= 2 {
                WritePayload::HalfWord(u16::from_le_bytes([tail[0], tail[1]]))
            } else {
                WritePayload::Word(u32::from_le_bytes(tail))
            }
        };
        let address = start + offset as u32;

        link.send_request(&Request::Data { address, payload })?;
        let reply = link.wait_reply(TIMEOUT, |r| {
            matches!(r, Reply::DataAck { address: a, .. } if *a == address)
        })?;
        if let Reply::DataAck { status, .. } = reply {
            if status != WriteStatus::Ok {
                pb.abandon();
                bail!("Write failed at 0x{:08x}: {:?}", address, status);
            }
        }

        offset += payload.len() as usize;
        pb.set_position(offset.min(firmware.len()) as u64);
    }
    pb.finish_with_message("Download complete");
    println!();

    command(link, ControlCommand::FinishDownload, "Download finish")?;

    // Metadata from the image: word 1 of the vector table is the reset
    // handler (entry point), and the table itself sits at the image base.
    let entry = u32::from_le_bytes(firmware[4..8].try_into().unwrap());
    if entry & 1 == 0 {
        bail!("Image reset vector 0x{:08x} is not a Thumb address", entry);
    }
    expect_accepted(link, Register::FirmwareSize, size, "Firmware size")?;
    expect_accepted(link, Register::EntryPoint, entry, "Entry point")?;
    expect_accepted(link, Register::InterruptVector, start, "Interrupt vector")?;
    expect_accepted(link, Register::FirmwareVersion, version, "Firmware version")?;
    expect_accepted(link, Register::FirmwareChecksum, crc, "Firmware checksum")?;

    print!("Committing... ");
    let (response, value) = handshake(
        link,
        Register::Command,
        ControlCommand::CommitFirmware.to_wire(),
        TIMEOUT,
    )?;
    match response {
        HandshakeResponse::Accepted => println!("OK"),
        HandshakeResponse::ChecksumMismatch => bail!(
            "Checksum mismatch: device computed 0x{:08x}, expected 0x{:08x}",
            value,
            crc
        ),
        other => bail!("Commit rejected: {:?}", other),
    }

    println!();
    println!("Firmware flashed successfully!");
    println!(
        "Use 'torque-upload --port {} exit' to start the application.",
        link.port_name()
    );
    Ok(())
}

/// Ask the bootloader to hand off to the application.
pub fn exit(link: &mut CanLink) -> Result<()> {
    link.send_request(&Request::Exit)?;
    let reply = link.wait_reply(TIMEOUT, |r| matches!(r, Reply::ExitAck { .. }))?;
    match reply {
        Reply::ExitAck { confirmed: true } => {
            println!("Exit confirmed; unit is resetting into the application.");
            Ok(())
        }
        _ => bail!("Exit refused (transaction still in progress?)"),
    }
}
