// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SLCAN (serial-line CAN) transport for bootloader communication.
//!
//! Standard-frame traffic only: `t<id:3><dlc:1><data…>\r` in both
//! directions, with the channel opened at 500 kbit/s (`S6`).

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serialport::SerialPort;

use torque_common::protocol::{Reply, Request};
use torque_common::wire::{self, Frame};

/// Default timeout for one reply in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

pub struct CanLink {
    port: Box<dyn SerialPort>,
    line: Vec<u8>,
}

impl CanLink {
    /// Open the adapter and the CAN channel at 500 kbit/s.
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, 115_200)
            .timeout(Duration::from_millis(50))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        let mut link = Self {
            port,
            line: Vec::with_capacity(64),
        };

        // Close (ignore the NAK if it already was), set bitrate, open.
        let _ = link.command("C");
        link.command("S6")?;
        link.command("O")?;
        link.drain();
        Ok(link)
    }

    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    fn command(&mut self, cmd: &str) -> Result<()> {
        self.port
            .write_all(cmd.as_bytes())
            .and_then(|()| self.port.write_all(b"\r"))
            .with_context(|| format!("SLCAN command {cmd:?} failed"))?;
        self.port.flush()?;
        Ok(())
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 64];
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        self.line.clear();
    }

    /// Transmit one frame.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut out = format!("t{:03X}{:X}", frame.id, frame.dlc);
        for byte in frame.payload() {
            out.push_str(&format!("{byte:02X}"));
        }
        out.push('\r');
        self.port
            .write_all(out.as_bytes())
            .context("Failed to write frame to adapter")?;
        self.port.flush()?;
        Ok(())
    }

    pub fn send_request(&mut self, req: &Request) -> Result<()> {
        self.send_frame(&wire::encode_request(req))
    }

    /// Receive the next frame, waiting up to `timeout`.
    pub fn recv_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\r' {
                        let frame = parse_slcan(&self.line);
                        self.line.clear();
                        if let Some(frame) = frame {
                            return Ok(frame);
                        }
                        // Command echoes and status lines are skipped.
                    } else if byte[0] != 0x07 {
                        // BEL is the adapter's NAK; everything else is line
                        // content.
                        self.line.push(byte[0]);
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => bail!("Serial read error: {e}"),
            }
            if Instant::now() >= deadline {
                bail!("Timeout waiting for CAN traffic");
            }
        }
    }

    /// Wait for a decoded reply matching `accept`, skipping beacons, debug
    /// output and unrelated traffic.
    pub fn wait_reply(
        &mut self,
        timeout: Duration,
        mut accept: impl FnMut(&Reply) -> bool,
    ) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_default();
            if remaining.is_zero() {
                bail!("Timeout waiting for bootloader reply");
            }
            let frame = self.recv_frame(remaining)?;
            if let Some(reply) = wire::decode_reply(&frame) {
                if accept(&reply) {
                    return Ok(reply);
                }
            }
        }
    }
}

/// Parse one SLCAN line (without the trailing CR). Only standard data
/// frames are of interest.
fn parse_slcan(line: &[u8]) -> Option<Frame> {
    let s = std::str::from_utf8(line).ok()?;
    let s = s.strip_prefix('t')?;
    if s.len() < 4 {
        return None;
    }
    let id = u16::from_str_radix(&s[..3], 16).ok()?;
    let dlc = usize::from_str_radix(&s[3..4], 16).ok()?;
    if dlc > 8 || s.len() != 4 + dlc * 2 {
        return None;
    }
    let mut bytes = [0u8; 8];
    for (i, chunk) in s[4..].as_bytes().chunks(2).enumerate() {
        bytes[i] = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
    }
    Some(Frame {
        id,
        dlc: dlc as u8,
        bytes,
    })
}
