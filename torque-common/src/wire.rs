// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN frame codec.
//!
//! Classic CAN with 11-bit identifiers, one identifier per message type.
//! Multi-byte fields are little-endian. Data frames address flash by
//! half-word index (`address = index * 2`), so a misaligned data address is
//! unrepresentable on the wire; the access width is carried by the DLC
//! (6 bytes = half-word payload, 8 bytes = word payload).

use crate::protocol::{
    BootloaderStatus, HandshakeResponse, Register, Reply, Request, WritePayload, WriteStatus,
};
use crate::reset::EntryReason;

// Host -> ECU identifiers.
pub const ID_ENTRY_REQ: u16 = 0x7A0;
pub const ID_HANDSHAKE: u16 = 0x7A1;
pub const ID_DATA: u16 = 0x7A2;
pub const ID_EXIT_REQ: u16 = 0x7A3;

// ECU -> host identifiers.
pub const ID_ENTRY_ACK: u16 = 0x7A8;
pub const ID_HANDSHAKE_ACK: u16 = 0x7A9;
pub const ID_DATA_ACK: u16 = 0x7AA;
pub const ID_EXIT_ACK: u16 = 0x7AB;
pub const ID_BEACON: u16 = 0x7AC;
pub const ID_SOFTWARE_BUILD: u16 = 0x7AD;
pub const ID_SERIAL_OUTPUT: u16 = 0x7AE;

/// A classic CAN data frame, transport-neutral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: u16,
    pub dlc: u8,
    pub bytes: [u8; 8],
}

impl Frame {
    pub fn new(id: u16, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= 8);
        let mut bytes = [0u8; 8];
        bytes[..payload.len()].copy_from_slice(payload);
        Self {
            id,
            dlc: payload.len() as u8,
            bytes,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.dlc as usize]
    }
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub fn encode_request(req: &Request) -> Frame {
    match *req {
        Request::Entry { sequence, target } => Frame::new(ID_ENTRY_REQ, &[sequence, target]),
        Request::Handshake { register, value } => {
            let mut p = [0u8; 5];
            p[0] = register.to_wire();
            p[1..5].copy_from_slice(&value.to_le_bytes());
            Frame::new(ID_HANDSHAKE, &p)
        }
        Request::Data { address, payload } => {
            debug_assert!(address % 2 == 0);
            let index = address >> 1;
            match payload {
                WritePayload::HalfWord(v) => {
                    let mut p = [0u8; 6];
                    p[..4].copy_from_slice(&index.to_le_bytes());
                    p[4..6].copy_from_slice(&v.to_le_bytes());
                    Frame::new(ID_DATA, &p)
                }
                WritePayload::Word(v) => {
                    let mut p = [0u8; 8];
                    p[..4].copy_from_slice(&index.to_le_bytes());
                    p[4..8].copy_from_slice(&v.to_le_bytes());
                    Frame::new(ID_DATA, &p)
                }
            }
        }
        Request::Exit => Frame::new(ID_EXIT_REQ, &[]),
    }
}

pub fn decode_request(frame: &Frame) -> Option<Request> {
    let p = frame.payload();
    match frame.id {
        ID_ENTRY_REQ => {
            if p.len() != 2 {
                return None;
            }
            Some(Request::Entry {
                sequence: p[0],
                target: p[1],
            })
        }
        ID_HANDSHAKE => {
            if p.len() != 5 {
                return None;
            }
            Some(Request::Handshake {
                register: Register::from_wire(p[0])?,
                value: u32_le(&p[1..5]),
            })
        }
        ID_DATA => {
            let index = if p.len() >= 4 { u32_le(&p[..4]) } else { return None };
            // Indices with the top bit set would wrap the address space.
            if index & 0x8000_0000 != 0 {
                return None;
            }
            let address = index << 1;
            let payload = match p.len() {
                6 => WritePayload::HalfWord(u16::from_le_bytes([p[4], p[5]])),
                8 => WritePayload::Word(u32_le(&p[4..8])),
                _ => return None,
            };
            Some(Request::Data { address, payload })
        }
        ID_EXIT_REQ => {
            if !p.is_empty() {
                return None;
            }
            Some(Request::Exit)
        }
        _ => None,
    }
}

pub fn encode_reply(reply: &Reply) -> Frame {
    match reply {
        Reply::EntryAck { target } => Frame::new(ID_ENTRY_ACK, &[*target]),
        Reply::HandshakeAck {
            register,
            response,
            value,
        } => {
            let mut p = [0u8; 6];
            p[0] = register.to_wire();
            p[1] = response.to_wire();
            p[2..6].copy_from_slice(&value.to_le_bytes());
            Frame::new(ID_HANDSHAKE_ACK, &p)
        }
        Reply::DataAck { address, status } => {
            let mut p = [0u8; 5];
            p[..4].copy_from_slice(&(address >> 1).to_le_bytes());
            p[4] = status.to_wire();
            Frame::new(ID_DATA_ACK, &p)
        }
        Reply::ExitAck { confirmed } => Frame::new(ID_EXIT_ACK, &[*confirmed as u8]),
        Reply::Beacon {
            status,
            target,
            flash_kib,
            reason,
        } => {
            let kib = flash_kib.to_le_bytes();
            Frame::new(
                ID_BEACON,
                &[status.to_wire(), *target, kib[0], kib[1], reason.to_wire()],
            )
        }
        Reply::SoftwareBuild { commit, dirty } => {
            let mut p = [0u8; 8];
            p[..7].copy_from_slice(commit);
            p[7] = *dirty as u8;
            Frame::new(ID_SOFTWARE_BUILD, &p)
        }
        Reply::SerialOutput { text } => Frame::new(ID_SERIAL_OUTPUT, text),
    }
}

pub fn decode_reply(frame: &Frame) -> Option<Reply> {
    let p = frame.payload();
    match frame.id {
        ID_ENTRY_ACK => {
            if p.len() != 1 {
                return None;
            }
            Some(Reply::EntryAck { target: p[0] })
        }
        ID_HANDSHAKE_ACK => {
            if p.len() != 6 {
                return None;
            }
            Some(Reply::HandshakeAck {
                register: Register::from_wire(p[0])?,
                response: HandshakeResponse::from_wire(p[1])?,
                value: u32_le(&p[2..6]),
            })
        }
        ID_DATA_ACK => {
            if p.len() != 5 {
                return None;
            }
            Some(Reply::DataAck {
                address: u32_le(&p[..4]) << 1,
                status: WriteStatus::from_wire(p[4])?,
            })
        }
        ID_EXIT_ACK => {
            if p.len() != 1 {
                return None;
            }
            Some(Reply::ExitAck { confirmed: p[0] != 0 })
        }
        ID_BEACON => {
            if p.len() != 5 {
                return None;
            }
            Some(Reply::Beacon {
                status: BootloaderStatus::from_wire(p[0])?,
                target: p[1],
                flash_kib: u16::from_le_bytes([p[2], p[3]]),
                reason: EntryReason::from_wire(p[4])?,
            })
        }
        ID_SOFTWARE_BUILD => {
            if p.len() != 8 {
                return None;
            }
            let mut commit = [0u8; 7];
            commit.copy_from_slice(&p[..7]);
            Some(Reply::SoftwareBuild {
                commit,
                dirty: p[7] != 0,
            })
        }
        ID_SERIAL_OUTPUT => {
            let mut text = heapless::Vec::new();
            text.extend_from_slice(p).ok()?;
            Some(Reply::SerialOutput { text })
        }
        _ => None,
    }
}
