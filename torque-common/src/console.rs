// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Debug text console over CAN.
//!
//! Text is queued into a bounded byte buffer and drained as SerialOutput
//! frames of up to 8 bytes, rate-limited so debug chatter never starves the
//! protocol traffic. When the buffer is full the newest text is dropped;
//! losing debug output is acceptable, stalling the bootloader is not.

use heapless::Deque;

use crate::protocol::{Reply, SERIAL_OUTPUT_PERIOD_MS};
use crate::rate::RateLimiter;

const CONSOLE_CAPACITY: usize = 256;

pub struct Console {
    buf: Deque<u8, CONSOLE_CAPACITY>,
    limiter: RateLimiter,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            buf: Deque::new(),
            limiter: RateLimiter::new(SERIAL_OUTPUT_PERIOD_MS),
        }
    }

    /// Queue text for transmission. Excess bytes are dropped.
    pub fn write_str(&mut self, text: &str) {
        for &b in text.as_bytes() {
            if self.buf.push_back(b).is_err() {
                break;
            }
        }
    }

    /// Next frame to transmit, if text is pending and the rate limit allows.
    pub fn poll(&mut self, now_ms: u32) -> Option<Reply> {
        if self.buf.is_empty() || !self.limiter.ready(now_ms) {
            return None;
        }
        let mut text = heapless::Vec::new();
        while text.len() < 8 {
            match self.buf.pop_front() {
                // Cannot overflow: the loop stops at the frame capacity.
                Some(b) => {
                    let _ = text.push(b);
                }
                None => break,
            }
        }
        Some(Reply::SerialOutput { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(reply: Reply) -> heapless::Vec<u8, 8> {
        match reply {
            Reply::SerialOutput { text } => text,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn empty_console_emits_nothing() {
        let mut c = Console::new();
        assert_eq!(c.poll(0), None);
    }

    #[test]
    fn chunks_into_eight_byte_frames() {
        let mut c = Console::new();
        c.write_str("hello, bootloader");
        assert_eq!(&text_of(c.poll(0).unwrap())[..], b"hello, b");
        assert_eq!(&text_of(c.poll(40).unwrap())[..], b"ootloade");
        assert_eq!(&text_of(c.poll(80).unwrap())[..], b"r");
        assert_eq!(c.poll(120), None);
    }

    #[test]
    fn rate_limited_to_one_frame_per_period() {
        let mut c = Console::new();
        c.write_str("0123456789abcdef");
        assert!(c.poll(0).is_some());
        assert_eq!(c.poll(10), None);
        assert_eq!(c.poll(39), None);
        assert!(c.poll(40).is_some());
    }

    #[test]
    fn overflow_drops_newest_text() {
        let mut c = Console::new();
        for _ in 0..100 {
            c.write_str("xxxxxxxxxx");
        }
        // Buffer is bounded; drain it fully and observe no more than capacity.
        let mut total = 0;
        let mut now = 0;
        while let Some(r) = c.poll(now) {
            total += text_of(r).len();
            now += 40;
        }
        assert_eq!(total, CONSOLE_CAPACITY);
    }
}
