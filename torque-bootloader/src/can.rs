// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! bxCAN transport adapter.
//!
//! Reception runs in the FIFO0 interrupt and only enqueues raw frames into a
//! fixed-size SPSC queue (single producer = ISR, single consumer = main
//! loop); all protocol work happens on the main loop. Transmission blocks,
//! with a bounded retry, on mailbox availability: a dropped acknowledgement
//! desynchronizes the host's transaction view, so backpressure is preferred
//! over silent loss.

use bxcan::filter::Mask32;
use bxcan::{Can, Fifo, Frame as BxFrame, Interrupts, StandardId};
use heapless::spsc::{Consumer, Producer, Queue};
use stm32f1xx_hal::pac::interrupt;
use torque_common::poll::Poller;
use torque_common::protocol::{Reply, Request};
use torque_common::wire;

/// BTR for 500 kbit/s at a 36 MHz APB1 clock: prescaler 4, TS1 15, TS2 2.
const BTR_500K: u32 = 0x001E_0003;

/// Spin budget for one blocking send. Three mailboxes drain in well under a
/// millisecond at 500 kbit/s.
const TX_RETRY_SPINS: u32 = 2_000_000;

const RX_QUEUE_CAP: usize = 32;

const CAN1_BASE: u32 = 0x4000_6400;

const RCC_APB1ENR: *mut u32 = 0x4002_101C as *mut u32;
const APB1ENR_CAN1EN: u32 = 1 << 25;

/// The CAN1 register block. Constructed once by `peripherals::init` after
/// the peripheral clock is enabled.
pub struct Can1 {
    _priv: (),
}

impl Can1 {
    pub(crate) unsafe fn conjure() -> Self {
        let enr = RCC_APB1ENR.read_volatile();
        RCC_APB1ENR.write_volatile(enr | APB1ENR_CAN1EN);
        Self { _priv: () }
    }
}

unsafe impl bxcan::Instance for Can1 {
    const REGISTERS: *mut bxcan::RegisterBlock = CAN1_BASE as *mut _;
}

// Connectivity-line parts share 28 filter banks between CAN1 and CAN2; the
// bootloader only uses CAN1.
unsafe impl bxcan::FilterOwner for Can1 {
    const NUM_FILTER_BANKS: u8 = 28;
}

static mut RX_QUEUE: Queue<wire::Frame, RX_QUEUE_CAP> = Queue::new();
static mut RX_PRODUCER: Option<Producer<'static, wire::Frame, RX_QUEUE_CAP>> = None;
static mut CAN_RX0: Option<bxcan::Rx0<Can1>> = None;

pub struct CanTransport {
    tx: bxcan::Tx<Can1>,
    rx: Consumer<'static, wire::Frame, RX_QUEUE_CAP>,
    poller: Poller,
}

impl CanTransport {
    /// Bring up the peripheral, install the RX interrupt path and return the
    /// main-loop handle.
    pub fn new(can1: Can1) -> Self {
        let mut can = Can::builder(can1)
            .set_bit_timing(BTR_500K)
            .set_automatic_retransmit(true)
            .enable();

        can.modify_filters()
            .enable_bank(0, Fifo::Fifo0, Mask32::accept_all());
        can.enable_interrupts(Interrupts::FIFO0_MESSAGE_PENDING);

        let (tx, rx0, _rx1) = can.split();

        let (producer, rx) = unsafe { (*core::ptr::addr_of_mut!(RX_QUEUE)).split() };
        unsafe {
            RX_PRODUCER = Some(producer);
            CAN_RX0 = Some(rx0);
            cortex_m::peripheral::NVIC::unmask(stm32f1xx_hal::pac::Interrupt::CAN1_RX0);
        }

        Self {
            tx,
            rx,
            poller: Poller::new(TX_RETRY_SPINS),
        }
    }

    /// Next decoded request from the ISR-fed queue. Frames that do not
    /// decode (foreign traffic passing the filter) are discarded.
    pub fn try_receive(&mut self) -> Option<Request> {
        while let Some(frame) = self.rx.dequeue() {
            if let Some(req) = wire::decode_request(&frame) {
                return Some(req);
            }
        }
        None
    }

    /// Send a reply, retrying while all TX mailboxes are full. Returns false
    /// if the mailboxes never freed within the spin budget (bus-off or
    /// unplugged bus); the caller keeps running rather than wedging.
    pub fn send_blocking(&mut self, reply: &Reply) -> bool {
        let frame = to_bx(&wire::encode_reply(reply));
        self.poller
            .wait(|| match self.tx.transmit(&frame) {
                // A higher-priority ack may displace a pending beacon frame;
                // beacons are periodic, the next one replaces it.
                Ok(_status) => true,
                Err(nb::Error::WouldBlock) => false,
                Err(nb::Error::Other(infallible)) => match infallible {},
            })
            .is_ok()
    }
}

fn to_bx(frame: &wire::Frame) -> BxFrame {
    let id = StandardId::new(frame.id).expect("protocol ids are 11-bit");
    let data = bxcan::Data::new(frame.payload()).expect("payload fits a classic frame");
    BxFrame::new_data(id, data)
}

fn from_bx(frame: &BxFrame) -> Option<wire::Frame> {
    let bxcan::Id::Standard(id) = frame.id() else {
        return None;
    };
    let data = frame.data()?;
    Some(wire::Frame::new(id.as_raw(), data))
}

#[interrupt]
fn CAN1_RX0() {
    // SPSC producer side: this handler only drains FIFO0 into the queue.
    unsafe {
        let rx = (*core::ptr::addr_of_mut!(CAN_RX0)).as_mut();
        let producer = (*core::ptr::addr_of_mut!(RX_PRODUCER)).as_mut();
        if let (Some(rx), Some(producer)) = (rx, producer) {
            while let Ok(frame) = rx.receive() {
                if let Some(decoded) = from_bx(&frame) {
                    // Queue full: drop the frame; the host retries on a
                    // missing ack.
                    let _ = producer.enqueue(decoded);
                }
            }
        }
    }
}
