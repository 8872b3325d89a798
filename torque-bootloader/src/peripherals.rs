// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Peripheral bring-up for the bootloader: clocks, CAN pins, SysTick
//! millisecond counter.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::exception;
use stm32f1xx_hal::{pac, prelude::*};

use crate::can::{Can1, CanTransport};

pub struct Board {
    pub transport: CanTransport,
}

static MILLIS: AtomicU32 = AtomicU32::new(0);

/// Milliseconds since boot, fed by the SysTick interrupt.
pub fn millis() -> u32 {
    MILLIS.load(Ordering::Relaxed)
}

#[exception]
fn SysTick() {
    MILLIS.fetch_add(1, Ordering::Relaxed);
}

pub fn init() -> Board {
    let dp = pac::Peripherals::take().expect("peripherals taken once");
    let cp = cortex_m::Peripherals::take().expect("core peripherals taken once");

    let mut flash = dp.FLASH.constrain();
    let rcc = dp.RCC.constrain();
    // CAN sits on APB1; keep it at the full 36 MHz for the bit timing below.
    let clocks = rcc
        .cfgr
        .use_hse(8.MHz())
        .sysclk(72.MHz())
        .pclk1(36.MHz())
        .freeze(&mut flash.acr);

    // CAN1 on the default mapping: PA11 RX, PA12 TX.
    let mut gpioa = dp.GPIOA.split();
    let _can_tx = gpioa.pa12.into_alternate_push_pull(&mut gpioa.crh);
    let _can_rx = gpioa.pa11.into_floating_input(&mut gpioa.crh);

    // 1 ms tick.
    let mut syst = cp.SYST;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(clocks.sysclk().raw() / 1000 - 1);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    let transport = CanTransport::new(unsafe { Can1::conjure() });

    Board { transport }
}
