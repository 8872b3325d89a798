// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware flashing tool for the torque CAN bootloader.
//!
//! Talks to the bus through an SLCAN (serial-line CAN) adapter.
//!
//! Usage:
//!   torque-upload --port /dev/ttyACM0 status
//!   torque-upload --port /dev/ttyACM0 flash firmware.bin --unit 1 --version 2
//!   torque-upload --port /dev/ttyACM0 exit

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
