// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::transport::CanLink;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "torque-upload")]
#[command(about = "Firmware flashing tool for the torque CAN bootloader")]
pub struct Cli {
    /// Serial port of the SLCAN adapter (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: String,

    /// Target unit (ECU address on the bus)
    #[arg(short, long, default_value = "1")]
    pub unit: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Listen for the bootloader beacon and report its state
    Status,

    /// Request bootloader entry for the target unit
    Enter,

    /// Flash a firmware image through a full transaction
    Flash {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Firmware version number
        #[arg(short, long, default_value = "1")]
        version: u32,
    },

    /// Ask the bootloader to hand off to the application
    Exit,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut link = CanLink::open(&cli.port)?;

    match cli.command {
        Commands::Status => commands::status(&mut link),
        Commands::Enter => commands::enter(&mut link, cli.unit),
        Commands::Flash { file, version } => commands::flash(&mut link, &file, cli.unit, version),
        Commands::Exit => commands::exit(&mut link),
    }
}
