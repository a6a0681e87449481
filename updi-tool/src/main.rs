// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line UPDI programmer.
//!
//! Drives the `updi` crate against a real serial port: pick a device and
//! a mix of actions, and the session does the rest. Actions combine
//! freely in one invocation and always run in the library's fixed order,
//! e.g. fuses are read before an erase changes them.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use updi::{Action, ActionSet, DeviceTag, Outcome, Request, Session, WallClock};

mod report;
mod serial;

#[derive(Debug, Parser)]
#[clap(
    name = "updi-tool",
    max_term_width = 80,
    about = "program UPDI-connected AVR devices over a serial adapter"
)]
struct Args {
    /// Serial port name (e.g. /dev/ttyUSB0 or COM5); a bare number is
    /// expanded to the platform's usual adapter name.
    #[clap(short, long)]
    port: String,

    /// Baud rate for the UPDI link.
    #[clap(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Target device, e.g. attiny817 or atmega4809.
    #[clap(short, long)]
    device: String,

    /// Read the System Information Block and device identity.
    #[clap(long)]
    info: bool,

    /// Read all fuses and print them as INDEX:VALUE lines.
    #[clap(long)]
    read_fuses: bool,

    /// Write one fuse, given as INDEX=VALUE (repeatable).
    #[clap(long, value_name = "INDEX=VALUE")]
    write_fuse: Vec<String>,

    /// Read the entire flash.
    #[clap(long)]
    read_flash: bool,

    /// Save the image read by --read-flash to this file instead of
    /// printing a summary.
    #[clap(long, value_name = "FILE", requires = "read_flash")]
    out: Option<PathBuf>,

    /// Erase the chip.
    #[clap(long)]
    erase: bool,

    /// Write flash from an Intel HEX file.
    #[clap(long, value_name = "FILE")]
    write_flash: Option<PathBuf>,

    /// Read back and compare after --write-flash.
    #[clap(long, requires = "write_flash")]
    verify: bool,

    /// Write the user row from hex bytes, e.g. "de ad be ef".
    #[clap(long, value_name = "BYTES")]
    write_userrow: Option<String>,

    /// Chatty link-level output.
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let tag: DeviceTag = args.device.parse().with_context(|| {
        let names: Vec<_> =
            DeviceTag::ALL.iter().map(|t| t.name()).collect();
        format!("supported devices: {}", names.join(", "))
    })?;

    let request = build_request(&args)?;

    let port = serial::SerialTransport::new(&port_name(&args.port));
    let log = report::Stderr::new(args.verbose);
    let session = Session::new(port, args.baud, tag, WallClock::new(), log)
        .context("could not open the serial port")?;

    let start = Instant::now();
    let outcome = session.process(&request)?;
    eprintln!("elapsed: {} ms", start.elapsed().as_millis());

    print_outcome(&args, &outcome)
}

fn build_request(args: &Args) -> Result<Request> {
    let mut actions = ActionSet::EMPTY;
    if args.info {
        actions.insert(Action::GetInfo);
    }
    if args.read_fuses {
        actions.insert(Action::ReadFuses);
    }
    if !args.write_fuse.is_empty() {
        actions.insert(Action::WriteFuses);
    }
    if args.read_flash {
        actions.insert(Action::ReadFlash);
    }
    if args.erase {
        actions.insert(Action::Erase);
    }
    if args.write_flash.is_some() {
        actions.insert(Action::WriteFlash);
    }
    if args.verify {
        actions.insert(Action::VerifyFlash);
    }
    if args.write_userrow.is_some() {
        actions.insert(Action::WriteUserrow);
    }

    let fuse_writes = args
        .write_fuse
        .iter()
        .map(|spec| parse_fuse(spec))
        .collect::<Result<Vec<_>>>()?;

    let userrow = args
        .write_userrow
        .as_deref()
        .map(parse_bytes)
        .transpose()?;

    Ok(Request {
        actions,
        hex_path: args.write_flash.clone(),
        fuse_writes,
        userrow,
    })
}

/// Parses "INDEX=VALUE"; both sides take decimal or 0x-prefixed hex.
fn parse_fuse(spec: &str) -> Result<(u8, u8)> {
    let (index, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("expected INDEX=VALUE, got {spec:?}"))?;
    Ok((parse_u8(index.trim())?, parse_u8(value.trim())?))
}

fn parse_u8(s: &str) -> Result<u8> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid byte value {s:?}"))
}

/// Parses whitespace-separated hex bytes ("de ad be ef").
fn parse_bytes(s: &str) -> Result<Vec<u8>> {
    s.split_whitespace()
        .map(|b| {
            u8::from_str_radix(b, 16)
                .with_context(|| format!("invalid hex byte {b:?}"))
        })
        .collect()
}

fn port_name(arg: &str) -> String {
    if !arg.chars().all(|c| c.is_ascii_digit()) {
        return arg.to_string();
    }
    if cfg!(windows) {
        format!("COM{arg}")
    } else {
        format!("/dev/ttyUSB{arg}")
    }
}

fn print_outcome(args: &Args, outcome: &Outcome) -> Result<()> {
    if args.info {
        let info = &outcome.info;
        println!("family:       {}", info.family);
        println!("NVM version:  {}", info.nvm_version);
        println!("OCD version:  {}", info.ocd_version);
        println!("DBG OSC freq: {:#04x}", info.dbg_osc_freq);
        println!("PDI rev:      {}", info.pdi_rev);
        println!(
            "device ID:    {:02x} {:02x} {:02x}",
            info.dev_id[0], info.dev_id[1], info.dev_id[2]
        );
        if let Some(rev) = info.dev_rev {
            println!("device rev:   {rev}");
        }
    }

    if args.read_fuses {
        println!("fuses:");
        for (i, value) in outcome.fuses.iter().enumerate() {
            println!("  {i}:{value:#04x}");
        }
    }

    if args.read_flash {
        match &args.out {
            Some(path) => {
                std::fs::write(path, &outcome.flash).with_context(
                    || format!("could not write {}", path.display()),
                )?;
                println!(
                    "wrote {} bytes to {}",
                    outcome.flash.len(),
                    path.display()
                );
            }
            None => {
                let programmed = outcome
                    .flash
                    .iter()
                    .filter(|&&b| b != 0xFF)
                    .count();
                println!(
                    "read {} bytes of flash ({programmed} not erased); \
                     use --out to save them",
                    outcome.flash.len()
                );
            }
        }
    }

    Ok(())
}
