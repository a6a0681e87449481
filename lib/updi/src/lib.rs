// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side programmer for AVR devices with a UPDI interface.
//!
//! UPDI is a single-wire, half-duplex debug and programming interface
//! that tunnels over a standard UART with local echo. This crate supplies
//! the whole stack above the serial port: the echo-stripping physical
//! layer ([`phy`]), the instruction codec and burst machinery ([`link`]),
//! the NVM controller driver ([`nvm`]), and the programming session
//! orchestrator ([`session`]) that runs a requested mix of actions
//! (read/write flash and fuses, erase, identify) against a device from
//! the built-in catalogue ([`device`]).
//!
//! The OS leaves -- the serial port and the millisecond clock -- enter as
//! capabilities ([`transport::Transport`], [`clock::Clock`]), so the core
//! is exercised end-to-end in tests against a scripted target.

pub mod clock;
pub mod device;
pub mod link;
pub mod log;
pub mod nvm;
pub mod phy;
pub mod protocol;
pub mod session;
pub mod transport;

pub use clock::{Clock, WallClock};
pub use device::{Device, DeviceTag};
pub use log::{Log, Quiet};
pub use session::{Action, ActionSet, DeviceInfo, Outcome, Request, Session};
pub use transport::{LineSettings, Transport};

/// Everything that can go wrong between "open the port" and "process
/// finished". One variant per failure kind; the payload is a short
/// context string where one helps.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open serial port: {0}")]
    TransportOpen(String),

    #[error("serial read timed out ({0})")]
    TransportTimeout(String),

    #[error("transmit echo not observed ({0})")]
    EchoMismatch(String),

    #[error("UPDI did not initialise, even after double-break recovery")]
    LinkInit,

    #[error("no ACK from target ({0})")]
    LinkNack(String),

    #[error("device is locked: {0}")]
    Locked(String),

    #[error("NVM controller reported a write error ({0})")]
    NvmError(String),

    #[error("NVM operation timed out ({0})")]
    NvmTimeout(String),

    #[error("bad HEX input: {0}")]
    HexFormat(#[from] intelhex::HexError),

    #[error(
        "flash verify failed: {mismatches} byte(s) differ, \
         first at address {first:#06x}"
    )]
    VerifyMismatch { mismatches: usize, first: u16 },

    #[error("bad configuration: {0}")]
    BadConfig(String),
}
