// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The serial transport capability consumed by the PHY.
//!
//! UPDI rides on an ordinary asynchronous serial link wired half-duplex:
//! the host's TX is looped onto its own RX, so every transmitted byte
//! reappears in the receive stream before any reply from the target. The
//! core never touches an OS serial API directly; it talks to whatever
//! implements [`Transport`]. The host tool provides one backed by a real
//! port, the tests provide one backed by a scripted target.

use crate::Error;

/// UART parity setting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parity {
    None,
    Even,
}

/// UART stop-bit setting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopBits {
    One,
    Two,
}

/// Line parameters for one (re)configuration of the port. Data bits are
/// always eight.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineSettings {
    pub baud: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineSettings {
    /// Normal UPDI operation: even parity, two stop bits, at the caller's
    /// chosen baud rate.
    pub fn updi(baud: u32) -> Self {
        Self {
            baud,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
        }
    }

    /// Double-break mode. A 0x00 character at 300 baud 8N1 holds the line
    /// low for roughly 30 ms, long enough to register as a BREAK even on a
    /// target whose UPDI clock is stopped or whose disable bit is set.
    pub const DOUBLE_BREAK: Self = Self {
        baud: 300,
        parity: Parity::None,
        stop_bits: StopBits::One,
    };
}

/// One serial port, opened lazily by `configure` and owned for the life of
/// the value.
pub trait Transport {
    /// (Re)opens the port with the given line settings, closing any
    /// previous configuration first. Fails with [`Error::TransportOpen`].
    fn configure(&mut self, settings: &LineSettings) -> Result<(), Error>;

    /// Blocks until all of `data` is queued for transmission.
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Reads exactly `buf.len()` bytes or fails with
    /// [`Error::TransportTimeout`]. Implementations are expected to budget
    /// 50 ms plus 10 ms per requested byte.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Error>;

    /// Closes the port. Idempotent; also expected from `Drop`.
    fn close(&mut self);
}
