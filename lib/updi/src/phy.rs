// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical layer: echo discipline and BREAK signalling.
//!
//! The wire is half-duplex with local echo, so every transmitted byte
//! comes straight back on the receive side ahead of any reply from the
//! target. This is the one place that knows about it: [`Phy::send`] and
//! [`Phy::send_receive`] drain the echo so the link layer above can
//! pretend it has a clean request/response channel.

use crate::protocol::BREAK;
use crate::transport::{LineSettings, Transport};
use crate::Error;

pub struct Phy<T> {
    port: T,
    settings: LineSettings,
}

impl<T: Transport> Phy<T> {
    /// Takes ownership of `port` and configures it for normal UPDI
    /// operation at `baud`.
    pub fn new(mut port: T, baud: u32) -> Result<Self, Error> {
        let settings = LineSettings::updi(baud);
        port.configure(&settings)?;
        Ok(Self { port, settings })
    }

    /// Transmits a frame that expects no reply, consuming its echo. A
    /// short echo read means the loopback is broken (wrong wiring, or a
    /// target holding the line) and fails as such.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.port.send(frame)?;

        let mut echo = vec![0; frame.len()];
        self.port.recv_exact(&mut echo).map_err(|e| match e {
            Error::TransportTimeout(_) => Error::EchoMismatch(format!(
                "sent {} byte(s), echo came up short",
                frame.len()
            )),
            other => other,
        })?;
        // The byte values are not compared; the wire is assumed faithful.
        Ok(())
    }

    /// Transmits a frame and reads `reply.len()` response bytes. The echo
    /// and the reply arrive as one contiguous stream, so they are read
    /// together and the echo prefix discarded.
    pub fn send_receive(
        &mut self,
        frame: &[u8],
        reply: &mut [u8],
    ) -> Result<(), Error> {
        self.port.send(frame)?;

        let mut buf = vec![0; frame.len() + reply.len()];
        self.port.recv_exact(&mut buf)?;
        reply.copy_from_slice(&buf[frame.len()..]);
        Ok(())
    }

    /// Sends a single BREAK character at the current line settings.
    pub fn send_break(&mut self) -> Result<(), Error> {
        self.send(&[BREAK])
    }

    /// Reopens the port at 300 baud 8N1, sends two BREAK characters
    /// (discarding their echoes), and restores the normal settings. Each
    /// low-baud 0x00 holds the line low long enough to reset a target
    /// whose UPDI peripheral has stopped listening.
    pub fn double_break(&mut self) -> Result<(), Error> {
        self.port.configure(&LineSettings::DOUBLE_BREAK)?;
        self.send(&[BREAK, BREAK])?;
        self.port.configure(&self.settings)
    }

    pub fn close(&mut self) {
        self.port.close();
    }
}
