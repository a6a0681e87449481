// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real serial port behind the session's transport capability.

use std::io::{Read, Write};
use std::time::Duration;

use updi::transport::{LineSettings, Parity, StopBits, Transport};
use updi::Error;

/// Fixed portion of the read budget, plus a per-byte allowance; matches
/// the byte pacing of a slow USB-serial adapter with margin.
const READ_TIMEOUT_BASE_MS: u64 = 50;
const READ_TIMEOUT_PER_BYTE_MS: u64 = 10;

pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Remembers the port name; the port itself opens on the first
    /// `configure` call.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            port: None,
        }
    }
}

impl Transport for SerialTransport {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), Error> {
        // Close any previous incarnation before reopening; some drivers
        // refuse a second open of the same device node.
        self.port = None;

        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let port = serialport::new(&self.name, settings.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(READ_TIMEOUT_BASE_MS))
            .open()
            .map_err(|e| {
                Error::TransportOpen(format!("{}: {e}", self.name))
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let port = self.port.as_mut().ok_or_else(|| {
            Error::TransportOpen("port not configured".to_string())
        })?;
        port.write_all(data).and_then(|()| port.flush()).map_err(
            |e| Error::TransportTimeout(format!("write: {e}")),
        )
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let port = self.port.as_mut().ok_or_else(|| {
            Error::TransportOpen("port not configured".to_string())
        })?;

        let budget = Duration::from_millis(
            READ_TIMEOUT_BASE_MS
                + READ_TIMEOUT_PER_BYTE_MS * buf.len() as u64,
        );
        port.set_timeout(budget).map_err(|e| {
            Error::TransportTimeout(format!("set timeout: {e}"))
        })?;

        port.read_exact(buf).map_err(|e| {
            Error::TransportTimeout(format!(
                "wanted {} byte(s): {e}",
                buf.len()
            ))
        })
    }

    fn close(&mut self) {
        self.port = None;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
