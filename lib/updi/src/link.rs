// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UPDI link layer: instruction encode/decode over the PHY.
//!
//! Each instruction is a sync byte followed by an opcode and operands;
//! addressed stores are acknowledged field by field with [`ACK`]. Two
//! stateful wrinkles live here and nowhere else:
//!
//! * the device-side address pointer, written with `ST_PTR` and advanced
//!   by the `*_ptr_inc*` accesses -- it is never cached on the host, every
//!   block operation re-issues `ST_PTR`;
//! * the one-shot REPEAT count, which primes exactly the next indirect
//!   access to run N times. Nothing else may be issued in between.
//!
//! Bulk word stores additionally disable the target's response signatures
//! for the duration of the burst (the RSD bit), because waiting out an
//! ACK per word would dominate programming time.

use crate::phy::Phy;
use crate::protocol::*;
use crate::transport::Transport;
use crate::{Error, Log};

pub struct Link<T> {
    phy: Phy<T>,
}

impl<T: Transport> Link<T> {
    pub fn new(phy: Phy<T>) -> Self {
        Self { phy }
    }

    /// Brings the link up: BREAK, inhibit the collision detector, set the
    /// inter-byte delay, and confirm the peripheral answers. If the first
    /// attempt fails the port is dropped to 300 baud for a double BREAK
    /// and the sequence is retried once; a second failure is fatal.
    pub fn handshake(&mut self, log: &dyn Log) -> Result<(), Error> {
        self.phy.send_break()?;
        self.init()?;
        if self.check()? {
            return Ok(());
        }

        log.verbose("UPDI not answering, sending double break");
        self.phy.double_break()?;
        self.init()?;
        if self.check()? {
            return Ok(());
        }

        Err(Error::LinkInit)
    }

    /// Disables contention detection and sets the guard-time/inter-byte
    /// delay, the two CTRL writes every session starts with.
    fn init(&mut self) -> Result<(), Error> {
        self.stcs(CsReg::CtrlB, CTRLB_CCDETDIS)?;
        self.stcs(CsReg::CtrlA, CTRLA_IBDLY)
    }

    /// A live UPDI peripheral reports a nonzero STATUSA (the revision
    /// field occupies the high nibble).
    fn check(&mut self) -> Result<bool, Error> {
        Ok(self.ldcs(CsReg::StatusA)? != 0)
    }

    /// Loads one CS/ASI register.
    pub fn ldcs(&mut self, reg: CsReg) -> Result<u8, Error> {
        let frame = [SYNC, OP_LDCS | (reg as u8 & 0x0F)];
        let mut reply = [0];
        self.phy.send_receive(&frame, &mut reply)?;
        Ok(reply[0])
    }

    /// Stores one CS/ASI register. No response is defined for STCS; the
    /// frame still goes through `send` so the echo gets drained.
    pub fn stcs(&mut self, reg: CsReg, value: u8) -> Result<(), Error> {
        let frame = [SYNC, OP_STCS | (reg as u8 & 0x0F), value];
        self.phy.send(&frame)
    }

    /// Loads one byte from a 16-bit data-space address.
    pub fn ld(&mut self, address: u16) -> Result<u8, Error> {
        let [lo, hi] = address.to_le_bytes();
        let frame = [SYNC, OP_LDS | ADDRESS_16 | DATA_8, lo, hi];
        let mut reply = [0];
        self.phy.send_receive(&frame, &mut reply)?;
        Ok(reply[0])
    }

    /// Stores one byte to a 16-bit data-space address. The address phase
    /// and the data phase are each acknowledged.
    pub fn st(&mut self, address: u16, value: u8) -> Result<(), Error> {
        let [lo, hi] = address.to_le_bytes();
        let frame = [SYNC, OP_STS | ADDRESS_16 | DATA_8, lo, hi];
        self.expect_ack(&frame, "ST address")?;
        self.expect_ack(&[value], "ST data")
    }

    /// Stores one little-endian word to a 16-bit data-space address.
    pub fn st16(&mut self, address: u16, value: u16) -> Result<(), Error> {
        let [lo, hi] = address.to_le_bytes();
        let frame = [SYNC, OP_STS | ADDRESS_16 | DATA_16, lo, hi];
        self.expect_ack(&frame, "ST16 address")?;
        let [dlo, dhi] = value.to_le_bytes();
        self.expect_ack(&[dlo, dhi], "ST16 data")
    }

    /// Sets the device-side address pointer.
    pub fn st_ptr(&mut self, address: u16) -> Result<(), Error> {
        let [lo, hi] = address.to_le_bytes();
        let frame = [SYNC, OP_ST | PTR_ADDRESS | DATA_16, lo, hi];
        self.expect_ack(&frame, "ST_PTR")
    }

    /// Primes the next indirect access to execute `count` times. The
    /// count goes on the wire as N - 1; `count` must be in 1..=256.
    pub fn repeat(&mut self, count: usize) -> Result<(), Error> {
        debug_assert!(count >= 1 && count <= MAX_REPEAT);
        let [lo, hi] = ((count - 1) as u16).to_le_bytes();
        let frame = [SYNC, OP_REPEAT | REPEAT_WORD, lo, hi];
        self.phy.send(&frame)
    }

    /// Reads `buf.len()` bytes from the pointer location with
    /// post-increment. With a REPEAT primed, the whole run arrives as one
    /// continuous reply to this single frame.
    pub fn ld_ptr_inc(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let frame = [SYNC, OP_LD | PTR_INC | DATA_8];
        self.phy.send_receive(&frame, buf)
    }

    /// Word flavour of [`Self::ld_ptr_inc`]; `buf.len()` must be even.
    pub fn ld_ptr_inc16(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        debug_assert!(buf.len() % 2 == 0);
        let frame = [SYNC, OP_LD | PTR_INC | DATA_16];
        self.phy.send_receive(&frame, buf)
    }

    /// Stores bytes at the pointer location with post-increment, one ACK
    /// per byte. The first byte rides in the instruction frame, the rest
    /// follow as bare payload continuations.
    pub fn st_ptr_inc(&mut self, data: &[u8]) -> Result<(), Error> {
        let frame = [SYNC, OP_ST | PTR_INC | DATA_8, data[0]];
        self.expect_ack(&frame, "ST_PTR_INC")?;
        for &byte in &data[1..] {
            self.expect_ack(&[byte], "ST_PTR_INC")?;
        }
        Ok(())
    }

    /// Stores words at the pointer location with post-increment, as one
    /// unacknowledged burst: response signatures are disabled around the
    /// transfer and restored immediately after. This is the only store
    /// path that suppresses ACKs, and the only one fast enough for page
    /// programming.
    pub fn st_ptr_inc16(&mut self, data: &[u8]) -> Result<(), Error> {
        debug_assert!(data.len() % 2 == 0);

        self.stcs(CsReg::CtrlA, CTRLA_IBDLY | CTRLA_RSD)?;

        let frame = [SYNC, OP_ST | PTR_INC | DATA_16];
        self.phy.send(&frame)?;
        self.phy.send(data)?;

        self.stcs(CsReg::CtrlA, CTRLA_IBDLY)
    }

    /// Inserts an 8-byte activation key. Keys go out byte-reversed and
    /// draw no response; acceptance shows up in ASI_KEY_STATUS.
    pub fn key(&mut self, key: &[u8; 8]) -> Result<(), Error> {
        let frame = [SYNC, OP_KEY | KEY_KEY | KEY_8BYTES];
        self.phy.send(&frame)?;

        let mut reversed = *key;
        reversed.reverse();
        self.phy.send(&reversed)
    }

    /// Reads the 16-byte System Information Block.
    pub fn read_sib(&mut self, out: &mut [u8; 16]) -> Result<(), Error> {
        let frame = [SYNC, OP_KEY | KEY_SIB | SIB_16BYTES];
        self.phy.send_receive(&frame, out)
    }

    /// True when ASI_SYS_STATUS reports NVM programming mode.
    pub fn in_prog_mode(&mut self) -> Result<bool, Error> {
        Ok(self.ldcs(CsReg::AsiSysStatus)? & SYS_STATUS_NVMPROG != 0)
    }

    /// Reads up to 256 bytes starting at `address`: `ST_PTR`, a REPEAT
    /// when more than one byte is wanted, then a single byte-wide
    /// indirect load.
    pub fn read_data(
        &mut self,
        address: u16,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        if buf.len() > MAX_REPEAT {
            return Err(Error::BadConfig(format!(
                "read of {} bytes exceeds the repeat limit",
                buf.len()
            )));
        }

        self.st_ptr(address)?;
        if buf.len() > 1 {
            self.repeat(buf.len())?;
        }
        self.ld_ptr_inc(buf)
    }

    /// Reads up to 256 words starting at `address`; `buf` holds the
    /// little-endian byte stream, so its length must be even.
    pub fn read_data_words(
        &mut self,
        address: u16,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let numwords = buf.len() / 2;
        if numwords == 0 {
            return Ok(());
        }
        if numwords > MAX_REPEAT {
            return Err(Error::BadConfig(format!(
                "read of {numwords} words exceeds the repeat limit"
            )));
        }

        self.st_ptr(address)?;
        if numwords > 1 {
            self.repeat(numwords)?;
        }
        self.ld_ptr_inc16(buf)
    }

    /// Writes up to 256 bytes starting at `address`. One or two bytes go
    /// as direct stores; longer runs use the pointer with a REPEAT.
    pub fn write_data(
        &mut self,
        address: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        match data.len() {
            0 => Ok(()),
            1 => self.st(address, data[0]),
            2 => {
                self.st(address, data[0])?;
                self.st(address + 1, data[1])
            }
            len if len > MAX_REPEAT => Err(Error::BadConfig(format!(
                "write of {len} bytes exceeds the repeat limit"
            ))),
            len => {
                self.st_ptr(address)?;
                self.repeat(len)?;
                self.st_ptr_inc(data)
            }
        }
    }

    /// Writes up to 256 words starting at `address` using the
    /// ACK-suppressed burst path; `data.len()` must be even.
    pub fn write_data_words(
        &mut self,
        address: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        let numwords = data.len() / 2;
        match numwords {
            0 => Ok(()),
            1 => self.st16(
                address,
                u16::from_le_bytes([data[0], data[1]]),
            ),
            n if n > MAX_REPEAT => Err(Error::BadConfig(format!(
                "write of {n} words exceeds the repeat limit"
            ))),
            n => {
                self.st_ptr(address)?;
                self.repeat(n)?;
                self.st_ptr_inc16(data)
            }
        }
    }

    pub fn close(&mut self) {
        self.phy.close();
    }

    /// Sends a frame whose single response byte must be the ACK.
    fn expect_ack(
        &mut self,
        frame: &[u8],
        what: &str,
    ) -> Result<(), Error> {
        let mut reply = [0];
        self.phy.send_receive(frame, &mut reply)?;
        if reply[0] != ACK {
            return Err(Error::LinkNack(format!(
                "{what}: got {:#04x}",
                reply[0]
            )));
        }
        Ok(())
    }
}
