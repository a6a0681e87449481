// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NVM controller driver.
//!
//! Flash and fuses are written through the target's NVMCTRL peripheral:
//! fill the page buffer (or the ADDR/DATA registers for a fuse), poke a
//! command into CTRLA, and poll STATUS until the busy bits clear. Every
//! command is bracketed by that wait; a set WRITE_ERROR bit is terminal
//! for the operation, and a controller that stays busy past ten seconds
//! has wedged.

use crate::clock::Clock;
use crate::device::Device;
use crate::link::Link;
use crate::log::Log;
use crate::protocol::{
    NvmCmd, NvmReg, MAX_REPEAT, NVM_STATUS_EEPROM_BUSY,
    NVM_STATUS_FLASH_BUSY, NVM_STATUS_WRITE_ERROR,
};
use crate::transport::Transport;
use crate::Error;

/// How long the controller may stay busy before we declare it wedged.
const READY_TIMEOUT_MS: u64 = 10_000;

/// Borrow of the link plus the device map, scoped to one or more NVM
/// operations.
pub struct Nvm<'a, T, C, L> {
    link: &'a mut Link<T>,
    device: Device,
    clock: &'a C,
    log: &'a L,
}

impl<'a, T: Transport, C: Clock, L: Log> Nvm<'a, T, C, L> {
    pub fn new(
        link: &'a mut Link<T>,
        device: Device,
        clock: &'a C,
        log: &'a L,
    ) -> Self {
        Self {
            link,
            device,
            clock,
            log,
        }
    }

    fn reg(&self, reg: NvmReg) -> u16 {
        self.device.nvmctrl_addr + reg as u16
    }

    /// Polls NVMCTRL.STATUS until both busy bits are clear. WRITE_ERROR
    /// fails immediately; anything else is retried until the deadline.
    pub fn wait_ready(&mut self) -> Result<(), Error> {
        let deadline = self.clock.millis() + READY_TIMEOUT_MS;
        let status_addr = self.reg(NvmReg::Status);

        loop {
            let status = self.link.ld(status_addr)?;
            if status & NVM_STATUS_WRITE_ERROR != 0 {
                return Err(Error::NvmError(format!(
                    "STATUS = {status:#04x}"
                )));
            }
            if status & (NVM_STATUS_FLASH_BUSY | NVM_STATUS_EEPROM_BUSY)
                == 0
            {
                return Ok(());
            }
            if self.clock.millis() >= deadline {
                return Err(Error::NvmTimeout(
                    "controller stayed busy".to_string(),
                ));
            }
        }
    }

    /// Writes a command to CTRLA.
    pub fn command(&mut self, cmd: NvmCmd) -> Result<(), Error> {
        self.link.st(self.reg(NvmReg::CtrlA), cmd as u8)
    }

    /// Erases the whole chip through the controller. Only works on an
    /// unlocked device; locked parts are erased with the key instead.
    pub fn chip_erase(&mut self) -> Result<(), Error> {
        self.wait_ready()?;
        self.command(NvmCmd::ChipErase)?;
        self.wait_ready()
    }

    /// Writes one fuse. The fuse's data-space address goes into the
    /// controller's ADDR pair, the value into DATAL, and the write runs
    /// as its own command.
    pub fn write_fuse(&mut self, index: u8, value: u8) -> Result<(), Error> {
        self.wait_ready()?;

        let fuse_addr = self.device.fuses_addr + index as u16;
        let [lo, hi] = fuse_addr.to_le_bytes();
        self.link.st(self.reg(NvmReg::AddrL), lo)?;
        self.link.st(self.reg(NvmReg::AddrH), hi)?;
        self.link.st(self.reg(NvmReg::DataL), value)?;
        self.command(NvmCmd::WriteFuse)
    }

    /// Writes one page worth of `data` at `address`: clear the page
    /// buffer, burst the data in (word access for flash, byte access for
    /// the user row), then commit with `cmd`.
    pub fn write_page(
        &mut self,
        address: u16,
        data: &[u8],
        cmd: NvmCmd,
        word_access: bool,
    ) -> Result<(), Error> {
        self.wait_ready()?;
        self.command(NvmCmd::PageBufferClr)?;
        self.wait_ready()?;

        if word_access {
            self.link.write_data_words(address, data)?;
        } else {
            self.link.write_data(address, data)?;
        }

        self.command(cmd)?;
        self.wait_ready()
    }

    /// Reads `buf.len()` bytes starting at `address`, in chunks of one
    /// flash page worth of words, with a byte-access tail for any
    /// remainder. Reports progress every tenth of the way.
    pub fn read_block(
        &mut self,
        address: u16,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let chunk = self.device.flash_pagesize as usize * 2;
        let chunks = buf.len().div_ceil(chunk);
        let mut done = 0;
        let mut next_report = 10;

        for (i, slice) in buf.chunks_mut(chunk).enumerate() {
            let at = address + (i * chunk) as u16;
            if slice.len() == chunk {
                self.link.read_data_words(at, slice)?;
            } else {
                // Partial tail, read byte-wise (in repeat-sized pieces,
                // since the tail of a two-page chunk can exceed one
                // repeat run).
                for (j, piece) in
                    slice.chunks_mut(MAX_REPEAT).enumerate()
                {
                    self.link
                        .read_data(at + (j * MAX_REPEAT) as u16, piece)?;
                }
            }

            done += 1;
            while 100 * done / chunks >= next_report && next_report < 100
            {
                self.log
                    .important(&format!("{next_report} percent done"));
                next_report += 10;
            }
        }

        self.log.important("100 percent done");
        Ok(())
    }
}
