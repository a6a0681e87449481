// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Programming session orchestrator.
//!
//! One session owns the link (which owns the transport) for the duration
//! of a single [`Session::process`] call: bring the link up, get into
//! programming mode -- by key alone on an unlocked part, by chip-erase
//! key on a locked one when the requested actions permit it -- run the
//! requested actions in a fixed order, and leave programming mode. The
//! order is fixed so that fuse reads observe pre-erase values and a
//! verify observes exactly what was just written.

use std::path::PathBuf;

use crate::clock::Clock;
use crate::device::{Device, DeviceTag};
use crate::link::Link;
use crate::log::Log;
use crate::nvm::Nvm;
use crate::phy::Phy;
use crate::protocol::{
    CsReg, NvmCmd, CTRLB_CCDETDIS, CTRLB_UPDIDIS, KEY_CHIPERASE,
    KEY_NVMPROG, KEY_STATUS_CHIPERASE, KEY_STATUS_NVMPROG, RESET_REQ,
    SYS_STATUS_LOCKSTATUS,
};
use crate::transport::Transport;
use crate::Error;

/// How long LOCKSTATUS may take to clear after a keyed reset.
const UNLOCK_TIMEOUT_MS: u64 = 100;

/// Largest user-row payload across the supported families (the megaAVR 0
/// row; tinyAVR rows are half that).
const USERROW_MAX: usize = 64;

/// One requestable unit of work.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Action {
    GetInfo,
    ReadFuses,
    WriteFuses,
    ReadFlash,
    Erase,
    WriteFlash,
    /// Modifier of [`Action::WriteFlash`]: read back and compare.
    VerifyFlash,
    WriteUserrow,
}

impl Action {
    /// The order actions run in, regardless of request order.
    pub const ORDER: &'static [Action] = &[
        Action::GetInfo,
        Action::ReadFuses,
        Action::WriteFuses,
        Action::ReadFlash,
        Action::Erase,
        Action::WriteFlash,
        Action::WriteUserrow,
    ];

    fn bit(self) -> u8 {
        match self {
            Action::GetInfo => 1 << 0,
            Action::ReadFuses => 1 << 1,
            Action::WriteFuses => 1 << 2,
            Action::ReadFlash => 1 << 3,
            Action::Erase => 1 << 4,
            Action::WriteFlash => 1 << 5,
            Action::VerifyFlash => 1 << 6,
            Action::WriteUserrow => 1 << 7,
        }
    }
}

/// Set of requested actions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const EMPTY: Self = Self(0);

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for a in iter {
            set.insert(a);
        }
        set
    }
}

/// Everything one `process` call needs to know.
#[derive(Clone, Debug, Default)]
pub struct Request {
    pub actions: ActionSet,
    /// Intel HEX image for [`Action::WriteFlash`].
    pub hex_path: Option<PathBuf>,
    /// `(index, value)` pairs for [`Action::WriteFuses`].
    pub fuse_writes: Vec<(u8, u8)>,
    /// Payload for [`Action::WriteUserrow`].
    pub userrow: Option<Vec<u8>>,
}

/// Identification data assembled by [`Action::GetInfo`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    /// Family string from the SIB, e.g. "tinyAVR".
    pub family: String,
    pub nvm_version: String,
    pub ocd_version: String,
    pub dbg_osc_freq: u8,
    /// UPDI revision, from the high nibble of STATUSA.
    pub pdi_rev: u8,
    /// Signature bytes; all zeros unless read in programming mode.
    pub dev_id: [u8; 3],
    /// Silicon revision as a letter ('A' = rev 0); `None` unless read in
    /// programming mode.
    pub dev_rev: Option<char>,
}

/// Read-back results, handed to the caller by value when the session
/// completes.
#[derive(Clone, Debug, Default)]
pub struct Outcome {
    pub info: DeviceInfo,
    /// One byte per fuse, filled by [`Action::ReadFuses`].
    pub fuses: Vec<u8>,
    /// Full flash contents, filled by [`Action::ReadFlash`].
    pub flash: Vec<u8>,
}

pub struct Session<T, C, L> {
    link: Link<T>,
    device: Device,
    clock: C,
    log: L,
}

impl<T: Transport, C: Clock, L: Log> Session<T, C, L> {
    /// Opens `port` at `baud` and binds the session to `tag`'s memory
    /// map. The port is owned from here on and released on every exit
    /// path of [`Self::process`].
    pub fn new(
        port: T,
        baud: u32,
        tag: DeviceTag,
        clock: C,
        log: L,
    ) -> Result<Self, Error> {
        let phy = Phy::new(port, baud)?;
        Ok(Self {
            link: Link::new(phy),
            device: tag.descriptor(),
            clock,
            log,
        })
    }

    /// Runs the requested actions and returns the read-back buffers.
    ///
    /// On any failure the remaining actions are skipped, programming mode
    /// is left on a best-effort basis, and the transport is closed before
    /// the error propagates.
    pub fn process(mut self, request: &Request) -> Result<Outcome, Error> {
        let result = self.run(request);
        if result.is_err() {
            // Best effort; the original failure is the one worth
            // reporting.
            let _ = self.leave_progmode();
        }
        self.link.close();
        result
    }

    fn run(&mut self, request: &Request) -> Result<Outcome, Error> {
        self.validate(request)?;

        self.link.handshake(&self.log)?;
        self.log.verbose("UPDI initialised");

        if self.try_enter_progmode()? {
            self.log.verbose("in programming mode");
        } else {
            // A locked part only opens up through a key-triggered chip
            // erase; don't do that unless the caller asked for an erase
            // or a flash write anyway.
            if request.actions.contains(Action::WriteFlash)
                || request.actions.contains(Action::Erase)
            {
                self.log.important("device locked, erasing to unlock");
                self.unlock_device()?;
                if !self.link.in_prog_mode()? {
                    return Err(Error::Locked(
                        "still not in programming mode after key erase"
                            .to_string(),
                    ));
                }
            } else {
                return Err(Error::Locked(
                    "unlocking requires a chip erase; request an erase \
                     or a flash write"
                        .to_string(),
                ));
            }
        }

        let mut outcome = Outcome::default();
        self.run_actions(request, &mut outcome)?;

        self.leave_progmode()?;
        self.log.important("process finished");
        Ok(outcome)
    }

    fn validate(&self, request: &Request) -> Result<(), Error> {
        let actions = request.actions;
        if actions.is_empty()
            || actions == ActionSet::EMPTY.with(Action::VerifyFlash)
        {
            return Err(Error::BadConfig(
                "no actions requested".to_string(),
            ));
        }
        if actions.contains(Action::WriteFlash)
            && request.hex_path.is_none()
        {
            return Err(Error::BadConfig(
                "flash write requested without a HEX file".to_string(),
            ));
        }
        if actions.contains(Action::VerifyFlash)
            && !actions.contains(Action::WriteFlash)
        {
            return Err(Error::BadConfig(
                "verify is a modifier of flash write".to_string(),
            ));
        }
        if actions.contains(Action::WriteFuses) {
            if request.fuse_writes.is_empty() {
                return Err(Error::BadConfig(
                    "fuse write requested without fuse values"
                        .to_string(),
                ));
            }
            for &(index, _) in &request.fuse_writes {
                if index >= self.device.num_fuses {
                    return Err(Error::BadConfig(format!(
                        "fuse index {index} out of range (device has {})",
                        self.device.num_fuses
                    )));
                }
            }
        }
        if actions.contains(Action::WriteUserrow) {
            match &request.userrow {
                None => {
                    return Err(Error::BadConfig(
                        "user-row write requested without a payload"
                            .to_string(),
                    ))
                }
                Some(data) if data.is_empty() || data.len() > USERROW_MAX => {
                    return Err(Error::BadConfig(format!(
                        "user-row payload must be 1..={USERROW_MAX} bytes"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn run_actions(
        &mut self,
        request: &Request,
        outcome: &mut Outcome,
    ) -> Result<(), Error> {
        for &action in Action::ORDER {
            if !request.actions.contains(action) {
                continue;
            }
            match action {
                Action::GetInfo => {
                    self.log.important("reading device info");
                    outcome.info = self.get_info()?;
                }
                Action::ReadFuses => {
                    self.log.important("reading fuses");
                    outcome.fuses = self.read_fuses()?;
                }
                Action::WriteFuses => {
                    self.log.important("writing fuses");
                    for &(index, value) in &request.fuse_writes {
                        self.nvm().write_fuse(index, value)?;
                    }
                }
                Action::ReadFlash => {
                    self.log.important("reading flash");
                    let mut buf =
                        vec![0; self.device.flash_size as usize];
                    let start = self.device.flash_start;
                    self.nvm().read_block(start, &mut buf)?;
                    outcome.flash = buf;
                }
                Action::Erase => {
                    self.log.important("erasing flash");
                    self.nvm().chip_erase()?;
                }
                Action::WriteFlash => {
                    self.write_flash_action(request)?;
                }
                Action::WriteUserrow => {
                    self.log.important("writing user row");
                    let data = request.userrow.as_deref().unwrap_or(&[]);
                    let addr = self.device.userrow_addr;
                    self.nvm().write_page(
                        addr,
                        data,
                        NvmCmd::EraseWritePage,
                        false,
                    )?;
                }
                // Runs inside WriteFlash.
                Action::VerifyFlash => {}
            }
        }
        Ok(())
    }

    fn nvm(&mut self) -> Nvm<'_, T, C, L> {
        Nvm::new(&mut self.link, self.device, &self.clock, &self.log)
    }

    /// SIB plus, in programming mode, the signature row and silicon
    /// revision.
    fn get_info(&mut self) -> Result<DeviceInfo, Error> {
        let mut sib = [0; 16];
        self.link.read_sib(&mut sib)?;

        let text = |bytes: &[u8]| {
            bytes
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect::<String>()
        };

        let mut info = DeviceInfo {
            family: text(&sib[0..7]),
            nvm_version: text(&sib[8..11]),
            ocd_version: text(&sib[11..14]),
            dbg_osc_freq: sib[15],
            pdi_rev: self.link.ldcs(CsReg::StatusA)? >> 4,
            ..Default::default()
        };

        if self.link.in_prog_mode()? {
            self.link
                .read_data(self.device.sigrow_addr, &mut info.dev_id)?;
            let mut rev = [0];
            self.link.read_data(self.device.syscfg_addr, &mut rev)?;
            info.dev_rev = Some((b'A' + rev[0]) as char);
        }

        Ok(info)
    }

    fn read_fuses(&mut self) -> Result<Vec<u8>, Error> {
        let mut fuses = vec![0; self.device.num_fuses as usize];
        for (i, slot) in fuses.iter_mut().enumerate() {
            *slot = self.link.ld(self.device.fuses_addr + i as u16)?;
        }
        Ok(fuses)
    }

    /// Chip-erase, program the HEX image page by page, and optionally
    /// read it back for comparison.
    fn write_flash_action(&mut self, request: &Request) -> Result<(), Error> {
        let path = request
            .hex_path
            .as_ref()
            .expect("validated: hex_path present");

        let image =
            intelhex::load(path, self.device.flash_size as usize)?;
        self.log.important(&format!(
            "loaded {} byte(s) from {}",
            image.record_bytes,
            path.display()
        ));

        // A flash write always starts from an erased array; the page
        // write command does not erase.
        self.nvm().chip_erase()?;

        self.log.important("writing flash");
        self.write_flash(self.device.flash_start, &image.data)?;
        self.log.important("flash written");

        if request.actions.contains(Action::VerifyFlash) {
            self.log.important("verifying flash");
            self.verify_flash(self.device.flash_start, &image.data)?;
            self.log.important("verify passed");
        }
        Ok(())
    }

    /// Pads `data` with 0xFF up to a whole number of pages and programs
    /// each page with word access.
    fn write_flash(
        &mut self,
        start: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        let pagesize = self.device.flash_pagesize as usize;
        let numpages = data.len().div_ceil(pagesize);
        let mut next_report = 10;

        let mut page = vec![0xFF; pagesize];
        for i in 0..numpages {
            let offset = i * pagesize;
            let take = pagesize.min(data.len() - offset);
            page[..take].copy_from_slice(&data[offset..offset + take]);
            page[take..].fill(0xFF);

            self.nvm().write_page(
                start + offset as u16,
                &page,
                NvmCmd::WritePage,
                true,
            )?;

            while 100 * (i + 1) / numpages >= next_report
                && next_report < 100
            {
                self.log
                    .important(&format!("{next_report} percent done"));
                next_report += 10;
            }
        }

        self.log.important("100 percent done");
        Ok(())
    }

    /// Reads back a whole number of pages covering `data` and compares
    /// the first `data.len()` bytes; the pad bytes have no counterpart in
    /// the input and are not checked.
    fn verify_flash(&mut self, start: u16, data: &[u8]) -> Result<(), Error> {
        let pagesize = self.device.flash_pagesize as usize;
        let padded = data.len().div_ceil(pagesize) * pagesize;

        let mut readback = vec![0; padded];
        self.nvm().read_block(start, &mut readback)?;

        let mut mismatches = 0;
        let mut first = None;
        for (i, (&want, &got)) in
            data.iter().zip(&readback).enumerate()
        {
            if want != got {
                mismatches += 1;
                let addr = start + i as u16;
                first.get_or_insert(addr);
                self.log.error(&format!(
                    "mismatch at {addr:#06x}: wrote {want:#04x}, \
                     read {got:#04x}"
                ));
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(Error::VerifyMismatch { mismatches, first }),
        }
    }

    /// True once the device is in programming mode; inserts the NVMProg
    /// key and pulses reset if it wasn't already. `Ok(false)` means the
    /// part is locked (LOCKSTATUS never cleared), which is not a link
    /// error.
    fn try_enter_progmode(&mut self) -> Result<bool, Error> {
        if !self.link.in_prog_mode()? && !self.progmode_key()? {
            return Ok(false);
        }

        self.reset_pulse()?;

        if !self.wait_unlocked(UNLOCK_TIMEOUT_MS)? {
            self.log.verbose("device stayed locked");
            return Ok(false);
        }
        self.link.in_prog_mode()
    }

    /// Erase-unlocks a locked part: chip-erase key, NVMProg key on top
    /// (so that a part with CRC enabled comes out of the erase still in
    /// programming mode), reset pulse, wait for LOCKSTATUS to clear.
    fn unlock_device(&mut self) -> Result<(), Error> {
        self.link.key(KEY_CHIPERASE)?;
        let status = self.link.ldcs(CsReg::AsiKeyStatus)?;
        if status & KEY_STATUS_CHIPERASE == 0 {
            return Err(Error::Locked(
                "chip-erase key not accepted".to_string(),
            ));
        }

        let _ = self.progmode_key()?;

        self.reset_pulse()?;

        if !self.wait_unlocked(UNLOCK_TIMEOUT_MS)? {
            return Err(Error::Locked(
                "key-triggered erase did not unlock the device"
                    .to_string(),
            ));
        }
        self.log.verbose("device unlocked");
        Ok(())
    }

    /// Pulses reset and disables the UPDI peripheral, which also drops
    /// any inserted keys. Safe to call when not in programming mode.
    fn leave_progmode(&mut self) -> Result<(), Error> {
        self.log.verbose("leaving programming mode");
        self.reset_pulse()?;
        self.link
            .stcs(CsReg::CtrlB, CTRLB_UPDIDIS | CTRLB_CCDETDIS)
    }

    /// Inserts the NVMProg key; true if ASI_KEY_STATUS shows it took.
    fn progmode_key(&mut self) -> Result<bool, Error> {
        self.link.key(KEY_NVMPROG)?;
        let status = self.link.ldcs(CsReg::AsiKeyStatus)?;
        Ok(status & KEY_STATUS_NVMPROG != 0)
    }

    fn reset_pulse(&mut self) -> Result<(), Error> {
        self.link.stcs(CsReg::AsiResetReq, RESET_REQ)?;
        self.link.stcs(CsReg::AsiResetReq, 0x00)
    }

    /// Polls LOCKSTATUS until it clears or `timeout_ms` elapses.
    fn wait_unlocked(&mut self, timeout_ms: u64) -> Result<bool, Error> {
        let deadline = self.clock.millis() + timeout_ms;
        loop {
            let status = self.link.ldcs(CsReg::AsiSysStatus)?;
            if status & SYS_STATUS_LOCKSTATUS == 0 {
                return Ok(true);
            }
            if self.clock.millis() >= deadline {
                return Ok(false);
            }
        }
    }
}
