// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic UPDI target for exercising the stack without hardware.
//!
//! [`Target`] plays both halves of the wire: it is the half-duplex serial
//! port (echoing every host byte back ahead of any reply) and the device
//! behind it (CS/ASI registers, key and lock state, the NVM controller,
//! and a 64 KiB data space holding flash, fuses, and the signature row).
//! Everything the host transmits is also captured, per line
//! configuration, so tests can assert byte-exact instruction sequences.

#![allow(dead_code)] // not every test file uses every knob

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use updi::clock::Clock;
use updi::device::DeviceTag;
use updi::protocol::*;
use updi::transport::{LineSettings, Transport};
use updi::Error;

/// Clock that advances by a fixed step on every query, so timeout loops
/// terminate without real waiting.
pub struct AutoClock {
    now: Cell<u64>,
    step: u64,
}

impl AutoClock {
    pub fn new() -> Self {
        Self::with_step(1)
    }

    pub fn with_step(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }
}

impl Clock for AutoClock {
    fn millis(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }
}

/// Instruction decoder state.
enum Decode {
    Idle,
    /// Saw the sync byte, next byte is the opcode.
    Sync,
    LdsAddr {
        width: usize,
        got: Vec<u8>,
    },
    StsAddr {
        width: usize,
        got: Vec<u8>,
    },
    StsData {
        addr: u16,
        width: usize,
        got: Vec<u8>,
    },
    Stcs {
        reg: u8,
    },
    PtrAddr {
        got: Vec<u8>,
    },
    StInc {
        width: usize,
        remaining: usize,
        pending: Vec<u8>,
    },
    RepeatCount {
        got: Vec<u8>,
    },
    KeyData {
        got: Vec<u8>,
    },
}

pub struct Target {
    // Host-visible wiring.
    rx: VecDeque<u8>,
    /// Everything the host wrote, one segment per line configuration.
    pub segments: Vec<(LineSettings, Vec<u8>)>,
    pub closed: bool,

    // Behaviour knobs.
    /// Device boots locked; cleared by a key-triggered erase.
    pub locked: bool,
    /// UPDI stays mute (STATUSA reads zero) until a BREAK arrives at the
    /// double-break line settings.
    pub needs_double_break: bool,
    /// Answer store phases with a bogus byte instead of the ACK.
    pub nack_stores: bool,
    /// Answer store phases with nothing at all.
    pub mute_stores: bool,
    /// Break the local loopback: transmitted bytes stop echoing.
    pub drop_echo: bool,
    /// Silently discard stores into the flash array, as a write-protected
    /// part would.
    pub drop_flash_writes: bool,

    // Device model.
    pub mem: Vec<u8>,
    pub sib: [u8; 16],
    pub statusa: u8,
    ctrla: u8,
    ctrlb: u8,
    key_nvmprog: bool,
    key_chiperase: bool,
    key_urowwrite: bool,
    prog_mode: bool,
    in_reset: bool,
    alive: bool,

    // Link state.
    ptr: u16,
    repeat: u16,
    repeat_armed: bool,
    state: Decode,

    // Geometry, from the device descriptor.
    nvmctrl: u16,
    flash_start: u16,
    flash_size: usize,
    /// Every command byte written to NVMCTRL.CTRLA, in order.
    pub nvm_cmds: Vec<u8>,
}

impl Target {
    pub fn new(tag: DeviceTag) -> Self {
        let d = tag.descriptor();
        let mut mem = vec![0; 0x1_0000];
        // Flash ships erased.
        let flash = d.flash_start as usize
            ..d.flash_start as usize + d.flash_size as usize;
        mem[flash].fill(0xFF);

        Self {
            rx: VecDeque::new(),
            segments: Vec::new(),
            closed: false,
            locked: false,
            needs_double_break: false,
            nack_stores: false,
            mute_stores: false,
            drop_echo: false,
            drop_flash_writes: false,
            mem,
            sib: *b"tinyAVR\0P:0D:0\0\xAA",
            statusa: 0x30,
            ctrla: 0,
            ctrlb: 0,
            key_nvmprog: false,
            key_chiperase: false,
            key_urowwrite: false,
            prog_mode: false,
            in_reset: false,
            alive: true,
            ptr: 0,
            repeat: 0,
            repeat_armed: false,
            state: Decode::Idle,
            nvmctrl: d.nvmctrl_addr,
            flash_start: d.flash_start,
            flash_size: d.flash_size as usize,
            nvm_cmds: Vec::new(),
        }
    }

    /// All bytes the host transmitted, across every configuration.
    pub fn tx(&self) -> Vec<u8> {
        self.segments
            .iter()
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    /// Bytes transmitted while the port was at `settings`.
    pub fn tx_at(&self, settings: &LineSettings) -> Vec<u8> {
        self.segments
            .iter()
            .filter(|(s, _)| s == settings)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    pub fn in_prog_mode(&self) -> bool {
        self.prog_mode
    }

    /// Simulate a target whose UPDI peripheral won't answer until it has
    /// seen a BREAK at the 300-baud line settings.
    pub fn require_double_break(&mut self) {
        self.needs_double_break = true;
        self.alive = false;
    }

    pub fn flash(&self) -> &[u8] {
        &self.mem[self.flash_start as usize..][..self.flash_size]
    }

    /// Reply bytes the host never read; a clean exchange drains all of
    /// them.
    pub fn unread(&self) -> usize {
        self.rx.len()
    }

    fn reply(&mut self, byte: u8) {
        self.rx.push_back(byte);
    }

    fn store_ack(&mut self) {
        if self.mute_stores {
            return;
        }
        let byte = if self.nack_stores { 0x00 } else { ACK };
        self.reply(byte);
    }

    /// One-shot repeat: primed by REPEAT, consumed by the next indirect
    /// access, otherwise one execution.
    fn take_repeat(&mut self) -> usize {
        if self.repeat_armed {
            self.repeat_armed = false;
            self.repeat as usize + 1
        } else {
            1
        }
    }

    fn acks_suppressed(&self) -> bool {
        self.ctrla & CTRLA_RSD != 0
    }

    fn cs_read(&self, reg: u8) -> u8 {
        const STATUSA: u8 = CsReg::StatusA as u8;
        const CTRLA: u8 = CsReg::CtrlA as u8;
        const CTRLB: u8 = CsReg::CtrlB as u8;
        const KEYSTATUS: u8 = CsReg::AsiKeyStatus as u8;
        const SYSSTATUS: u8 = CsReg::AsiSysStatus as u8;

        match reg {
            STATUSA => {
                if self.alive {
                    self.statusa
                } else {
                    0
                }
            }
            CTRLA => self.ctrla,
            CTRLB => self.ctrlb,
            KEYSTATUS => {
                let mut v = 0;
                if self.key_chiperase {
                    v |= KEY_STATUS_CHIPERASE;
                }
                if self.key_nvmprog {
                    v |= KEY_STATUS_NVMPROG;
                }
                if self.key_urowwrite {
                    v |= KEY_STATUS_UROWWRITE;
                }
                v
            }
            SYSSTATUS => {
                let mut v = 0;
                if self.locked {
                    v |= SYS_STATUS_LOCKSTATUS;
                }
                if self.prog_mode {
                    v |= SYS_STATUS_NVMPROG;
                }
                v
            }
            _ => 0,
        }
    }

    fn cs_write(&mut self, reg: u8, value: u8) {
        const CTRLA: u8 = CsReg::CtrlA as u8;
        const CTRLB: u8 = CsReg::CtrlB as u8;
        const RESETREQ: u8 = CsReg::AsiResetReq as u8;

        match reg {
            CTRLA => self.ctrla = value,
            CTRLB => {
                self.ctrlb = value;
                if value & CTRLB_UPDIDIS != 0 {
                    // Disabling UPDI releases every inserted key.
                    self.key_nvmprog = false;
                    self.key_chiperase = false;
                    self.key_urowwrite = false;
                    self.prog_mode = false;
                }
            }
            RESETREQ => {
                if value == RESET_REQ {
                    self.in_reset = true;
                } else if value == 0x00 && self.in_reset {
                    self.in_reset = false;
                    self.reset_release();
                }
            }
            _ => {}
        }
    }

    fn reset_release(&mut self) {
        if self.key_chiperase {
            let flash = self.flash_start as usize
                ..self.flash_start as usize + self.flash_size;
            self.mem[flash].fill(0xFF);
            self.locked = false;
            self.key_chiperase = false;
        }
        self.prog_mode = self.key_nvmprog && !self.locked;
    }

    fn mem_write(&mut self, addr: u16, value: u8) {
        let in_flash = (self.flash_start as usize
            ..self.flash_start as usize + self.flash_size)
            .contains(&(addr as usize));
        if in_flash && self.drop_flash_writes {
            return;
        }
        self.mem[addr as usize] = value;
        if addr == self.nvmctrl + NvmReg::CtrlA as u16 {
            self.nvm_command(value);
        }
    }

    fn nvm_command(&mut self, cmd: u8) {
        self.nvm_cmds.push(cmd);
        const CHIP_ERASE: u8 = NvmCmd::ChipErase as u8;
        const WRITE_FUSE: u8 = NvmCmd::WriteFuse as u8;

        match cmd {
            CHIP_ERASE => {
                let flash = self.flash_start as usize
                    ..self.flash_start as usize + self.flash_size;
                self.mem[flash].fill(0xFF);
            }
            WRITE_FUSE => {
                let lo =
                    self.mem[(self.nvmctrl + NvmReg::AddrL as u16) as usize];
                let hi =
                    self.mem[(self.nvmctrl + NvmReg::AddrH as u16) as usize];
                let addr = u16::from_le_bytes([lo, hi]);
                let value =
                    self.mem[(self.nvmctrl + NvmReg::DataL as u16) as usize];
                self.mem[addr as usize] = value;
            }
            // Page buffer handling is not modelled: stores land in `mem`
            // directly, and the page commands only sequence the status
            // machine (which is always ready here).
            _ => {}
        }
    }

    /// Feeds one host byte through the instruction decoder, queueing any
    /// replies.
    fn process(&mut self, byte: u8) {
        let at_break_settings = matches!(
            self.segments.last(),
            Some((s, _)) if *s == LineSettings::DOUBLE_BREAK
        );

        match std::mem::replace(&mut self.state, Decode::Idle) {
            Decode::Idle => match byte {
                SYNC => self.state = Decode::Sync,
                BREAK => {
                    if at_break_settings && self.needs_double_break {
                        self.alive = true;
                    }
                }
                _ => {}
            },
            Decode::Sync => self.opcode(byte),
            Decode::LdsAddr { width, mut got } => {
                got.push(byte);
                if got.len() < 2 {
                    self.state = Decode::LdsAddr { width, got };
                } else {
                    let addr = u16::from_le_bytes([got[0], got[1]]);
                    for i in 0..width {
                        let v = self.mem[addr as usize + i];
                        self.reply(v);
                    }
                }
            }
            Decode::StsAddr { width, mut got } => {
                got.push(byte);
                if got.len() < 2 {
                    self.state = Decode::StsAddr { width, got };
                } else {
                    let addr = u16::from_le_bytes([got[0], got[1]]);
                    self.store_ack();
                    self.state = Decode::StsData {
                        addr,
                        width,
                        got: Vec::new(),
                    };
                }
            }
            Decode::StsData {
                addr,
                width,
                mut got,
            } => {
                got.push(byte);
                if got.len() < width {
                    self.state = Decode::StsData { addr, width, got };
                } else {
                    for (i, &v) in got.iter().enumerate() {
                        self.mem_write(addr + i as u16, v);
                    }
                    self.store_ack();
                }
            }
            Decode::Stcs { reg } => self.cs_write(reg, byte),
            Decode::PtrAddr { mut got } => {
                got.push(byte);
                if got.len() < 2 {
                    self.state = Decode::PtrAddr { got };
                } else {
                    self.ptr = u16::from_le_bytes([got[0], got[1]]);
                    self.store_ack();
                }
            }
            Decode::StInc {
                width,
                remaining,
                mut pending,
            } => {
                pending.push(byte);
                if pending.len() < width {
                    self.state = Decode::StInc {
                        width,
                        remaining,
                        pending,
                    };
                } else {
                    for &v in &pending {
                        let at = self.ptr;
                        self.mem_write(at, v);
                        self.ptr = self.ptr.wrapping_add(1);
                    }
                    pending.clear();
                    if !self.acks_suppressed() {
                        self.store_ack();
                    }
                    if remaining > 1 {
                        self.state = Decode::StInc {
                            width,
                            remaining: remaining - 1,
                            pending,
                        };
                    }
                }
            }
            Decode::RepeatCount { mut got } => {
                got.push(byte);
                if got.len() < 2 {
                    self.state = Decode::RepeatCount { got };
                } else {
                    self.repeat = u16::from_le_bytes([got[0], got[1]]);
                    self.repeat_armed = true;
                }
            }
            Decode::KeyData { mut got } => {
                got.push(byte);
                if got.len() < 8 {
                    self.state = Decode::KeyData { got };
                } else {
                    let mut key = got;
                    key.reverse();
                    if key == KEY_NVMPROG {
                        self.key_nvmprog = true;
                    } else if key == KEY_CHIPERASE {
                        self.key_chiperase = true;
                    } else if key == KEY_UROWWRITE {
                        self.key_urowwrite = true;
                    }
                }
            }
        }
    }

    fn opcode(&mut self, op: u8) {
        match op & 0xE0 {
            OP_LDCS => {
                let v = self.cs_read(op & 0x0F);
                self.reply(v);
            }
            OP_STCS => self.state = Decode::Stcs { reg: op & 0x0F },
            OP_LDS => {
                self.state = Decode::LdsAddr {
                    width: (op & 0x03) as usize + 1,
                    got: Vec::new(),
                }
            }
            OP_STS => {
                self.state = Decode::StsAddr {
                    width: (op & 0x03) as usize + 1,
                    got: Vec::new(),
                }
            }
            OP_LD => {
                let width = (op & 0x03) as usize + 1;
                let n = self.take_repeat();
                for _ in 0..n {
                    for _ in 0..width {
                        let v = self.mem[self.ptr as usize];
                        self.reply(v);
                        self.ptr = self.ptr.wrapping_add(1);
                    }
                }
            }
            OP_ST => {
                if op & PTR_ADDRESS != 0 {
                    self.state = Decode::PtrAddr { got: Vec::new() };
                } else {
                    let width = (op & 0x03) as usize + 1;
                    let n = self.take_repeat();
                    self.state = Decode::StInc {
                        width,
                        remaining: n,
                        pending: Vec::new(),
                    };
                }
            }
            OP_REPEAT => {
                self.state = Decode::RepeatCount { got: Vec::new() }
            }
            OP_KEY => {
                if op & KEY_SIB != 0 {
                    let sib = self.sib;
                    for b in sib {
                        self.reply(b);
                    }
                } else {
                    self.state = Decode::KeyData { got: Vec::new() };
                }
            }
            _ => {}
        }
    }
}

/// Cloneable [`Transport`] handle over a shared [`Target`], so a test
/// can keep inspecting the target after the session takes the port.
#[derive(Clone)]
pub struct FakePort(pub Rc<RefCell<Target>>);

impl FakePort {
    pub fn new(tag: DeviceTag) -> (Self, Rc<RefCell<Target>>) {
        let target = Rc::new(RefCell::new(Target::new(tag)));
        (Self(Rc::clone(&target)), target)
    }
}

impl Transport for FakePort {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), Error> {
        let mut t = self.0.borrow_mut();
        t.segments.push((*settings, Vec::new()));
        t.closed = false;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut t = self.0.borrow_mut();
        for &byte in data {
            // Local echo first, then whatever the byte provokes.
            if !t.drop_echo {
                t.rx.push_back(byte);
            }
            t.segments
                .last_mut()
                .expect("send before configure")
                .1
                .push(byte);
            t.process(byte);
        }
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut t = self.0.borrow_mut();
        for slot in buf.iter_mut() {
            *slot = t.rx.pop_front().ok_or_else(|| {
                Error::TransportTimeout("fake port ran dry".to_string())
            })?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}
