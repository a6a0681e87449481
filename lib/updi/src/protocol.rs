// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UPDI wire-format constants.
//!
//! Every instruction frame begins with the sync byte and carries the opcode
//! in its second byte. The opcode's high three bits select the instruction;
//! the low bits select pointer mode, address width, and data width. The
//! literal values here must not be "cleaned up" -- they are the on-wire
//! encoding of the UPDI peripheral and of the NVM controller's register
//! file, as fixed by the datasheet.

/// Sync character preceding every instruction frame.
pub const SYNC: u8 = 0x55;

/// Sent on its own (never after SYNC) to wake or reset the UPDI peripheral.
/// At 300 baud one of these holds the line low long enough to count as a
/// proper BREAK condition.
pub const BREAK: u8 = 0x00;

/// Acknowledge byte returned by the target after each addressed store
/// phase, unless response signatures are disabled via [`CTRLA_RSD`].
pub const ACK: u8 = 0x40;

// Instruction opcode bases.
pub const OP_LDS: u8 = 0x00;
pub const OP_STS: u8 = 0x40;
pub const OP_LD: u8 = 0x20;
pub const OP_ST: u8 = 0x60;
pub const OP_LDCS: u8 = 0x80;
pub const OP_STCS: u8 = 0xC0;
pub const OP_REPEAT: u8 = 0xA0;
pub const OP_KEY: u8 = 0xE0;

// Pointer-mode field for LD/ST.
pub const PTR_INC: u8 = 0x04;
pub const PTR_ADDRESS: u8 = 0x08;

// Address-width field for LDS/STS. Only 16-bit addressing is used here.
pub const ADDRESS_16: u8 = 0x04;

// Data-width field.
pub const DATA_8: u8 = 0x00;
pub const DATA_16: u8 = 0x01;

// KEY instruction variants: bit 2 selects SIB read-out vs. key insertion,
// the size field selects an 8- or 16-byte payload.
pub const KEY_SIB: u8 = 0x04;
pub const KEY_KEY: u8 = 0x00;
pub const KEY_8BYTES: u8 = 0x00;
pub const SIB_16BYTES: u8 = 0x01;

// REPEAT carries a 16-bit count (encoded as N - 1).
pub const REPEAT_WORD: u8 = 0x01;

/// Largest number of repeats a single REPEAT instruction can prime: the
/// count byte maxes out at 0xFF, i.e. 256 executions of the following
/// indirect access. Callers chunk anything larger.
pub const MAX_REPEAT: usize = 256;

/// Control/Status and ASI register addresses, reachable with LDCS/STCS.
/// The CS address field is four bits wide.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CsReg {
    StatusA = 0x00,
    StatusB = 0x01,
    CtrlA = 0x02,
    CtrlB = 0x03,
    AsiKeyStatus = 0x07,
    AsiResetReq = 0x08,
    AsiCtrlA = 0x09,
    AsiSysCtrlA = 0x0A,
    AsiSysStatus = 0x0B,
    AsiCrcStatus = 0x0C,
}

// CTRLA / CTRLB bits.
pub const CTRLA_IBDLY: u8 = 1 << 7;
pub const CTRLA_RSD: u8 = 1 << 3;
pub const CTRLB_CCDETDIS: u8 = 1 << 3;
pub const CTRLB_UPDIDIS: u8 = 1 << 2;

// ASI_KEY_STATUS bits.
pub const KEY_STATUS_CHIPERASE: u8 = 1 << 3;
pub const KEY_STATUS_NVMPROG: u8 = 1 << 4;
pub const KEY_STATUS_UROWWRITE: u8 = 1 << 5;

// ASI_SYS_STATUS bits.
pub const SYS_STATUS_RSTSYS: u8 = 1 << 5;
pub const SYS_STATUS_INSLEEP: u8 = 1 << 4;
pub const SYS_STATUS_NVMPROG: u8 = 1 << 3;
pub const SYS_STATUS_UROWPROG: u8 = 1 << 2;
pub const SYS_STATUS_LOCKSTATUS: u8 = 1 << 0;

/// Writing this to ASI_RESET_REQ asserts reset; writing zero releases it.
pub const RESET_REQ: u8 = 0x59;

// Activation keys, as spelled in the datasheet. The link layer transmits
// them byte-reversed.
pub const KEY_NVMPROG: &[u8; 8] = b"NVMProg ";
pub const KEY_CHIPERASE: &[u8; 8] = b"NVMErase";
pub const KEY_UROWWRITE: &[u8; 8] = b"NVMUs&te";

/// NVM controller register offsets, relative to the device's NVMCTRL base.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NvmReg {
    CtrlA = 0x00,
    CtrlB = 0x01,
    Status = 0x02,
    IntCtrl = 0x03,
    IntFlags = 0x04,
    DataL = 0x06,
    DataH = 0x07,
    AddrL = 0x08,
    AddrH = 0x09,
}

/// Commands accepted by NVMCTRL.CTRLA.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NvmCmd {
    Nop = 0x00,
    WritePage = 0x01,
    ErasePage = 0x02,
    EraseWritePage = 0x03,
    PageBufferClr = 0x04,
    ChipErase = 0x05,
    EraseEeprom = 0x06,
    WriteFuse = 0x07,
}

// NVMCTRL.STATUS bits.
pub const NVM_STATUS_WRITE_ERROR: u8 = 1 << 2;
pub const NVM_STATUS_EEPROM_BUSY: u8 = 1 << 1;
pub const NVM_STATUS_FLASH_BUSY: u8 = 1 << 0;
