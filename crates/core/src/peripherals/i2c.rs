// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! STM32F4-style I2C controller, master mode only.
//!
//! The protocol phases the firmware drives (START, address byte, data bytes,
//! STOP) are modeled as register side effects on the dispatch engine. The
//! receive path is fed asynchronously by the simulator bridge through
//! [`I2c::load_input`]/[`I2c::input_ready`]; a STOP condition latches the
//! accumulated transmit buffer for the board to harvest.

use crate::regbank::{self, BitField, Register};
use crate::signals::InterruptLine;
use crate::MmioDevice;

pub const CR1: u64 = 0x00;
pub const CR2: u64 = 0x04;
pub const OAR1: u64 = 0x08;
pub const OAR2: u64 = 0x0c;
pub const DR: u64 = 0x10;
pub const SR1: u64 = 0x14;
pub const SR2: u64 = 0x18;
pub const CCR: u64 = 0x1c;
pub const TRISE: u64 = 0x20;
pub const FLTR: u64 = 0x24;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Cr1: u32 {
        const PE = 1 << 0;
        const SMBUS = 1 << 1;
        const SMBTYPE = 1 << 3;
        const ENARP = 1 << 4;
        const ENPEC = 1 << 5;
        const ENGC = 1 << 6;
        const NOSTRETCH = 1 << 7;
        const START = 1 << 8;
        const STOP = 1 << 9;
        const ACK = 1 << 10;
        const POS = 1 << 11;
        const PEC = 1 << 12;
        const ALERT = 1 << 13;
        const SWRST = 1 << 15;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Cr2: u32 {
        const ITERREN = 1 << 8;
        const ITEVTEN = 1 << 9;
        const ITBUFEN = 1 << 10;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Sr1: u32 {
        const SB = 1 << 0;
        const ADDR = 1 << 1;
        const BTF = 1 << 2;
        const RXNE = 1 << 6;
        const TXE = 1 << 7;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Sr2: u32 {
        const MSL = 1 << 0;
        const BUSY = 1 << 1;
        const TRA = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum I2cMode {
    #[default]
    Idle,
    MasterTransmit,
    MasterReceive,
}

pub const BUFFER_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct I2c {
    name: &'static str,
    pub irq: InterruptLine,

    mode: I2cMode,
    client_addr: u32,
    inp_buffer: [u8; BUFFER_CAPACITY],
    inp_size: usize,
    inp_index: usize,
    out_buffer: [u8; BUFFER_CAPACITY],
    out_index: usize,
    sr1_read: bool,
    stop_pending: bool,

    cr1: Cr1,
    cr2: Cr2,
    oar1: u32,
    oar2: u32,
    dr: u32,
    sr1: Sr1,
    sr2: Sr2,
    ccr: u32,
    trise: u32,
    fltr: u32,
}

fn cr1_start_write(s: &mut I2c, _ch: &mut u32, value: &mut u32) {
    if *value & Cr1::START.bits() != 0 {
        s.sr1.remove(Sr1::ADDR | Sr1::TXE);
        s.sr1.insert(Sr1::SB); // start condition generated
        s.sr2.insert(Sr2::MSL | Sr2::BUSY);
        s.out_index = 0;
        s.inp_index = 0;
        s.mode = I2cMode::Idle;
        if s.cr2.contains(Cr2::ITEVTEN) {
            s.irq.pulse();
        }
    }
}

fn cr1_stop_write(s: &mut I2c, _ch: &mut u32, value: &mut u32) {
    if *value & Cr1::STOP.bits() != 0 {
        s.stop_pending = true;
        s.sr2.remove(Sr2::MSL | Sr2::BUSY | Sr2::TRA);
        s.sr1.remove(Sr1::ADDR | Sr1::TXE | Sr1::BTF);
        s.mode = I2cMode::Idle;
    }
}

fn cr1_swrst_write(s: &mut I2c, _ch: &mut u32, value: &mut u32) {
    if *value & Cr1::SWRST.bits() != 0 {
        s.sr2.remove(Sr2::MSL | Sr2::BUSY | Sr2::TRA);
        s.sr1.remove(Sr1::ADDR | Sr1::TXE | Sr1::BTF);
        s.mode = I2cMode::Idle;
    }
}

fn dr_write(s: &mut I2c, ch: &mut u32, value: &mut u32) {
    if s.cr1.contains(Cr1::START) {
        // Address phase: bit 0 selects the transfer direction.
        if *value & 1 != 0 {
            s.mode = I2cMode::MasterReceive;
            s.sr1.remove(Sr1::SB);
            s.sr1.insert(Sr1::ADDR);
            s.sr2.remove(Sr2::TRA);
        } else {
            s.mode = I2cMode::MasterTransmit;
            s.sr1.remove(Sr1::SB);
            s.sr1.insert(Sr1::ADDR | Sr1::TXE);
            s.sr2.insert(Sr2::TRA);
        }
        s.cr1.remove(Cr1::START);
        s.client_addr = *value;
        if s.cr2.contains(Cr2::ITEVTEN) {
            s.irq.pulse();
        }
    } else {
        if s.out_index >= BUFFER_CAPACITY {
            tracing::warn!(
                "{}: transmit buffer overflow, byte {:#04x} dropped",
                s.name,
                *value
            );
        } else {
            s.out_buffer[s.out_index] = *value as u8;
            s.out_index += 1;
        }
        s.sr1.insert(Sr1::TXE | Sr1::BTF);
        if s.cr2.contains(Cr2::ITEVTEN) {
            s.irq.pulse();
        }
    }
    s.dr = *value;
    *ch = 0;
    s.sr1_read = false;
}

fn dr_read(s: &mut I2c) -> u32 {
    let dr = s.dr;
    s.sr1.remove(Sr1::RXNE);
    // Look-ahead priming: make the next buffered byte available before the
    // guest's next read.
    if s.inp_size > s.inp_index
        && s.mode == I2cMode::MasterReceive
        && s.cr2.contains(Cr2::ITEVTEN)
    {
        s.dr = s.inp_buffer[s.inp_index] as u32;
        s.inp_index += 1;
        s.sr1.insert(Sr1::RXNE | Sr1::BTF);
        s.irq.pulse();
    }
    dr
}

fn sr1_read(s: &mut I2c) -> u32 {
    s.sr1_read = true;
    s.sr1.bits()
}

fn sr2_read(s: &mut I2c) -> u32 {
    if s.sr1_read {
        s.sr1.remove(Sr1::ADDR);
        if s.mode == I2cMode::MasterTransmit && s.cr2.contains(Cr2::ITEVTEN) {
            s.sr1.insert(Sr1::TXE);
            s.irq.pulse();
        } else if !s.sr1.contains(Sr1::RXNE)
            && s.inp_size > s.inp_index
            && s.mode == I2cMode::MasterReceive
            && s.cr2.contains(Cr2::ITEVTEN)
        {
            s.dr = s.inp_buffer[s.inp_index] as u32;
            s.inp_index += 1;
            s.sr1.insert(Sr1::RXNE | Sr1::BTF);
            s.irq.pulse();
        }
    }
    s.sr1_read = false;
    s.sr2.bits()
}

static CR1_BITS: [BitField<I2c>; 14] = [
    BitField::flag("PE", 0),
    BitField::flag("SMBUS", 1),
    BitField::flag("SMBTYPE", 3),
    BitField::flag("ENARP", 4),
    BitField::flag("ENPEC", 5),
    BitField::flag("ENGC", 6),
    BitField::flag("NOSTRETCH", 7),
    BitField::flag("START", 8).on_write(cr1_start_write),
    BitField::flag("STOP", 9).on_write(cr1_stop_write),
    BitField::flag("ACK", 10),
    BitField::flag("POS", 11),
    BitField::flag("PEC", 12),
    BitField::flag("ALERT", 13),
    BitField::flag("SWRST", 15).on_write(cr1_swrst_write),
];

static I2C_REGS: [Register<I2c>; 10] = [
    Register::new("CR1", CR1, 0x0, |s: &I2c| s.cr1.bits(), |s, v| {
        s.cr1 = Cr1::from_bits_retain(v)
    })
    .bits(&CR1_BITS),
    Register::new("CR2", CR2, 0x0, |s: &I2c| s.cr2.bits(), |s, v| {
        s.cr2 = Cr2::from_bits_retain(v)
    })
    .log(),
    Register::new("OAR1", OAR1, 0x0, |s: &I2c| s.oar1, |s, v| s.oar1 = v).log(),
    Register::new("OAR2", OAR2, 0x0, |s: &I2c| s.oar2, |s, v| s.oar2 = v).log(),
    Register::new("DR", DR, 0x0, |s: &I2c| s.dr, |s, v| s.dr = v)
        .log()
        .on_write(dr_write)
        .on_read(dr_read),
    Register::new("SR1", SR1, 0x0, |s: &I2c| s.sr1.bits(), |s, v| {
        s.sr1 = Sr1::from_bits_retain(v)
    })
    .log()
    .on_read(sr1_read),
    Register::new("SR2", SR2, 0x0, |s: &I2c| s.sr2.bits(), |s, v| {
        s.sr2 = Sr2::from_bits_retain(v)
    })
    .log()
    .read_only()
    .on_read(sr2_read),
    Register::new("CCR", CCR, 0x0, |s: &I2c| s.ccr, |s, v| s.ccr = v).log(),
    Register::new("TRISE", TRISE, 0x2, |s: &I2c| s.trise, |s, v| s.trise = v).log(),
    Register::new("FLTR", FLTR, 0x0, |s: &I2c| s.fltr, |s, v| s.fltr = v).log(),
];

impl I2c {
    pub fn new(name: &'static str) -> Self {
        let mut i2c = Self {
            name,
            irq: InterruptLine::new(),
            mode: I2cMode::Idle,
            client_addr: 0,
            inp_buffer: [0; BUFFER_CAPACITY],
            inp_size: 0,
            inp_index: 0,
            out_buffer: [0; BUFFER_CAPACITY],
            out_index: 0,
            sr1_read: false,
            stop_pending: false,
            cr1: Cr1::empty(),
            cr2: Cr2::empty(),
            oar1: 0,
            oar2: 0,
            dr: 0,
            sr1: Sr1::empty(),
            sr2: Sr2::empty(),
            ccr: 0,
            trise: 0,
            fltr: 0,
        };
        regbank::reset(&I2C_REGS, &mut i2c);
        i2c
    }

    pub fn mode(&self) -> I2cMode {
        self.mode
    }

    pub fn client_addr(&self) -> u32 {
        self.client_addr
    }

    /// Copy a received byte block into the input buffer (truncating at
    /// capacity). Call [`I2c::input_ready`] afterwards to publish it.
    pub fn load_input(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(BUFFER_CAPACITY);
        self.inp_buffer[..n].copy_from_slice(&bytes[..n]);
    }

    /// Publish `size` buffered input bytes. If a master-receive transfer is
    /// already past its address phase with event interrupts enabled, the
    /// first byte is primed immediately, mirroring the data-register
    /// look-ahead.
    pub fn input_ready(&mut self, size: usize) {
        self.inp_size = size.min(BUFFER_CAPACITY);
        self.inp_index = 0;
        if self.inp_size > 0
            && self.mode == I2cMode::MasterReceive
            && self.cr2.contains(Cr2::ITEVTEN)
            && !self.sr1.contains(Sr1::ADDR)
        {
            self.dr = self.inp_buffer[0] as u32;
            self.inp_index = 1;
            self.sr1.insert(Sr1::RXNE | Sr1::BTF);
            self.irq.pulse();
        }
    }

    /// Harvest the transmit bytes accumulated up to a STOP condition.
    /// Returns `None` when no STOP occurred since the last harvest.
    pub fn take_stop_transaction(&mut self) -> Option<Vec<u8>> {
        if !self.stop_pending {
            return None;
        }
        self.stop_pending = false;
        let bytes = self.out_buffer[..self.out_index].to_vec();
        self.out_index = 0;
        self.out_buffer[0] = 0;
        Some(bytes)
    }
}

impl MmioDevice for I2c {
    fn read(&mut self, offset: u64, size: u32) -> u64 {
        let name = self.name;
        regbank::read(&I2C_REGS, name, self, offset, size)
    }

    fn write(&mut self, offset: u64, value: u64, size: u32) {
        let name = self.name;
        regbank::write(&I2C_REGS, name, self, offset, value, size);
    }

    fn reset(&mut self) {
        regbank::reset(&I2C_REGS, self);
        self.mode = I2cMode::Idle;
        self.client_addr = 0;
        self.inp_buffer = [0; BUFFER_CAPACITY];
        self.inp_size = 0;
        self.inp_index = 0;
        self.out_buffer = [0; BUFFER_CAPACITY];
        self.out_index = 0;
        self.sr1_read = false;
        self.stop_pending = false;
        self.irq.clear();
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "cr1": self.cr1.bits(),
            "cr2": self.cr2.bits(),
            "oar1": self.oar1,
            "oar2": self.oar2,
            "dr": self.dr,
            "sr1": self.sr1.bits(),
            "sr2": self.sr2.bits(),
            "ccr": self.ccr,
            "trise": self.trise,
            "fltr": self.fltr,
            "client_addr": self.client_addr,
            "out_index": self.out_index,
            "inp_size": self.inp_size,
            "inp_index": self.inp_index,
        })
    }
}
