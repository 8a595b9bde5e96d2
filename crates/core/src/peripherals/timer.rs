// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! STM32F4-style general-purpose timer (up-counting only).
//!
//! The timer does not tick: it arms a virtual-time alarm for the whole
//! period, (auto-reload+1) x (prescaler+1) x (repetition+1) clock ticks, and
//! derives the live counter value lazily from elapsed virtual time whenever
//! the guest reads CNT. A clock-rate change arrives as a pre-update /
//! post-update pair from the clock tree: the pre phase freezes the elapsed
//! tick count at the old rate, the post phase re-arms the alarm for the
//! remaining ticks at the new rate.

use crate::clock::{ns_to_ticks, ticks_to_ns, VirtualClock};
use crate::regbank::{self, Register};
use crate::signals::InterruptLine;
use crate::MmioDevice;

pub const CR1: u64 = 0x00;
pub const CR2: u64 = 0x04;
pub const SMCR: u64 = 0x08;
pub const DIER: u64 = 0x0c;
pub const SR: u64 = 0x10;
pub const EGR: u64 = 0x14;
pub const CCMR1: u64 = 0x18;
pub const CCMR2: u64 = 0x1c;
pub const CCER: u64 = 0x20;
pub const CNT: u64 = 0x24;
pub const PSC: u64 = 0x28;
pub const ARR: u64 = 0x2c;
pub const RCR: u64 = 0x30;
pub const CCR1: u64 = 0x34;
pub const CCR2: u64 = 0x38;
pub const CCR3: u64 = 0x3c;
pub const CCR4: u64 = 0x40;
pub const BDTR: u64 = 0x44;
pub const DCR: u64 = 0x48;
pub const DMAR: u64 = 0x4c;
pub const OR: u64 = 0x50;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimCr1: u32 {
        const CEN = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimDier: u32 {
        const UIE = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimSr: u32 {
        const UIF = 1 << 0;
    }
}

#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    pub irq: InterruptLine,
    vclock: VirtualClock,

    /// Tick period of the driving clock node, cached across rate changes.
    tick_period: u64,
    /// Total alarm ticks; the counter is only meaningful while non-zero.
    ticks: u64,
    start_time_ns: u64,
    deadline_ns: Option<u64>,

    cr1: TimCr1,
    cr2: u32,
    smcr: u32,
    dier: TimDier,
    sr: TimSr,
    egr: u32,
    ccmr1: u32,
    ccmr2: u32,
    ccer: u32,
    cnt: u32,
    psc: u32,
    arr: u32,
    rcr: u32,
    pub ccr1: u32,
    ccr2: u32,
    ccr3: u32,
    ccr4: u32,
    bdtr: u32,
    dcr: u32,
    dmar: u32,
    or_: u32,
}

fn cr1_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    let cen_changed = (s.cr1.bits() ^ *value) & TimCr1::CEN.bits() != 0;
    s.cr1 = TimCr1::from_bits_retain(*value);
    if cen_changed {
        s.enable_changed();
    }
    *ch = 0;
}

// Status flags are set by hardware and cleared by software writing zero.
fn sr_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    *value &= s.sr.bits();
    *ch = 0;
}

fn egr_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    const UG: u32 = 1;
    s.egr = *value;
    if *value & UG != 0 {
        s.set_alarm();
    }
    *ch = 0;
}

fn psc_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    *value &= 0xFFFF;
    s.psc = *value;
    s.set_alarm();
    *ch = 0;
}

fn arr_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    s.arr = *value;
    s.set_alarm();
    *ch = 0;
}

fn rcr_write(s: &mut Timer, ch: &mut u32, value: &mut u32) {
    s.rcr = *value;
    s.set_alarm();
    *ch = 0;
}

fn cnt_read(s: &mut Timer) -> u32 {
    s.current_count()
}

static TIMER_REGS: [Register<Timer>; 21] = [
    Register::new("CR1", CR1, 0x0, |s: &Timer| s.cr1.bits(), |s, v| {
        s.cr1 = TimCr1::from_bits_retain(v)
    })
    .on_write(cr1_write),
    Register::new("CR2", CR2, 0x0, |s: &Timer| s.cr2, |s, v| s.cr2 = v),
    Register::new("SMCR", SMCR, 0x0, |s: &Timer| s.smcr, |s, v| s.smcr = v),
    Register::new("DIER", DIER, 0x0, |s: &Timer| s.dier.bits(), |s, v| {
        s.dier = TimDier::from_bits_retain(v)
    }),
    Register::new("SR", SR, 0x0, |s: &Timer| s.sr.bits(), |s, v| {
        s.sr = TimSr::from_bits_retain(v)
    })
    .on_write(sr_write),
    Register::new("EGR", EGR, 0x0, |s: &Timer| s.egr, |s, v| s.egr = v).on_write(egr_write),
    Register::new("CCMR1", CCMR1, 0x0, |s: &Timer| s.ccmr1, |s, v| s.ccmr1 = v),
    Register::new("CCMR2", CCMR2, 0x0, |s: &Timer| s.ccmr2, |s, v| s.ccmr2 = v),
    Register::new("CCER", CCER, 0x0, |s: &Timer| s.ccer, |s, v| s.ccer = v),
    // Guest CNT writes are unmodeled: the counter is derived from virtual
    // time (the bridge pokes the field directly for the encoder feed).
    Register::new("CNT", CNT, 0x0, |s: &Timer| s.cnt, |s, v| s.cnt = v)
        .read_only()
        .on_read(cnt_read),
    Register::new("PSC", PSC, 0x0, |s: &Timer| s.psc, |s, v| s.psc = v).on_write(psc_write),
    Register::new("ARR", ARR, 0x0, |s: &Timer| s.arr, |s, v| s.arr = v).on_write(arr_write),
    Register::new("RCR", RCR, 0x0, |s: &Timer| s.rcr, |s, v| s.rcr = v).on_write(rcr_write),
    Register::new("CCR1", CCR1, 0x0, |s: &Timer| s.ccr1, |s, v| s.ccr1 = v),
    Register::new("CCR2", CCR2, 0x0, |s: &Timer| s.ccr2, |s, v| s.ccr2 = v),
    Register::new("CCR3", CCR3, 0x0, |s: &Timer| s.ccr3, |s, v| s.ccr3 = v),
    Register::new("CCR4", CCR4, 0x0, |s: &Timer| s.ccr4, |s, v| s.ccr4 = v),
    Register::new("BDTR", BDTR, 0x0, |s: &Timer| s.bdtr, |s, v| s.bdtr = v),
    Register::new("DCR", DCR, 0x0, |s: &Timer| s.dcr, |s, v| s.dcr = v),
    Register::new("DMAR", DMAR, 0x0, |s: &Timer| s.dmar, |s, v| s.dmar = v),
    Register::new("OR", OR, 0x0, |s: &Timer| s.or_, |s, v| s.or_ = v),
];

impl Timer {
    pub fn new(name: &'static str, vclock: VirtualClock, tick_period: u64) -> Self {
        let mut timer = Self {
            name,
            irq: InterruptLine::new(),
            vclock,
            tick_period,
            ticks: 0,
            start_time_ns: 0,
            deadline_ns: None,
            cr1: TimCr1::empty(),
            cr2: 0,
            smcr: 0,
            dier: TimDier::empty(),
            sr: TimSr::empty(),
            egr: 0,
            ccmr1: 0,
            ccmr2: 0,
            ccer: 0,
            cnt: 0,
            psc: 0,
            arr: 0,
            rcr: 0,
            ccr1: 0,
            ccr2: 0,
            ccr3: 0,
            ccr4: 0,
            bdtr: 0,
            dcr: 0,
            dmar: 0,
            or_: 0,
        };
        regbank::reset(&TIMER_REGS, &mut timer);
        timer
    }

    fn is_enabled(&self) -> bool {
        self.cr1.contains(TimCr1::CEN)
    }

    fn enable_changed(&mut self) {
        tracing::debug!("{}: enabled/disabled: {:#x}", self.name, self.cr1.bits());
        self.set_alarm();
        if self.ticks > 0 {
            tracing::debug!("{}: alarm set in {} ticks", self.name, self.ticks);
        }
    }

    /// Recompute and arm the alarm for a full period. Only up-counting is
    /// modeled.
    fn set_alarm(&mut self) {
        self.cnt = 0;
        if !self.is_enabled() || self.arr == 0 {
            self.ticks = 0;
            self.deadline_ns = None;
            return;
        }

        let now = self.vclock.now_ns();
        self.ticks =
            (self.arr as u64 + 1) * (self.psc as u64 + 1) * (self.rcr as u64 + 1);
        self.deadline_ns = Some(now + ticks_to_ns(self.tick_period, self.ticks));
        self.start_time_ns = now;
    }

    /// Counter value derived from elapsed virtual time, clamped to the
    /// armed period.
    pub fn current_count(&mut self) -> u32 {
        if self.ticks > 0 {
            let elapsed = self.vclock.now_ns() - self.start_time_ns;
            let now_ticks = ns_to_ticks(self.tick_period, elapsed);
            if now_ticks < self.ticks {
                self.cnt = now_ticks as u32;
            }
        }
        self.cnt
    }

    /// Next armed alarm deadline, if any.
    pub fn deadline_ns(&self) -> Option<u64> {
        self.deadline_ns
    }

    /// Alarm expiry: latch the update flag, pulse, and free-run into the
    /// next period.
    pub fn fire(&mut self) {
        self.deadline_ns = None;
        if self.dier.contains(TimDier::UIE) && self.is_enabled() {
            self.sr.insert(TimSr::UIF);
            self.irq.pulse();
            self.set_alarm();
        }
    }

    /// Clock-tree pre-update notification: freeze the elapsed tick count at
    /// the outgoing rate.
    pub fn clock_pre_update(&mut self) {
        tracing::debug!("{}: clock source pre-update", self.name);
        if self.ticks > 0 {
            self.current_count();
        }
    }

    /// Clock-tree post-update notification: adopt the new rate and re-arm
    /// for the remaining ticks.
    pub fn clock_update(&mut self, new_period: u64) {
        tracing::debug!("{}: clock source update", self.name);
        self.tick_period = new_period;
        if self.ticks > 0 {
            let now = self.vclock.now_ns();
            self.deadline_ns =
                Some(now + ticks_to_ns(self.tick_period, self.ticks - self.cnt as u64));
        }
    }

    pub fn auto_reload(&self) -> u32 {
        self.arr
    }

    /// Direct counter poke for the bridge's encoder feed; bypasses the
    /// alarm, exactly like the reference writing the counter field.
    pub fn force_count(&mut self, cnt: u32) {
        self.cnt = cnt;
    }

    pub fn raw_count(&self) -> u32 {
        self.cnt
    }
}

impl MmioDevice for Timer {
    fn read(&mut self, offset: u64, size: u32) -> u64 {
        let name = self.name;
        regbank::read(&TIMER_REGS, name, self, offset, size)
    }

    fn write(&mut self, offset: u64, value: u64, size: u32) {
        let name = self.name;
        regbank::write(&TIMER_REGS, name, self, offset, value, size);
    }

    fn reset(&mut self) {
        regbank::reset(&TIMER_REGS, self);
        self.ticks = 0;
        self.start_time_ns = 0;
        self.deadline_ns = None;
        self.irq.clear();
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "cr1": self.cr1.bits(),
            "cr2": self.cr2,
            "smcr": self.smcr,
            "dier": self.dier.bits(),
            "sr": self.sr.bits(),
            "egr": self.egr,
            "ccmr1": self.ccmr1,
            "ccmr2": self.ccmr2,
            "ccer": self.ccer,
            "cnt": self.cnt,
            "psc": self.psc,
            "arr": self.arr,
            "rcr": self.rcr,
            "ccr1": self.ccr1,
            "ccr2": self.ccr2,
            "ccr3": self.ccr3,
            "ccr4": self.ccr4,
            "bdtr": self.bdtr,
            "dcr": self.dcr,
            "dmar": self.dmar,
            "or": self.or_,
            "ticks": self.ticks,
        })
    }
}
