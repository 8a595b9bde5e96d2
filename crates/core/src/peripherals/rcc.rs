// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Reset and clock control.
//!
//! Oscillator and PLL ready bits answer instantly (the model has no startup
//! latency), and the APB prescaler fields in CFGR translate into ratio
//! commands for the clock tree. Register hooks only see the RCC state, so
//! the commands are queued here and drained by the SoC after the write
//! returns. Clock gating itself (the ENR registers) is observability-only.

use crate::regbank::{self, log_bit_change, log_unhandled_change, Register};
use crate::MmioDevice;

pub const CR: u64 = 0x00;
pub const PLLCFGR: u64 = 0x04;
pub const CFGR: u64 = 0x08;
pub const CIR: u64 = 0x0c;
pub const AHB1RSTR: u64 = 0x10;
pub const AHB2RSTR: u64 = 0x14;
pub const AHB3RSTR: u64 = 0x18;
pub const APB1RSTR: u64 = 0x20;
pub const APB2RSTR: u64 = 0x24;
pub const AHB1ENR: u64 = 0x30;
pub const AHB2ENR: u64 = 0x34;
pub const AHB3ENR: u64 = 0x38;
pub const APB1ENR: u64 = 0x40;
pub const APB2ENR: u64 = 0x44;
pub const AHB1LPENR: u64 = 0x50;
pub const AHB2LPENR: u64 = 0x54;
pub const AHB3LPENR: u64 = 0x58;
pub const APB1LPENR: u64 = 0x60;
pub const APB2LPENR: u64 = 0x64;
pub const BDCR: u64 = 0x70;
pub const CSR: u64 = 0x74;
pub const SSCGR: u64 = 0x80;
pub const PLLI2SCFGR: u64 = 0x84;
pub const PLLSAICFGR: u64 = 0x88;
pub const DCKCFGR: u64 = 0x8c;
pub const CKGATENR: u64 = 0x90;
pub const DCKCFGR2: u64 = 0x94;

const CR_HSEON: u32 = 1 << 16;
const CR_HSERDY: u32 = 1 << 17;
const CR_PLLON: u32 = 1 << 24;
const CR_PLLRDY: u32 = 1 << 25;

const CFGR_SW_MASK: u32 = 0x3;
const CFGR_SWS_MASK: u32 = 0xc;
const CFGR_PPRE1_LSB: u32 = 10;
const CFGR_PPRE2_LSB: u32 = 13;
const CFGR_PPRE_MASK: u32 = 0x7;

/// Which tree node a queued ratio command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTarget {
    Apb1,
    Apb1Timer,
    Apb2,
    Apb2Timer,
}

/// A staged multiplier/divider update for the clock tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCommand {
    pub target: ClockTarget,
    pub multiplier: u32,
    pub divider: u32,
    pub propagate: bool,
}

#[derive(Debug, Default)]
pub struct Rcc {
    pending: Vec<ClockCommand>,

    cr: u32,
    pllcfgr: u32,
    cfgr: u32,
    cir: u32,
    ahb1rstr: u32,
    ahb2rstr: u32,
    ahb3rstr: u32,
    apb1rstr: u32,
    apb2rstr: u32,
    ahb1enr: u32,
    ahb2enr: u32,
    ahb3enr: u32,
    apb1enr: u32,
    apb2enr: u32,
    ahb1lpenr: u32,
    ahb2lpenr: u32,
    ahb3lpenr: u32,
    apb1lpenr: u32,
    apb2lpenr: u32,
    bdcr: u32,
    csr: u32,
    sscgr: u32,
    plli2scfgr: u32,
    pllsaicfgr: u32,
    dckcfgr: u32,
    ckgatenr: u32,
    dckcfgr2: u32,
}

const DEVICE: &str = "rcc";

fn cr_write(_s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    // Oscillator enables get ready instantly.
    if *ch & CR_HSEON != 0 {
        let hseon = *value & CR_HSEON != 0;
        *value = (*value & !CR_HSERDY) | if hseon { CR_HSERDY } else { 0 };
        *ch &= !(CR_HSEON | CR_HSERDY);
        tracing::debug!("{}: CR HSEON: {}", DEVICE, hseon as u32);
    }
    if *ch & CR_PLLON != 0 {
        let pllon = *value & CR_PLLON != 0;
        *value = (*value & !CR_PLLRDY) | if pllon { CR_PLLRDY } else { 0 };
        *ch &= !(CR_PLLON | CR_PLLRDY);
        tracing::debug!("{}: CR PLLON: {}", DEVICE, pllon as u32);
    }
}

fn pllcfgr_write(_s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    tracing::debug!("{}: PLLCFGR: {:#x}", DEVICE, *value);
    *ch = 0;
}

fn ppre_commands(ppre: u32, bus: ClockTarget, timer: ClockTarget) -> [ClockCommand; 2] {
    // 0xx: bus clock not divided; 100..111: divided by 2^(ppre-3). The
    // timer clock runs at twice the divided bus clock whenever a divider is
    // active. The timer ratio is staged without propagation; the bus ratio
    // then propagates, so every descendant sees exactly one update.
    if ppre > 3 {
        [
            ClockCommand {
                target: timer,
                multiplier: 1,
                divider: 2,
                propagate: false,
            },
            ClockCommand {
                target: bus,
                multiplier: 1 << (ppre - 3),
                divider: 1,
                propagate: true,
            },
        ]
    } else {
        [
            ClockCommand {
                target: timer,
                multiplier: 1,
                divider: 1,
                propagate: false,
            },
            ClockCommand {
                target: bus,
                multiplier: 1,
                divider: 1,
                propagate: true,
            },
        ]
    }
}

fn cfgr_write(s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    let ppre1_field = CFGR_PPRE_MASK << CFGR_PPRE1_LSB;
    if *ch & ppre1_field != 0 {
        *ch &= !ppre1_field;
        let ppre1 = (*value & ppre1_field) >> CFGR_PPRE1_LSB;
        tracing::debug!("{}: CFGR PPRE1: {}", DEVICE, ppre1);
        s.pending
            .extend(ppre_commands(ppre1, ClockTarget::Apb1, ClockTarget::Apb1Timer));
    }

    let ppre2_field = CFGR_PPRE_MASK << CFGR_PPRE2_LSB;
    if *ch & ppre2_field != 0 {
        *ch &= !ppre2_field;
        let ppre2 = (*value & ppre2_field) >> CFGR_PPRE2_LSB;
        tracing::debug!("{}: CFGR PPRE2: {}", DEVICE, ppre2);
        s.pending
            .extend(ppre_commands(ppre2, ClockTarget::Apb2, ClockTarget::Apb2Timer));
    }

    if *ch & CFGR_SW_MASK != 0 {
        *ch &= !(CFGR_SW_MASK | CFGR_SWS_MASK);
        let sw = *value & CFGR_SW_MASK;
        tracing::debug!("{}: CFGR SW: {}", DEVICE, sw);
        // The source switch takes effect instantly; SWS mirrors SW.
        *value = (*value & !CFGR_SWS_MASK) | (sw << 2);
    }
}

fn ahb1enr_write(_s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    for (bit, lsb) in [
        ("GPIOAEN", 0u32),
        ("GPIOBEN", 1),
        ("GPIOCEN", 2),
        ("GPIODEN", 3),
        ("GPIOEEN", 4),
        ("GPIOFEN", 5),
        ("GPIOGEN", 6),
        ("GPIOHEN", 7),
    ] {
        log_bit_change(*value, ch, DEVICE, "AHB1ENR", bit, lsb);
    }
    if *ch != 0 {
        log_unhandled_change(DEVICE, "AHB1ENR", *ch, *value);
        *ch = 0;
    }
}

fn apb1enr_write(_s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    for (bit, lsb) in [
        ("TIM2EN", 0u32),
        ("TIM3EN", 1),
        ("TIM4EN", 2),
        ("TIM5EN", 3),
        ("TIM6EN", 4),
        ("TIM7EN", 5),
        ("SPI2EN", 14),
        ("I2C1EN", 21),
        ("I2C2EN", 22),
        ("I2C3EN", 23),
        ("PWREN", 28),
    ] {
        log_bit_change(*value, ch, DEVICE, "APB1ENR", bit, lsb);
    }
    if *ch != 0 {
        log_unhandled_change(DEVICE, "APB1ENR", *ch, *value);
        *ch = 0;
    }
}

fn apb2enr_write(_s: &mut Rcc, ch: &mut u32, value: &mut u32) {
    for (bit, lsb) in [("TIM1EN", 0u32), ("SPI1EN", 12), ("SYSCFGEN", 14)] {
        log_bit_change(*value, ch, DEVICE, "APB2ENR", bit, lsb);
    }
    if *ch != 0 {
        log_unhandled_change(DEVICE, "APB2ENR", *ch, *value);
        *ch = 0;
    }
}

static RCC_REGS: [Register<Rcc>; 27] = [
    Register::new("CR", CR, 0x0000_0083, |s: &Rcc| s.cr, |s, v| s.cr = v).on_write(cr_write),
    Register::new("PLLCFGR", PLLCFGR, 0x2400_3010, |s: &Rcc| s.pllcfgr, |s, v| s.pllcfgr = v)
        .on_write(pllcfgr_write),
    Register::new("CFGR", CFGR, 0x0, |s: &Rcc| s.cfgr, |s, v| s.cfgr = v).on_write(cfgr_write),
    Register::new("CIR", CIR, 0x0, |s: &Rcc| s.cir, |s, v| s.cir = v),
    Register::new("AHB1RSTR", AHB1RSTR, 0x0, |s: &Rcc| s.ahb1rstr, |s, v| s.ahb1rstr = v),
    Register::new("AHB2RSTR", AHB2RSTR, 0x0, |s: &Rcc| s.ahb2rstr, |s, v| s.ahb2rstr = v),
    Register::new("AHB3RSTR", AHB3RSTR, 0x0, |s: &Rcc| s.ahb3rstr, |s, v| s.ahb3rstr = v),
    Register::new("APB1RSTR", APB1RSTR, 0x0, |s: &Rcc| s.apb1rstr, |s, v| s.apb1rstr = v),
    Register::new("APB2RSTR", APB2RSTR, 0x0, |s: &Rcc| s.apb2rstr, |s, v| s.apb2rstr = v),
    Register::new("AHB1ENR", AHB1ENR, 0x0, |s: &Rcc| s.ahb1enr, |s, v| s.ahb1enr = v)
        .on_write(ahb1enr_write),
    Register::new("AHB2ENR", AHB2ENR, 0x0, |s: &Rcc| s.ahb2enr, |s, v| s.ahb2enr = v),
    Register::new("AHB3ENR", AHB3ENR, 0x0, |s: &Rcc| s.ahb3enr, |s, v| s.ahb3enr = v),
    Register::new("APB1ENR", APB1ENR, 0x0, |s: &Rcc| s.apb1enr, |s, v| s.apb1enr = v)
        .on_write(apb1enr_write),
    Register::new("APB2ENR", APB2ENR, 0x0, |s: &Rcc| s.apb2enr, |s, v| s.apb2enr = v)
        .on_write(apb2enr_write),
    Register::new("AHB1LPENR", AHB1LPENR, 0x6067_90FF, |s: &Rcc| s.ahb1lpenr, |s, v| {
        s.ahb1lpenr = v
    }),
    Register::new("AHB2LPENR", AHB2LPENR, 0x0000_0081, |s: &Rcc| s.ahb2lpenr, |s, v| {
        s.ahb2lpenr = v
    }),
    Register::new("AHB3LPENR", AHB3LPENR, 0x0000_0003, |s: &Rcc| s.ahb3lpenr, |s, v| {
        s.ahb3lpenr = v
    }),
    Register::new("APB1LPENR", APB1LPENR, 0x3FFF_C9FF, |s: &Rcc| s.apb1lpenr, |s, v| {
        s.apb1lpenr = v
    }),
    Register::new("APB2LPENR", APB2LPENR, 0x00C7_7F33, |s: &Rcc| s.apb2lpenr, |s, v| {
        s.apb2lpenr = v
    }),
    Register::new("BDCR", BDCR, 0x0, |s: &Rcc| s.bdcr, |s, v| s.bdcr = v),
    Register::new("CSR", CSR, 0x0E00_0000, |s: &Rcc| s.csr, |s, v| s.csr = v),
    Register::new("SSCGR", SSCGR, 0x0, |s: &Rcc| s.sscgr, |s, v| s.sscgr = v),
    Register::new("PLLI2SCFGR", PLLI2SCFGR, 0x2400_3010, |s: &Rcc| s.plli2scfgr, |s, v| {
        s.plli2scfgr = v
    }),
    Register::new("PLLSAICFGR", PLLSAICFGR, 0x0400_3010, |s: &Rcc| s.pllsaicfgr, |s, v| {
        s.pllsaicfgr = v
    }),
    Register::new("DCKCFGR", DCKCFGR, 0x0, |s: &Rcc| s.dckcfgr, |s, v| s.dckcfgr = v),
    Register::new("CKGATENR", CKGATENR, 0x0, |s: &Rcc| s.ckgatenr, |s, v| s.ckgatenr = v),
    Register::new("DCKCFGR2", DCKCFGR2, 0x0, |s: &Rcc| s.dckcfgr2, |s, v| s.dckcfgr2 = v),
];

impl Rcc {
    pub fn new() -> Self {
        let mut rcc = Self::default();
        regbank::reset(&RCC_REGS, &mut rcc);
        rcc
    }

    /// Drain the ratio commands staged by CFGR writes. The SoC applies them
    /// to the clock tree.
    pub fn take_clock_updates(&mut self) -> Vec<ClockCommand> {
        std::mem::take(&mut self.pending)
    }
}

impl MmioDevice for Rcc {
    fn read(&mut self, offset: u64, size: u32) -> u64 {
        regbank::read(&RCC_REGS, DEVICE, self, offset, size)
    }

    fn write(&mut self, offset: u64, value: u64, size: u32) {
        regbank::write(&RCC_REGS, DEVICE, self, offset, value, size);
    }

    fn reset(&mut self) {
        regbank::reset(&RCC_REGS, self);
        self.pending.clear();
        // Both APB ratio pairs return to 1:1.
        for target in [
            ClockTarget::Apb1Timer,
            ClockTarget::Apb2Timer,
            ClockTarget::Apb1,
            ClockTarget::Apb2,
        ] {
            self.pending.push(ClockCommand {
                target,
                multiplier: 1,
                divider: 1,
                propagate: matches!(target, ClockTarget::Apb1 | ClockTarget::Apb2),
            });
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "cr": self.cr,
            "pllcfgr": self.pllcfgr,
            "cfgr": self.cfgr,
            "ahb1enr": self.ahb1enr,
            "apb1enr": self.apb1enr,
            "apb2enr": self.apb2enr,
            "csr": self.csr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_values() {
        let mut rcc = Rcc::new();
        assert_eq!(rcc.read(CR, 4), 0x0000_0083); // HSI ready
        assert_eq!(rcc.read(PLLCFGR, 4), 0x2400_3010);
        assert_eq!(rcc.read(APB1LPENR, 4), 0x3FFF_C9FF);
        assert_eq!(rcc.read(CSR, 4), 0x0E00_0000);
    }

    #[test]
    fn test_hse_and_pll_ready_instantly() {
        let mut rcc = Rcc::new();
        rcc.write(CR, 0x83 | CR_HSEON as u64, 4);
        let cr = rcc.read(CR, 4) as u32;
        assert_ne!(cr & CR_HSERDY, 0);

        rcc.write(CR, (cr | CR_PLLON) as u64, 4);
        let cr = rcc.read(CR, 4) as u32;
        assert_ne!(cr & CR_PLLRDY, 0);

        // Switching HSE back off drops the ready bit.
        rcc.write(CR, (cr & !CR_HSEON) as u64, 4);
        assert_eq!(rcc.read(CR, 4) as u32 & CR_HSERDY, 0);
    }

    #[test]
    fn test_cfgr_ppre1_stages_ratio_commands() {
        let mut rcc = Rcc::new();
        // PPRE1 = 0b101: divide by 4, timer clock at 2x the bus clock.
        rcc.write(CFGR, (0b101u64) << CFGR_PPRE1_LSB, 4);
        let cmds = rcc.take_clock_updates();
        assert_eq!(
            cmds,
            vec![
                ClockCommand {
                    target: ClockTarget::Apb1Timer,
                    multiplier: 1,
                    divider: 2,
                    propagate: false,
                },
                ClockCommand {
                    target: ClockTarget::Apb1,
                    multiplier: 4,
                    divider: 1,
                    propagate: true,
                },
            ]
        );
        // Drained: a second take yields nothing.
        assert!(rcc.take_clock_updates().is_empty());
    }

    #[test]
    fn test_cfgr_sw_switch_reflected_in_sws() {
        let mut rcc = Rcc::new();
        rcc.write(CFGR, 0x2, 4);
        let cfgr = rcc.read(CFGR, 4) as u32;
        assert_eq!(cfgr & CFGR_SW_MASK, 0x2);
        assert_eq!((cfgr & CFGR_SWS_MASK) >> 2, 0x2);
    }

    #[test]
    fn test_enable_register_stores_value() {
        let mut rcc = Rcc::new();
        rcc.write(APB1ENR, 0x0040_0001, 4); // I2C2EN | TIM2EN
        assert_eq!(rcc.read(APB1ENR, 4), 0x0040_0001);
    }
}
