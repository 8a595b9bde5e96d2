// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Flat-field board state snapshots for inspection and bring-up tooling.

use crate::board::Soc;
use crate::MmioDevice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub virtual_time_ns: u64,
    pub peripherals: BTreeMap<String, serde_json::Value>,
}

impl BoardSnapshot {
    pub fn capture(soc: &Soc) -> Self {
        let mut peripherals = BTreeMap::new();
        peripherals.insert("i2c2".to_string(), soc.i2c2.snapshot());
        for (i, timer) in soc.tim.iter().enumerate() {
            peripherals.insert(format!("tim{}", i + 2), timer.snapshot());
        }
        peripherals.insert("rcc".to_string(), soc.rcc.snapshot());
        Self {
            virtual_time_ns: soc.vclock.now_ns(),
            peripherals,
        }
    }
}
