// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Virtual time and the clock derivation tree.
//!
//! Periods are stored in units of 2^-32 ns so that tick/nanosecond
//! conversions stay exact at MHz rates. The tree supports retuning the
//! multiplier/divisor of an already-connected node and propagating the
//! resulting period change to every descendant exactly once, with a
//! pre-update/post-update notification pair per changed node. The pair lets
//! an armed timer freeze its elapsed count at the old rate and re-arm the
//! remainder at the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One second, in period units of 2^-32 ns.
pub const CLOCK_PERIOD_1SEC: u64 = 1_000_000_000u64 << 32;

pub const fn period_from_hz(hz: u64) -> u64 {
    if hz == 0 {
        0
    } else {
        CLOCK_PERIOD_1SEC / hz
    }
}

pub const fn period_to_hz(period: u64) -> u64 {
    if period == 0 {
        0
    } else {
        CLOCK_PERIOD_1SEC / period
    }
}

pub fn ticks_to_ns(period: u64, ticks: u64) -> u64 {
    ((period as u128 * ticks as u128) >> 32) as u64
}

pub fn ns_to_ticks(period: u64, ns: u64) -> u64 {
    if period == 0 {
        0
    } else {
        (((ns as u128) << 32) / period as u128) as u64
    }
}

/// Monotonic virtual-time source shared across threads.
///
/// Guest-side code advances it; the bridge reads it for outbound timestamps.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    ns: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::Acquire)
    }

    pub fn set_ns(&self, ns: u64) {
        self.ns.store(ns, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(usize);

/// Propagation notification phases, delivered per changed node: `PreUpdate`
/// while the node still carries its old period, `Update` once the new period
/// is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPhase {
    PreUpdate,
    Update,
}

#[derive(Debug)]
struct ClockNode {
    name: &'static str,
    period: u64,
    multiplier: u32,
    divider: u32,
    children: Vec<ClockId>,
}

impl ClockNode {
    /// Period this node presents to its children.
    fn child_period(&self) -> u64 {
        (self.period as u128 * self.multiplier as u128 / self.divider as u128) as u64
    }
}

/// Arena-backed frequency-derivation tree.
#[derive(Debug, Default)]
pub struct ClockTree {
    nodes: Vec<ClockNode>,
}

impl ClockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: &'static str, hz: u64) -> ClockId {
        let id = ClockId(self.nodes.len());
        self.nodes.push(ClockNode {
            name,
            period: period_from_hz(hz),
            multiplier: 1,
            divider: 1,
            children: Vec::new(),
        });
        id
    }

    pub fn add_child(&mut self, parent: ClockId, name: &'static str) -> ClockId {
        let id = ClockId(self.nodes.len());
        let period = self.nodes[parent.0].child_period();
        self.nodes.push(ClockNode {
            name,
            period,
            multiplier: 1,
            divider: 1,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn period(&self, id: ClockId) -> u64 {
        self.nodes[id.0].period
    }

    pub fn hz(&self, id: ClockId) -> u64 {
        period_to_hz(self.nodes[id.0].period)
    }

    pub fn name(&self, id: ClockId) -> &'static str {
        self.nodes[id.0].name
    }

    /// Retune a node's output ratio. With `propagate` set, every descendant
    /// whose period actually changes gets a PreUpdate notification (old
    /// period still visible), the new period, then an Update notification,
    /// before its own children are visited. `on_event` receives the changed
    /// node, the phase, and the period the node carries in that phase.
    pub fn set_mul_div(
        &mut self,
        id: ClockId,
        multiplier: u32,
        divider: u32,
        propagate: bool,
        on_event: &mut dyn FnMut(ClockId, ClockPhase, u64),
    ) {
        assert!(multiplier != 0, "clock multiplier must be non-zero");
        assert!(divider != 0, "clock divider must be non-zero");

        self.nodes[id.0].multiplier = multiplier;
        self.nodes[id.0].divider = divider;

        if propagate {
            self.propagate_period(id, on_event);
        }
    }

    fn propagate_period(
        &mut self,
        id: ClockId,
        on_event: &mut dyn FnMut(ClockId, ClockPhase, u64),
    ) {
        let child_period = self.nodes[id.0].child_period();
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let old = self.nodes[child.0].period;
            if old == child_period {
                continue;
            }
            tracing::debug!(
                "clock {}: period {} -> {} ({} Hz)",
                self.nodes[child.0].name,
                old,
                child_period,
                period_to_hz(child_period)
            );
            on_event(child, ClockPhase::PreUpdate, old);
            self.nodes[child.0].period = child_period;
            on_event(child, ClockPhase::Update, child_period);
            self.propagate_period(child, on_event);
        }
    }
}
