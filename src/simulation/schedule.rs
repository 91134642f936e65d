//! # Phase Schedule Allocator
//!
//! Converts phase weights and a real-time budget into per-phase delays.
//!
//! Each phase receives a share of the budget proportional to its nominal duration in
//! minutes. Every phase but the last is floored (minimum one second); the last phase
//! absorbs the rounding remainder so the allocation sums exactly to the budget.
//!
//! ```rust
//! use greenhouse_core::simulation::schedule::{allocate, PhaseWeight};
//!
//! let phases = [PhaseWeight::new(0, 72.0 * 60.0), PhaseWeight::new(1, 336.0 * 60.0)];
//! let schedule = allocate(&phases, 10.0).unwrap();
//! assert_eq!(schedule.seconds_for(0), Some(105));
//! assert_eq!(schedule.seconds_for(1), Some(495));
//! assert_eq!(schedule.total_seconds(), 600);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weight of one phase, in nominal minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseWeight {
    pub phase_index: i32,
    pub minutes: f64,
}

impl PhaseWeight {
    pub fn new(phase_index: i32, minutes: f64) -> Self {
        Self {
            phase_index,
            minutes,
        }
    }

    fn effective_minutes(&self) -> f64 {
        if self.minutes.is_finite() && self.minutes > 0.0 {
            self.minutes
        } else {
            0.0
        }
    }
}

/// phase_index -> allocated seconds (each value >= 1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseScheduleMap(BTreeMap<i32, u64>);

impl PhaseScheduleMap {
    pub fn seconds_for(&self, phase_index: i32) -> Option<u64> {
        self.0.get(&phase_index).copied()
    }

    pub fn total_seconds(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.0.iter().map(|(index, seconds)| (*index, *seconds))
    }
}

/// Budget in seconds targeted by an allocation: `round(budget_minutes * 60)`.
pub fn target_seconds(budget_minutes: f64) -> u64 {
    (budget_minutes * 60.0).round().max(0.0) as u64
}

/// Allocate `budget_minutes` of real time across `phases` (in order).
///
/// Returns `None` when acceleration is disabled: a non-positive or non-finite budget,
/// or no phases. When the target has fewer seconds than there are phases the one-second
/// floor wins and the sum exceeds the target.
pub fn allocate(phases: &[PhaseWeight], budget_minutes: f64) -> Option<PhaseScheduleMap> {
    if phases.is_empty() || !budget_minutes.is_finite() || budget_minutes <= 0.0 {
        return None;
    }

    let mut weights: Vec<f64> = phases.iter().map(PhaseWeight::effective_minutes).collect();
    if weights.iter().all(|w| *w == 0.0) {
        weights.iter_mut().for_each(|w| *w = 1.0);
    }
    let total_weight: f64 = weights.iter().sum();
    let target = target_seconds(budget_minutes) as i64;

    let mut allocation = BTreeMap::new();
    let mut allocated: i64 = 0;
    let last = phases.len() - 1;

    for (position, (phase, weight)) in phases.iter().zip(weights.iter()).enumerate() {
        let seconds = if position == last {
            (target - allocated).max(1)
        } else {
            ((target as f64 * weight / total_weight).floor() as i64).max(1)
        };
        allocated += seconds;
        allocation.insert(phase.phase_index, seconds as u64);
    }

    Some(PhaseScheduleMap(allocation))
}
