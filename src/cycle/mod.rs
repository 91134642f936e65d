//! # Grow Cycle Port
//!
//! The orchestration core does not own grow cycles, recipes, or zones. It consumes them
//! through [`GrowCycleService`]:
//!
//! - loading a cycle snapshot (zone, ordered recipe phases, current phase)
//! - advancing the cycle one phase, which may be refused with a domain halt
//! - harvesting the cycle, which may fail
//! - counting a zone's devices for report metrics
//!
//! A domain halt is a normal business answer ([`PhaseAdvance::Halted`]); only unexpected
//! failures use [`CycleError`].

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GreenhouseResult;
use crate::simulation::schedule::PhaseWeight;

pub use memory::InMemoryGrowCycles;

/// One recipe phase with its nominal real-world duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub phase_id: i64,
    pub phase_index: i32,
    pub name: String,
    pub duration_hours: Option<f64>,
    pub duration_days: Option<f64>,
}

impl PhaseDefinition {
    pub fn new(phase_id: i64, phase_index: i32, name: impl Into<String>) -> Self {
        Self {
            phase_id,
            phase_index,
            name: name.into(),
            duration_hours: None,
            duration_days: None,
        }
    }

    pub fn with_hours(mut self, hours: f64) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    pub fn with_days(mut self, days: f64) -> Self {
        self.duration_days = Some(days);
        self
    }

    /// Nominal duration in minutes; hours take precedence over days, missing is zero.
    pub fn nominal_minutes(&self) -> f64 {
        match (self.duration_hours, self.duration_days) {
            (Some(hours), _) if hours > 0.0 => hours * 60.0,
            (_, Some(days)) if days > 0.0 => days * 24.0 * 60.0,
            _ => 0.0,
        }
    }

    pub fn weight(&self) -> PhaseWeight {
        PhaseWeight::new(self.phase_index, self.nominal_minutes())
    }
}

/// Read model of a grow cycle as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowCycleSnapshot {
    pub cycle_id: i64,
    pub zone_id: i64,
    pub current_phase_index: Option<i32>,
    /// Ascending by `phase_index`
    pub phases: Vec<PhaseDefinition>,
}

impl GrowCycleSnapshot {
    pub fn current_phase(&self) -> Option<&PhaseDefinition> {
        let index = self.current_phase_index?;
        self.phases.iter().find(|p| p.phase_index == index)
    }

    pub fn last_phase(&self) -> Option<&PhaseDefinition> {
        self.phases.iter().max_by_key(|p| p.phase_index)
    }

    pub fn is_last_phase(&self, phase_index: i32) -> bool {
        self.last_phase()
            .map(|p| p.phase_index == phase_index)
            .unwrap_or(false)
    }

    pub fn total_nominal_minutes(&self) -> f64 {
        self.phases.iter().map(PhaseDefinition::nominal_minutes).sum()
    }

    pub fn weights(&self) -> Vec<PhaseWeight> {
        self.phases.iter().map(PhaseDefinition::weight).collect()
    }
}

/// Outcome of asking the owning cycle to move to its next phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAdvance {
    Advanced { to_phase_index: i32 },
    /// Explicit business refusal to advance; the run finalizes without error
    Halted { reason: String },
}

/// Unexpected failure of a cycle operation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error_type}: {message}")]
pub struct CycleError {
    pub error_type: String,
    pub message: String,
}

impl CycleError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait GrowCycleService: Send + Sync {
    async fn load_cycle(&self, cycle_id: i64) -> GreenhouseResult<Option<GrowCycleSnapshot>>;

    async fn advance_phase(&self, cycle_id: i64) -> Result<PhaseAdvance, CycleError>;

    async fn harvest(&self, cycle_id: i64) -> Result<(), CycleError>;

    /// `None` when the zone no longer exists
    async fn zone_device_count(&self, zone_id: i64) -> GreenhouseResult<Option<u32>>;
}
