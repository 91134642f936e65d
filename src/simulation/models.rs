//! Simulation data model: runs, scenarios, reports and phase entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::schedule::PhaseScheduleMap;
use crate::cycle::PhaseDefinition;
use crate::error::{GreenhouseError, GreenhouseResult, StateTransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationRunStatus {
    Processing,
    Completed,
    Failed,
}

impl SimulationRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }
}

impl fmt::Display for SimulationRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Scenario parameters supplied when a run is requested.
///
/// Unknown keys are preserved in `extra` so the scenario round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationScenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_zone_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_grow_cycle_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Linked entities a step needs before it can do anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioContext {
    pub zone_id: i64,
    pub cycle_id: i64,
}

impl SimulationScenario {
    pub fn accelerated(zone_id: i64, cycle_id: i64, real_duration_minutes: f64) -> Self {
        Self {
            real_duration_minutes: Some(real_duration_minutes),
            sim_zone_id: Some(zone_id),
            sim_grow_cycle_id: Some(cycle_id),
            ..Self::default()
        }
    }

    pub fn context(&self) -> GreenhouseResult<ScenarioContext> {
        match (self.sim_zone_id, self.sim_grow_cycle_id) {
            (Some(zone_id), Some(cycle_id)) => Ok(ScenarioContext { zone_id, cycle_id }),
            (zone, cycle) => {
                let mut fields = Vec::new();
                if zone.is_none() {
                    fields.push("sim_zone_id");
                }
                if cycle.is_none() {
                    fields.push("sim_grow_cycle_id");
                }
                Err(GreenhouseError::ValidationMissing {
                    context: "simulation scenario".to_string(),
                    fields,
                })
            }
        }
    }

    /// Real-time budget in minutes, or `None` when acceleration is not requested.
    ///
    /// An explicit `real_duration_minutes` wins; otherwise a positive `time_scale`
    /// compresses the cycle's nominal duration.
    pub fn budget_minutes(&self, total_nominal_minutes: f64) -> Option<f64> {
        if let Some(minutes) = self.real_duration_minutes {
            return (minutes.is_finite() && minutes > 0.0).then_some(minutes);
        }
        match self.time_scale {
            Some(scale) if scale.is_finite() && scale > 0.0 && total_nominal_minutes > 0.0 => {
                Some(total_nominal_minutes / scale)
            }
            _ => None,
        }
    }
}

/// One accelerated execution of a grow cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: Uuid,
    pub zone_id: i64,
    pub scenario: SimulationScenario,
    pub status: SimulationRunStatus,
    /// Computed on the first accelerated step and reused afterwards
    pub phase_schedule: Option<PhaseScheduleMap>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SimulationRun {
    pub fn new(zone_id: i64, scenario: SimulationScenario, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone_id,
            scenario,
            status: SimulationRunStatus::Processing,
            phase_schedule: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Running,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEntryStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase_id: i64,
    pub phase_index: i32,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: PhaseEntryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    pub stage: String,
    pub error_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub phases_count: usize,
    pub devices_count: u32,
    pub events_count: u64,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub simulation_id: Uuid,
    pub zone_id: i64,
    pub status: ReportStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Append-only, ascending by `phase_index`, at most one running
    pub phases: Vec<PhaseEntry>,
    pub metrics: Option<ReportMetrics>,
    pub errors: Vec<ReportError>,
    pub updated_at: DateTime<Utc>,
}

impl SimulationReport {
    pub fn new(simulation_id: Uuid, zone_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            simulation_id,
            zone_id,
            status: ReportStatus::Running,
            started_at: now,
            finished_at: None,
            phases: Vec::new(),
            metrics: None,
            errors: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn open_entry(&self) -> Option<&PhaseEntry> {
        self.phases
            .iter()
            .rev()
            .find(|entry| entry.status == PhaseEntryStatus::Running)
    }

    pub fn has_entry_for(&self, phase_index: i32) -> bool {
        self.phases.iter().any(|entry| entry.phase_index == phase_index)
    }

    /// Append a running entry for `phase`.
    ///
    /// Returns `Ok(false)` when an entry for the phase already exists (replayed step).
    /// Refuses to open a second running entry or to go backwards in phase order.
    pub fn open_phase(
        &mut self,
        phase: &PhaseDefinition,
        now: DateTime<Utc>,
    ) -> GreenhouseResult<bool> {
        if self.has_entry_for(phase.phase_index) {
            return Ok(false);
        }
        if let Some(open) = self.open_entry() {
            return Err(StateTransitionError::Invalid {
                entity: "phase_entry",
                id: self.simulation_id.to_string(),
                from: format!("phase {} running", open.phase_index),
                to: format!("phase {} running", phase.phase_index),
            }
            .into());
        }
        if let Some(last) = self.phases.last() {
            if last.phase_index > phase.phase_index {
                return Err(StateTransitionError::Invalid {
                    entity: "phase_entry",
                    id: self.simulation_id.to_string(),
                    from: format!("phase {}", last.phase_index),
                    to: format!("phase {}", phase.phase_index),
                }
                .into());
            }
        }

        self.phases.push(PhaseEntry {
            phase_id: phase.phase_id,
            phase_index: phase.phase_index,
            name: phase.name.clone(),
            started_at: now,
            completed_at: None,
            status: PhaseEntryStatus::Running,
        });
        self.updated_at = now;
        Ok(true)
    }

    /// Close the running entry, returning its phase index.
    pub fn close_open_entry(&mut self, now: DateTime<Utc>) -> Option<i32> {
        let entry = self
            .phases
            .iter_mut()
            .rev()
            .find(|entry| entry.status == PhaseEntryStatus::Running)?;
        entry.completed_at = Some(now);
        entry.status = PhaseEntryStatus::Completed;
        self.updated_at = now;
        Some(entry.phase_index)
    }

    pub fn record_error(
        &mut self,
        stage: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.errors.push(ReportError {
            stage: stage.into(),
            error_type: error_type.into(),
            message: message.into(),
            occurred_at: now,
        });
        self.updated_at = now;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.finished_at.unwrap_or(now) - self.started_at)
            .num_seconds()
            .max(0)
    }
}
