//! In-memory grow cycle service for tests and local development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: state lives in process memory only
//! - Halts, load failures and harvest failures are scripted through the `script_*` methods

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{CycleError, GrowCycleService, GrowCycleSnapshot, PhaseAdvance, PhaseDefinition};
use crate::error::{GreenhouseError, GreenhouseResult};

#[derive(Debug, Clone)]
struct CycleState {
    snapshot: GrowCycleSnapshot,
    harvested: bool,
}

/// Scripted, call-counting grow cycle service
#[derive(Debug, Default)]
pub struct InMemoryGrowCycles {
    cycles: DashMap<i64, CycleState>,
    zone_devices: DashMap<i64, u32>,
    halts: DashMap<(i64, i32), String>,
    advance_failures: DashMap<i64, CycleError>,
    harvest_failures: DashMap<i64, CycleError>,
    advance_calls: DashMap<i64, u32>,
    harvest_calls: DashMap<i64, u32>,
    load_failure_after: Mutex<Option<u32>>,
}

impl InMemoryGrowCycles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zone and a cycle positioned on its first phase
    pub fn add_cycle(&self, cycle_id: i64, zone_id: i64, mut phases: Vec<PhaseDefinition>) {
        phases.sort_by_key(|p| p.phase_index);
        let current_phase_index = phases.first().map(|p| p.phase_index);
        self.zone_devices.entry(zone_id).or_insert(0);
        self.cycles.insert(
            cycle_id,
            CycleState {
                snapshot: GrowCycleSnapshot {
                    cycle_id,
                    zone_id,
                    current_phase_index,
                    phases,
                },
                harvested: false,
            },
        );
    }

    pub fn set_zone_devices(&self, zone_id: i64, devices: u32) {
        self.zone_devices.insert(zone_id, devices);
    }

    pub fn remove_cycle(&self, cycle_id: i64) {
        self.cycles.remove(&cycle_id);
    }

    pub fn remove_zone(&self, zone_id: i64) {
        self.zone_devices.remove(&zone_id);
    }

    pub fn set_current_phase(&self, cycle_id: i64, phase_index: Option<i32>) {
        if let Some(mut state) = self.cycles.get_mut(&cycle_id) {
            state.snapshot.current_phase_index = phase_index;
        }
    }

    /// Refuse to advance while the cycle sits on `phase_index`
    pub fn script_halt(&self, cycle_id: i64, phase_index: i32, reason: impl Into<String>) {
        self.halts.insert((cycle_id, phase_index), reason.into());
    }

    pub fn script_advance_failure(&self, cycle_id: i64, error: CycleError) {
        self.advance_failures.insert(cycle_id, error);
    }

    pub fn script_harvest_failure(&self, cycle_id: i64, error: CycleError) {
        self.harvest_failures.insert(cycle_id, error);
    }

    /// Fail one snapshot load with a storage error once `successful_loads` have passed
    pub fn script_load_failure_after(&self, successful_loads: u32) {
        *self.load_failure_after.lock() = Some(successful_loads);
    }

    pub fn advance_calls(&self, cycle_id: i64) -> u32 {
        self.advance_calls.get(&cycle_id).map(|c| *c).unwrap_or(0)
    }

    pub fn harvest_calls(&self, cycle_id: i64) -> u32 {
        self.harvest_calls.get(&cycle_id).map(|c| *c).unwrap_or(0)
    }

    pub fn is_harvested(&self, cycle_id: i64) -> bool {
        self.cycles
            .get(&cycle_id)
            .map(|state| state.harvested)
            .unwrap_or(false)
    }
}

#[async_trait]
impl GrowCycleService for InMemoryGrowCycles {
    async fn load_cycle(&self, cycle_id: i64) -> GreenhouseResult<Option<GrowCycleSnapshot>> {
        let failing = {
            let mut countdown = self.load_failure_after.lock();
            match *countdown {
                Some(0) => {
                    *countdown = None;
                    true
                }
                Some(left) => {
                    *countdown = Some(left - 1);
                    false
                }
                None => false,
            }
        };
        if failing {
            return Err(GreenhouseError::storage(format!("cycle {cycle_id} read timed out")));
        }
        Ok(self.cycles.get(&cycle_id).map(|state| state.snapshot.clone()))
    }

    async fn advance_phase(&self, cycle_id: i64) -> Result<PhaseAdvance, CycleError> {
        *self.advance_calls.entry(cycle_id).or_insert(0) += 1;

        if let Some(error) = self.advance_failures.get(&cycle_id) {
            return Err(error.value().clone());
        }

        let mut state = self
            .cycles
            .get_mut(&cycle_id)
            .ok_or_else(|| CycleError::new("CycleNotFound", format!("cycle {cycle_id}")))?;

        let Some(current) = state.snapshot.current_phase_index else {
            return Ok(PhaseAdvance::Halted {
                reason: "cycle has no current phase".to_string(),
            });
        };

        if let Some(reason) = self.halts.get(&(cycle_id, current)) {
            return Ok(PhaseAdvance::Halted {
                reason: reason.value().clone(),
            });
        }

        let next = state
            .snapshot
            .phases
            .iter()
            .map(|p| p.phase_index)
            .filter(|index| *index > current)
            .min();

        match next {
            Some(to_phase_index) => {
                state.snapshot.current_phase_index = Some(to_phase_index);
                Ok(PhaseAdvance::Advanced { to_phase_index })
            }
            None => Ok(PhaseAdvance::Halted {
                reason: "cycle is already in its final phase".to_string(),
            }),
        }
    }

    async fn harvest(&self, cycle_id: i64) -> Result<(), CycleError> {
        *self.harvest_calls.entry(cycle_id).or_insert(0) += 1;

        if let Some(error) = self.harvest_failures.get(&cycle_id) {
            return Err(error.value().clone());
        }

        let mut state = self
            .cycles
            .get_mut(&cycle_id)
            .ok_or_else(|| CycleError::new("CycleNotFound", format!("cycle {cycle_id}")))?;
        state.harvested = true;
        Ok(())
    }

    async fn zone_device_count(&self, zone_id: i64) -> GreenhouseResult<Option<u32>> {
        Ok(self.zone_devices.get(&zone_id).map(|count| *count))
    }
}
