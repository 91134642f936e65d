//! # Simulation Orchestrator
//!
//! Re-entrant step driver for accelerated simulation runs. Every invocation re-derives
//! its decisions from durable storage (run, report, cycle snapshot); nothing is kept
//! in memory between steps. Waiting for the next phase is a delayed self-dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::finalizer::SimulationFinalizer;
use super::models::{
    ReportStatus, ScenarioContext, SimulationReport, SimulationRun, SimulationRunStatus,
    SimulationScenario,
};
use super::schedule::{allocate, PhaseScheduleMap};
use crate::cache::{simulation_status_key, StatusCache};
use crate::clock::Clock;
use crate::config::SimulationConfig;
use crate::cycle::{GrowCycleService, GrowCycleSnapshot, PhaseAdvance, PhaseDefinition};
use crate::dispatch::{DelayedDispatcher, DispatchTarget};
use crate::error::GreenhouseResult;
use crate::events::{stages, statuses, EventLevel, EventSink, SimulationEvent};
use crate::locks::{with_named_lock, LockOptions, NamedLock};
use crate::metrics;
use crate::store::SimulationStore;

/// Shared collaborators of the orchestrator and its finalizer
#[derive(Clone)]
pub struct SimulationContext {
    pub store: Arc<dyn SimulationStore>,
    pub cycles: Arc<dyn GrowCycleService>,
    pub events: Arc<dyn EventSink>,
    pub cache: Arc<dyn StatusCache>,
    pub dispatcher: Arc<dyn DelayedDispatcher>,
    pub lock: Arc<dyn NamedLock>,
    pub clock: Arc<dyn Clock>,
}

impl SimulationContext {
    /// Append an audit event; sink failures are logged and never abort a step
    pub(crate) async fn emit(&self, event: SimulationEvent) {
        let simulation_id = event.simulation_id;
        let stage = event.stage.clone();
        if let Err(error) = self.events.append(event).await {
            tracing::warn!(
                simulation_id = %simulation_id,
                stage = %stage,
                error = %error,
                "Failed to append simulation event"
            );
        }
    }

    pub(crate) async fn cache_status(
        &self,
        run: &SimulationRun,
        report_status: Option<ReportStatus>,
        ttl: Duration,
    ) {
        let snapshot = SimulationStatusSnapshot {
            simulation_id: run.id,
            zone_id: run.zone_id,
            status: run.status,
            report_status,
            updated_at: run.updated_at,
        };
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(simulation_id = %run.id, error = %error, "Failed to encode run status");
                return;
            }
        };
        if let Err(error) = self.cache.put(&simulation_status_key(&run.id), value, ttl).await {
            tracing::warn!(simulation_id = %run.id, error = %error, "Failed to cache run status");
        }
    }
}

/// Ephemeral view of a run served from the status cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatusSnapshot {
    pub simulation_id: Uuid,
    pub zone_id: i64,
    pub status: SimulationRunStatus,
    pub report_status: Option<ReportStatus>,
    pub updated_at: DateTime<Utc>,
}

/// Why a step did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSkip {
    RunNotFound,
    RunInactive,
    ReportTerminal,
    MissingContext,
    CycleNotFound,
    NoCurrentPhase,
    /// The phase token does not match the report's open entry
    StaleStep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Skipped(StepSkip),
    /// Another invocation holds the run's step lock
    AlreadyInProgress,
    /// Report created, first phase opened
    Started {
        phase_index: i32,
        next_step_in: Duration,
    },
    Advanced {
        from_phase_index: i32,
        to_phase_index: i32,
        next_step_in: Duration,
    },
    Finalized(ReportStatus),
}

pub struct SimulationOrchestrator {
    context: SimulationContext,
    finalizer: SimulationFinalizer,
    config: SimulationConfig,
    lock_options: LockOptions,
}

impl std::fmt::Debug for SimulationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationOrchestrator")
            .field("config", &self.config)
            .field("lock_options", &self.lock_options)
            .finish_non_exhaustive()
    }
}

impl SimulationOrchestrator {
    /// `lock_options` governs the per-run step lock; its TTL is replaced by the
    /// configured step lock TTL.
    pub fn new(
        context: SimulationContext,
        config: SimulationConfig,
        lock_options: LockOptions,
    ) -> Self {
        let lock_options = lock_options.with_ttl(config.step_lock_ttl());
        Self {
            finalizer: SimulationFinalizer::new(context.clone(), config.clone()),
            context,
            config,
            lock_options,
        }
    }

    /// Create a run and dispatch its first step immediately.
    ///
    /// The scenario must name the simulated zone and grow cycle; this is the only
    /// place a missing context surfaces as an error.
    pub async fn start_run(
        &self,
        zone_id: i64,
        scenario: SimulationScenario,
    ) -> GreenhouseResult<SimulationRun> {
        let scenario_context = scenario.context()?;
        let now = self.context.clock.now();
        let run = SimulationRun::new(zone_id, scenario, now);

        self.context.store.insert_run(&run).await?;
        self.context
            .cache_status(&run, None, self.config.status_cache_ttl())
            .await;
        self.context
            .dispatcher
            .dispatch(DispatchTarget::simulation_step(run.id, None), Duration::ZERO)
            .await?;

        tracing::info!(
            simulation_id = %run.id,
            zone_id = zone_id,
            sim_zone_id = scenario_context.zone_id,
            cycle_id = scenario_context.cycle_id,
            "Simulation run created"
        );
        Ok(run)
    }

    /// One tick of a run. Safe to invoke any number of times for the same token.
    pub async fn step(
        &self,
        simulation_id: Uuid,
        phase_token: Option<i32>,
    ) -> GreenhouseResult<StepOutcome> {
        let key = format!("simulation:{simulation_id}");
        let outcome = with_named_lock(self.context.lock.as_ref(), &key, &self.lock_options, || {
            self.step_locked(simulation_id, phase_token)
        })
        .await?;

        Ok(outcome.unwrap_or_else(|| {
            tracing::debug!(simulation_id = %simulation_id, "Step already in progress, skipping");
            StepOutcome::AlreadyInProgress
        }))
    }

    async fn step_locked(
        &self,
        simulation_id: Uuid,
        phase_token: Option<i32>,
    ) -> GreenhouseResult<StepOutcome> {
        let Some(mut run) = self.context.store.get_run(simulation_id).await? else {
            tracing::warn!(simulation_id = %simulation_id, "Simulation run not found, skipping step");
            return Ok(StepOutcome::Skipped(StepSkip::RunNotFound));
        };
        if !run.status.is_active() {
            tracing::debug!(simulation_id = %simulation_id, status = %run.status, "Run no longer active");
            return Ok(StepOutcome::Skipped(StepSkip::RunInactive));
        }

        let report = self.context.store.get_report(simulation_id).await?;
        if report.as_ref().is_some_and(SimulationReport::is_terminal) {
            tracing::debug!(simulation_id = %simulation_id, "Report already terminal");
            return Ok(StepOutcome::Skipped(StepSkip::ReportTerminal));
        }

        let scenario = match run.scenario.context() {
            Ok(scenario) => scenario,
            Err(error) => {
                tracing::warn!(simulation_id = %simulation_id, error = %error, "Scenario context missing, aborting step");
                return Ok(StepOutcome::Skipped(StepSkip::MissingContext));
            }
        };

        let Some(cycle) = self.context.cycles.load_cycle(scenario.cycle_id).await? else {
            tracing::warn!(
                simulation_id = %simulation_id,
                cycle_id = scenario.cycle_id,
                "Grow cycle not found, aborting step"
            );
            return Ok(StepOutcome::Skipped(StepSkip::CycleNotFound));
        };

        metrics::simulation_steps_total().add(1, &[]);

        let Some(budget) = run.scenario.budget_minutes(cycle.total_nominal_minutes()) else {
            return self.run_unaccelerated(run, report, scenario).await;
        };

        let Some(current) = cycle.current_phase().cloned() else {
            tracing::warn!(
                simulation_id = %simulation_id,
                cycle_id = cycle.cycle_id,
                "Grow cycle has no current phase, aborting step"
            );
            return Ok(StepOutcome::Skipped(StepSkip::NoCurrentPhase));
        };

        let schedule = match run.phase_schedule.clone() {
            Some(schedule) => schedule,
            None => {
                let Some(schedule) = allocate(&cycle.weights(), budget) else {
                    return self.run_unaccelerated(run, report, scenario).await;
                };
                run.phase_schedule = Some(schedule.clone());
                run.updated_at = self.context.clock.now();
                self.context.store.update_run(&run).await?;
                tracing::debug!(
                    simulation_id = %simulation_id,
                    budget_minutes = budget,
                    total_seconds = schedule.total_seconds(),
                    "Phase schedule computed"
                );
                schedule
            }
        };

        let Some(mut report) = report else {
            return self.open_report(&run, scenario, &current, &schedule).await;
        };

        let open_index = match (phase_token, report.open_entry()) {
            (Some(token), Some(open)) if open.phase_index == token => token,
            (token, open) => {
                tracing::debug!(
                    simulation_id = %simulation_id,
                    phase_token = ?token,
                    open_phase_index = ?open.map(|e| e.phase_index),
                    "Stale step, skipping"
                );
                return Ok(StepOutcome::Skipped(StepSkip::StaleStep));
            }
        };

        let now = self.context.clock.now();
        report.close_open_entry(now);

        // A cycle already past the open phase was advanced by an interrupted step.
        if cycle.current_phase_index == Some(open_index) {
            if cycle.is_last_phase(open_index) {
                return self.finalize(run, report, scenario).await;
            }
            match self.context.cycles.advance_phase(scenario.cycle_id).await {
                Ok(PhaseAdvance::Advanced { to_phase_index }) => {
                    tracing::debug!(
                        simulation_id = %simulation_id,
                        from_phase_index = open_index,
                        to_phase_index,
                        "Grow cycle advanced"
                    );
                }
                Ok(PhaseAdvance::Halted { reason }) => {
                    tracing::info!(simulation_id = %simulation_id, reason = %reason, "Phase advance halted");
                    self.emit_halt(&run, scenario, open_index, &reason, now).await;
                    return self.finalize(run, report, scenario).await;
                }
                Err(error) => {
                    tracing::error!(
                        simulation_id = %simulation_id,
                        cycle_id = scenario.cycle_id,
                        error_type = %error.error_type,
                        error = %error.message,
                        "Phase advance failed"
                    );
                    report.record_error(stages::PHASE, &error.error_type, &error.message, now);
                    return self.finalize(run, report, scenario).await;
                }
            }
        }

        let refreshed = self.context.cycles.load_cycle(scenario.cycle_id).await?;
        let next = refreshed
            .as_ref()
            .and_then(GrowCycleSnapshot::current_phase)
            .filter(|phase| phase.phase_index > open_index)
            .cloned();
        let Some(next) = next else {
            tracing::warn!(
                simulation_id = %simulation_id,
                cycle_id = scenario.cycle_id,
                "No current phase after advance"
            );
            report.record_error(
                stages::PHASE,
                "PhaseNotFound",
                format!("grow cycle {} has no phase after {open_index}", scenario.cycle_id),
                now,
            );
            return self.finalize(run, report, scenario).await;
        };

        report.open_phase(&next, now)?;
        // Successor before save: a failed dispatch must leave the token open for redelivery
        let next_step_in = self.schedule_next(&run, &schedule, next.phase_index).await?;
        self.context.store.save_report(&report).await?;
        self.context
            .emit(
                SimulationEvent::new(
                    run.id,
                    scenario.zone_id,
                    &self.config.service_name,
                    stages::PHASE,
                    statuses::ADVANCED,
                    format!("Advanced to phase {}", next.name),
                    now,
                )
                .with_payload(json!({
                    "from_phase_index": open_index,
                    "to_phase_index": next.phase_index,
                    "phase_id": next.phase_id,
                })),
            )
            .await;

        Ok(StepOutcome::Advanced {
            from_phase_index: open_index,
            to_phase_index: next.phase_index,
            next_step_in,
        })
    }

    async fn open_report(
        &self,
        run: &SimulationRun,
        scenario: ScenarioContext,
        current: &PhaseDefinition,
        schedule: &PhaseScheduleMap,
    ) -> GreenhouseResult<StepOutcome> {
        let now = self.context.clock.now();
        let mut report = SimulationReport::new(run.id, scenario.zone_id, now);
        report.open_phase(current, now)?;
        let next_step_in = self.schedule_next(run, schedule, current.phase_index).await?;
        self.context.store.save_report(&report).await?;
        self.context
            .emit(
                SimulationEvent::new(
                    run.id,
                    scenario.zone_id,
                    &self.config.service_name,
                    stages::REPORT,
                    statuses::RUNNING,
                    "Simulation report started",
                    now,
                )
                .with_payload(json!({
                    "phase_index": current.phase_index,
                    "phase_schedule": schedule,
                })),
            )
            .await;
        self.context
            .cache_status(run, Some(ReportStatus::Running), self.config.status_cache_ttl())
            .await;

        tracing::info!(
            simulation_id = %run.id,
            phase_index = current.phase_index,
            next_step_seconds = next_step_in.as_secs(),
            "Simulation started"
        );
        Ok(StepOutcome::Started {
            phase_index: current.phase_index,
            next_step_in,
        })
    }

    /// Walk every remaining phase in one pass, then finalize
    async fn run_unaccelerated(
        &self,
        run: SimulationRun,
        report: Option<SimulationReport>,
        scenario: ScenarioContext,
    ) -> GreenhouseResult<StepOutcome> {
        let now = self.context.clock.now();
        tracing::info!(simulation_id = %run.id, "No time budget, running unaccelerated");

        // Resume from the stored report so phases walked by an interrupted pass survive
        let mut report = match report {
            Some(report) => report,
            None => {
                let report = SimulationReport::new(run.id, scenario.zone_id, now);
                self.context.store.save_report(&report).await?;
                self.context
                    .emit(SimulationEvent::new(
                        run.id,
                        scenario.zone_id,
                        &self.config.service_name,
                        stages::REPORT,
                        statuses::RUNNING,
                        "Simulation report started",
                        now,
                    ))
                    .await;
                report
            }
        };

        let mut remaining_advances = self
            .context
            .cycles
            .load_cycle(scenario.cycle_id)
            .await?
            .map(|cycle| cycle.phases.len())
            .unwrap_or(0);

        loop {
            let cycle = self.context.cycles.load_cycle(scenario.cycle_id).await?;
            let Some(current) = cycle.as_ref().and_then(GrowCycleSnapshot::current_phase).cloned() else {
                report.record_error(
                    stages::PHASE,
                    "PhaseNotFound",
                    format!("grow cycle {} has no current phase", scenario.cycle_id),
                    now,
                );
                break;
            };

            if report.open_entry().map(|e| e.phase_index) != Some(current.phase_index) {
                report.close_open_entry(now);
            }
            report.open_phase(&current, now)?;

            let is_last = cycle
                .as_ref()
                .is_some_and(|c| c.is_last_phase(current.phase_index));
            if is_last || remaining_advances == 0 {
                break;
            }
            remaining_advances -= 1;

            self.context.store.save_report(&report).await?;
            match self.context.cycles.advance_phase(scenario.cycle_id).await {
                Ok(PhaseAdvance::Advanced { to_phase_index }) => {
                    report.close_open_entry(now);
                    self.context
                        .emit(
                            SimulationEvent::new(
                                run.id,
                                scenario.zone_id,
                                &self.config.service_name,
                                stages::PHASE,
                                statuses::ADVANCED,
                                format!("Advanced past phase {}", current.name),
                                now,
                            )
                            .with_payload(json!({
                                "from_phase_index": current.phase_index,
                                "to_phase_index": to_phase_index,
                            })),
                        )
                        .await;
                }
                Ok(PhaseAdvance::Halted { reason }) => {
                    self.emit_halt(&run, scenario, current.phase_index, &reason, now).await;
                    break;
                }
                Err(error) => {
                    tracing::error!(
                        simulation_id = %run.id,
                        error_type = %error.error_type,
                        error = %error.message,
                        "Phase advance failed"
                    );
                    report.record_error(stages::PHASE, &error.error_type, &error.message, now);
                    break;
                }
            }
        }

        self.finalize(run, report, scenario).await
    }

    async fn finalize(
        &self,
        run: SimulationRun,
        report: SimulationReport,
        scenario: ScenarioContext,
    ) -> GreenhouseResult<StepOutcome> {
        let report = self.finalizer.finalize(run, report, scenario).await?;
        Ok(StepOutcome::Finalized(report.status))
    }

    async fn emit_halt(
        &self,
        run: &SimulationRun,
        scenario: ScenarioContext,
        phase_index: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.context
            .emit(
                SimulationEvent::new(
                    run.id,
                    scenario.zone_id,
                    &self.config.service_name,
                    stages::PHASE,
                    statuses::HALTED,
                    reason.to_string(),
                    now,
                )
                .with_level(EventLevel::Warning)
                .with_payload(json!({ "phase_index": phase_index })),
            )
            .await;
    }

    async fn schedule_next(
        &self,
        run: &SimulationRun,
        schedule: &PhaseScheduleMap,
        phase_index: i32,
    ) -> GreenhouseResult<Duration> {
        let seconds = schedule.seconds_for(phase_index).unwrap_or(1).max(1);
        let delay = Duration::from_secs(seconds);
        self.context
            .dispatcher
            .dispatch(DispatchTarget::simulation_step(run.id, Some(phase_index)), delay)
            .await?;
        Ok(delay)
    }

    /// Cached status, falling back to the store
    pub async fn status(
        &self,
        simulation_id: Uuid,
    ) -> GreenhouseResult<Option<SimulationStatusSnapshot>> {
        let key = simulation_status_key(&simulation_id);
        if let Some(value) = self.context.cache.get(&key).await? {
            match serde_json::from_value(value) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(error) => {
                    tracing::warn!(simulation_id = %simulation_id, error = %error, "Discarding unreadable cached status");
                }
            }
        }

        let Some(run) = self.context.store.get_run(simulation_id).await? else {
            return Ok(None);
        };
        let report_status = self
            .context
            .store
            .get_report(simulation_id)
            .await?
            .map(|report| report.status);
        self.context
            .cache_status(&run, report_status, self.config.status_cache_ttl())
            .await;

        Ok(Some(SimulationStatusSnapshot {
            simulation_id: run.id,
            zone_id: run.zone_id,
            status: run.status,
            report_status,
            updated_at: run.updated_at,
        }))
    }

    pub async fn report(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationReport>> {
        self.context.store.get_report(simulation_id).await
    }

    pub async fn run(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationRun>> {
        self.context.store.get_run(simulation_id).await
    }
}
