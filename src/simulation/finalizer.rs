//! Simulation Finalizer
//!
//! Terminal bookkeeping for a run: closes the open phase entry, harvests the cycle
//! when the report is clean, computes report metrics and mirrors the final status
//! onto the run and the status cache.

use serde_json::json;

use super::models::{ReportMetrics, ReportStatus, ScenarioContext, SimulationReport, SimulationRun, SimulationRunStatus};
use super::orchestrator::SimulationContext;
use crate::config::SimulationConfig;
use crate::error::GreenhouseResult;
use crate::events::{stages, statuses, EventLevel, SimulationEvent};
use crate::metrics;

#[derive(Clone)]
pub struct SimulationFinalizer {
    context: SimulationContext,
    config: SimulationConfig,
}

impl std::fmt::Debug for SimulationFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationFinalizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SimulationFinalizer {
    pub fn new(context: SimulationContext, config: SimulationConfig) -> Self {
        Self { context, config }
    }

    /// Finalize `report` for `run`.
    ///
    /// Harvest is attempted only when no error has been recorded. Errors from the
    /// harvest itself land on the report and turn the final status into `failed`.
    pub async fn finalize(
        &self,
        mut run: SimulationRun,
        mut report: SimulationReport,
        scenario: ScenarioContext,
    ) -> GreenhouseResult<SimulationReport> {
        let now = self.context.clock.now();
        report.close_open_entry(now);

        if report.has_errors() {
            tracing::info!(
                simulation_id = %run.id,
                errors = report.errors.len(),
                "Skipping harvest, report has errors"
            );
        } else {
            match self.context.cycles.harvest(scenario.cycle_id).await {
                Ok(()) => {
                    self.emit(
                        SimulationEvent::new(
                            run.id,
                            scenario.zone_id,
                            &self.config.service_name,
                            stages::HARVEST,
                            statuses::HARVESTED,
                            "Grow cycle harvested",
                            now,
                        )
                        .with_payload(json!({ "cycle_id": scenario.cycle_id })),
                    )
                    .await;
                }
                Err(error) => {
                    tracing::error!(
                        simulation_id = %run.id,
                        cycle_id = scenario.cycle_id,
                        error_type = %error.error_type,
                        error = %error.message,
                        "Harvest failed"
                    );
                    report.record_error(stages::HARVEST, &error.error_type, &error.message, now);
                    self.emit(
                        SimulationEvent::new(
                            run.id,
                            scenario.zone_id,
                            &self.config.service_name,
                            stages::HARVEST,
                            statuses::FAILED,
                            error.message.clone(),
                            now,
                        )
                        .with_level(EventLevel::Error)
                        .with_payload(json!({ "error_type": error.error_type })),
                    )
                    .await;
                }
            }
        }

        let devices_count = match self.context.cycles.zone_device_count(scenario.zone_id).await? {
            Some(count) => count,
            None => {
                tracing::warn!(zone_id = scenario.zone_id, "Zone missing at finalization, reporting zero devices");
                0
            }
        };
        let events_count = self.context.events.count_for_run(run.id).await?;

        let (report_status, run_status) = if report.has_errors() {
            (ReportStatus::Failed, SimulationRunStatus::Failed)
        } else {
            (ReportStatus::Completed, SimulationRunStatus::Completed)
        };

        report.status = report_status;
        report.finished_at = Some(now);
        report.metrics = Some(ReportMetrics {
            phases_count: report.phases.len(),
            devices_count,
            events_count,
            duration_seconds: report.elapsed_seconds(now),
        });
        report.updated_at = now;
        self.context.store.save_report(&report).await?;

        let terminal_status = match report_status {
            ReportStatus::Failed => statuses::FAILED,
            _ => statuses::COMPLETED,
        };
        let level = if report.has_errors() {
            EventLevel::Error
        } else {
            EventLevel::Info
        };
        self.emit(
            SimulationEvent::new(
                run.id,
                scenario.zone_id,
                &self.config.service_name,
                stages::REPORT,
                terminal_status,
                format!("Simulation {terminal_status}"),
                now,
            )
            .with_level(level)
            .with_payload(json!({ "metrics": report.metrics, "errors": report.errors.len() })),
        )
        .await;

        run.status = run_status;
        run.updated_at = now;
        self.context.store.update_run(&run).await?;
        self.context
            .cache_status(&run, Some(report_status), self.config.status_cache_ttl())
            .await;

        metrics::record_simulation_finalized(terminal_status);
        tracing::info!(
            simulation_id = %run.id,
            zone_id = run.zone_id,
            final_status = %run_status,
            phases = report.phases.len(),
            devices = devices_count,
            events = events_count,
            "Simulation finalized"
        );

        Ok(report)
    }

    async fn emit(&self, event: SimulationEvent) {
        self.context.emit(event).await;
    }
}
