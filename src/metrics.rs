//! # Orchestration Metrics
//!
//! OpenTelemetry counters for the simulation chain, scheduler task outcomes, retry
//! exhaustion and lock contention. Instruments are created from the global meter
//! provider; until a host process installs an exporter the provider is a no-op.
//!
//! ```rust
//! use greenhouse_core::metrics;
//!
//! metrics::simulation_steps_total().add(1, &[]);
//! ```

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static GREENHOUSE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    GREENHOUSE_METER
        .get_or_init(|| opentelemetry::global::meter_provider().meter("greenhouse-orchestration"))
}

/// Simulation steps that got past the lock and run lookup
pub fn simulation_steps_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.simulation.steps.total")
        .with_description("Total number of simulation steps executed")
        .build()
}

/// Finalized simulation runs
///
/// Labels:
/// - final_status: completed, failed
pub fn simulation_finalized_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.simulation.finalized.total")
        .with_description("Total number of simulation runs finalized")
        .build()
}

/// Scheduler tasks reaching a terminal status
///
/// Labels:
/// - status: completed, failed, rejected, expired, timeout, not_found
pub fn scheduler_tasks_terminal_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.scheduler.tasks.terminal.total")
        .with_description("Total number of scheduler tasks reaching a terminal status")
        .build()
}

pub fn retry_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.retry.failures.total")
        .with_description("Total number of failed attempts of retry-managed operations")
        .build()
}

pub fn retry_dead_lettered_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.retry.dead_lettered.total")
        .with_description("Total number of retry records moved to the dead-letter state")
        .build()
}

pub fn locks_contended_total() -> Counter<u64> {
    meter()
        .u64_counter("greenhouse.locks.contended.total")
        .with_description("Total number of named lock acquisitions that timed out")
        .build()
}

pub(crate) fn record_lock_contended(key: &str) {
    let scope = key.split(':').next().unwrap_or(key).to_string();
    locks_contended_total().add(1, &[KeyValue::new("scope", scope)]);
}

pub(crate) fn record_simulation_finalized(final_status: &str) {
    simulation_finalized_total().add(1, &[KeyValue::new("final_status", final_status.to_string())]);
}

pub(crate) fn record_task_terminal(status: &str) {
    scheduler_tasks_terminal_total().add(1, &[KeyValue::new("status", status.to_string())]);
}

pub(crate) fn record_retry_failure(kind: &str, dead_lettered: bool) {
    let labels = [KeyValue::new("kind", kind.to_string())];
    retry_failures_total().add(1, &labels);
    if dead_lettered {
        retry_dead_lettered_total().add(1, &labels);
    }
}
