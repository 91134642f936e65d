//! # Durable Storage Ports
//!
//! Every orchestration decision is re-derived from these stores at the start of each
//! invocation; nothing is carried in process memory between steps.
//!
//! - [`SimulationStore`]: simulation runs and their reports
//! - [`TaskStatusStore`]: scheduler task status records
//! - [`RetryStore`]: pending retry / dead-letter records
//!
//! In-memory implementations live in [`memory`]; PostgreSQL implementations in
//! `postgres` (feature `postgres`).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::GreenhouseResult;
use crate::retry::PendingRetryRecord;
use crate::scheduler::SchedulerTaskStatus;
use crate::simulation::models::{SimulationReport, SimulationRun};

pub use memory::{InMemoryRetryStore, InMemorySimulationStore, InMemoryTaskStatusStore};

#[async_trait]
pub trait SimulationStore: Send + Sync {
    async fn insert_run(&self, run: &SimulationRun) -> GreenhouseResult<()>;

    async fn get_run(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationRun>>;

    async fn update_run(&self, run: &SimulationRun) -> GreenhouseResult<()>;

    async fn get_report(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationReport>>;

    /// Insert or replace the report for its simulation
    async fn save_report(&self, report: &SimulationReport) -> GreenhouseResult<()>;
}

#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    async fn insert(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()>;

    async fn update(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()>;

    async fn get(&self, task_id: Uuid) -> GreenhouseResult<Option<SchedulerTaskStatus>>;

    /// Newest first
    async fn list_for_zone(&self, zone_id: i64) -> GreenhouseResult<Vec<SchedulerTaskStatus>>;

    /// Oldest first
    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> GreenhouseResult<Vec<SchedulerTaskStatus>>;
}

#[async_trait]
pub trait RetryStore: Send + Sync {
    async fn get(&self, id: &str) -> GreenhouseResult<Option<PendingRetryRecord>>;

    async fn upsert(&self, record: &PendingRetryRecord) -> GreenhouseResult<()>;

    async fn delete(&self, id: &str) -> GreenhouseResult<()>;

    /// Pending records with `next_retry_at <= now`, soonest first
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> GreenhouseResult<Vec<PendingRetryRecord>>;

    async fn list_dead_letters(&self) -> GreenhouseResult<Vec<PendingRetryRecord>>;
}
