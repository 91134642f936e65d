//! In-memory stores for tests and local development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: nothing survives the process
//! - No cross-process visibility
//! - Task update failures are scripted through
//!   [`InMemoryTaskStatusStore::script_update_failure_after`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{RetryStore, SimulationStore, TaskStatusStore};
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::retry::{PendingRetryRecord, RetryStatus};
use crate::scheduler::SchedulerTaskStatus;
use crate::simulation::models::{SimulationReport, SimulationRun};

#[derive(Debug, Default)]
pub struct InMemorySimulationStore {
    runs: DashMap<Uuid, SimulationRun>,
    reports: DashMap<Uuid, SimulationReport>,
}

impl InMemorySimulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a report has been written for the run
    pub fn has_report(&self, simulation_id: Uuid) -> bool {
        self.reports.contains_key(&simulation_id)
    }
}

#[async_trait]
impl SimulationStore for InMemorySimulationStore {
    async fn insert_run(&self, run: &SimulationRun) -> GreenhouseResult<()> {
        if self.runs.contains_key(&run.id) {
            return Err(GreenhouseError::storage(format!(
                "simulation run {} already exists",
                run.id
            )));
        }
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationRun>> {
        Ok(self.runs.get(&simulation_id).map(|run| run.value().clone()))
    }

    async fn update_run(&self, run: &SimulationRun) -> GreenhouseResult<()> {
        match self.runs.get_mut(&run.id) {
            Some(mut existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(GreenhouseError::not_found("simulation", run.id)),
        }
    }

    async fn get_report(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationReport>> {
        Ok(self
            .reports
            .get(&simulation_id)
            .map(|report| report.value().clone()))
    }

    async fn save_report(&self, report: &SimulationReport) -> GreenhouseResult<()> {
        self.reports.insert(report.simulation_id, report.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStatusStore {
    tasks: DashMap<Uuid, SchedulerTaskStatus>,
    update_failure_after: Mutex<Option<u32>>,
}

impl InMemoryTaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail one update with a storage error once `successful_updates` have passed
    pub fn script_update_failure_after(&self, successful_updates: u32) {
        *self.update_failure_after.lock() = Some(successful_updates);
    }

    fn take_scripted_failure(&self) -> bool {
        let mut countdown = self.update_failure_after.lock();
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
    }
}

#[async_trait]
impl TaskStatusStore for InMemoryTaskStatusStore {
    async fn insert(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()> {
        if self.tasks.contains_key(&status.task_id) {
            return Err(GreenhouseError::storage(format!(
                "scheduler task {} already exists",
                status.task_id
            )));
        }
        self.tasks.insert(status.task_id, status.clone());
        Ok(())
    }

    async fn update(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()> {
        if self.take_scripted_failure() {
            return Err(GreenhouseError::storage(format!(
                "scheduler task {} write timed out",
                status.task_id
            )));
        }
        match self.tasks.get_mut(&status.task_id) {
            Some(mut existing) => {
                *existing = status.clone();
                Ok(())
            }
            None => Err(GreenhouseError::not_found("scheduler_task", status.task_id)),
        }
    }

    async fn get(&self, task_id: Uuid) -> GreenhouseResult<Option<SchedulerTaskStatus>> {
        Ok(self.tasks.get(&task_id).map(|task| task.value().clone()))
    }

    async fn list_for_zone(&self, zone_id: i64) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|task| task.zone_id == zone_id)
            .map(|task| task.value().clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|task| task.correlation_id == correlation_id)
            .map(|task| task.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRetryStore {
    records: DashMap<String, PendingRetryRecord>,
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RetryStore for InMemoryRetryStore {
    async fn get(&self, id: &str) -> GreenhouseResult<Option<PendingRetryRecord>> {
        Ok(self.records.get(id).map(|record| record.value().clone()))
    }

    async fn upsert(&self, record: &PendingRetryRecord) -> GreenhouseResult<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> GreenhouseResult<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        let mut due: Vec<_> = self
            .records
            .iter()
            .filter(|record| record.is_due(now))
            .map(|record| record.value().clone())
            .collect();
        due.sort_by_key(|record| record.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn list_dead_letters(&self) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        let mut dead: Vec<_> = self
            .records
            .iter()
            .filter(|record| record.status == RetryStatus::Dlq)
            .map(|record| record.value().clone())
            .collect();
        dead.sort_by_key(|record| record.updated_at);
        Ok(dead)
    }
}
