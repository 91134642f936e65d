//! # PostgreSQL Stores
//!
//! sqlx-backed implementations of the storage ports plus the event sink. Records are
//! kept as JSONB documents next to the columns the queries filter on, so the Rust types
//! stay the single definition of each record's shape.
//!
//! Queries are built at runtime (no compile-time `DATABASE_URL` requirement).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RetryStore, SimulationStore, TaskStatusStore};
use crate::config::DatabaseConfig;
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::events::{EventLevel, EventSink, SimulationEvent};
use crate::retry::{PendingRetryRecord, RetryStatus};
use crate::scheduler::SchedulerTaskStatus;
use crate::simulation::models::{SimulationReport, SimulationRun, SimulationRunStatus};

const SCHEMA: &str = include_str!("../../migrations/20261001000000_greenhouse_core.sql");

/// Open a pool using the configured URL and size
pub async fn connect(config: &DatabaseConfig) -> GreenhouseResult<PgPool> {
    let url = config.url.as_deref().ok_or_else(|| {
        GreenhouseError::ConfigurationError("database.url is required for PostgreSQL stores".into())
    })?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Apply the bundled schema. Every statement is idempotent.
pub async fn apply_schema(pool: &PgPool) -> GreenhouseResult<()> {
    for statement in schema_statements(SCHEMA) {
        sqlx::query(&statement).execute(pool).await?;
    }
    tracing::info!("Greenhouse schema applied");
    Ok(())
}

fn schema_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|statement| statement.trim().to_string())
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: &str) -> GreenhouseResult<T> {
    raw.parse::<T>().map_err(GreenhouseError::Serialization)
}

#[derive(Debug, Clone)]
pub struct PgSimulationStore {
    pool: PgPool,
}

impl PgSimulationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn run_from_row(row: &PgRow) -> GreenhouseResult<SimulationRun> {
        let status: String = row.get("status");
        let phase_schedule: Option<serde_json::Value> = row.get("phase_schedule");
        Ok(SimulationRun {
            id: row.get("id"),
            zone_id: row.get("zone_id"),
            scenario: serde_json::from_value(row.get("scenario"))?,
            status: match status.as_str() {
                "processing" => SimulationRunStatus::Processing,
                "completed" => SimulationRunStatus::Completed,
                "failed" => SimulationRunStatus::Failed,
                other => {
                    return Err(GreenhouseError::Serialization(format!(
                        "unknown simulation status: {other}"
                    )))
                }
            },
            phase_schedule: phase_schedule.map(serde_json::from_value).transpose()?,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

#[async_trait]
impl SimulationStore for PgSimulationStore {
    async fn insert_run(&self, run: &SimulationRun) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO simulation_runs (id, zone_id, scenario, status, phase_schedule, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id)
        .bind(run.zone_id)
        .bind(serde_json::to_value(&run.scenario)?)
        .bind(run.status.to_string())
        .bind(run.phase_schedule.as_ref().map(serde_json::to_value).transpose()?)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, zone_id, scenario, status, phase_schedule, created_at, updated_at
            FROM simulation_runs WHERE id = $1
            "#,
        )
        .bind(simulation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn update_run(&self, run: &SimulationRun) -> GreenhouseResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE simulation_runs
            SET scenario = $2, status = $3, phase_schedule = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(serde_json::to_value(&run.scenario)?)
        .bind(run.status.to_string())
        .bind(run.phase_schedule.as_ref().map(serde_json::to_value).transpose()?)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GreenhouseError::not_found("simulation", run.id));
        }
        Ok(())
    }

    async fn get_report(&self, simulation_id: Uuid) -> GreenhouseResult<Option<SimulationReport>> {
        let row = sqlx::query("SELECT document FROM simulation_reports WHERE simulation_id = $1")
            .bind(simulation_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.get("document"))?)),
            None => Ok(None),
        }
    }

    async fn save_report(&self, report: &SimulationReport) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO simulation_reports
                (simulation_id, zone_id, status, document, started_at, finished_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (simulation_id) DO UPDATE
                SET status = EXCLUDED.status,
                    document = EXCLUDED.document,
                    finished_at = EXCLUDED.finished_at,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(report.simulation_id)
        .bind(report.zone_id)
        .bind(report.status.to_string())
        .bind(serde_json::to_value(report)?)
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskStatusStore {
    pool: PgPool,
}

impl PgTaskStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn documents(rows: Vec<PgRow>) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row.get("document"))?))
            .collect()
    }
}

#[async_trait]
impl TaskStatusStore for PgTaskStatusStore {
    async fn insert(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_task_statuses
                (task_id, zone_id, task_type, status, correlation_id, parent_task_id, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(status.task_id)
        .bind(status.zone_id)
        .bind(status.task_type.to_string())
        .bind(status.status.to_string())
        .bind(&status.correlation_id)
        .bind(status.parent_task_id)
        .bind(serde_json::to_value(status)?)
        .bind(status.created_at)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, status: &SchedulerTaskStatus) -> GreenhouseResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_task_statuses
            SET status = $2, document = $3, updated_at = $4
            WHERE task_id = $1
            "#,
        )
        .bind(status.task_id)
        .bind(status.status.to_string())
        .bind(serde_json::to_value(status)?)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GreenhouseError::not_found("scheduler_task", status.task_id));
        }
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> GreenhouseResult<Option<SchedulerTaskStatus>> {
        let row = sqlx::query("SELECT document FROM scheduler_task_statuses WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.get("document"))?)),
            None => Ok(None),
        }
    }

    async fn list_for_zone(&self, zone_id: i64) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        let rows = sqlx::query(
            "SELECT document FROM scheduler_task_statuses WHERE zone_id = $1 ORDER BY created_at DESC",
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;
        Self::documents(rows)
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        let rows = sqlx::query(
            "SELECT document FROM scheduler_task_statuses WHERE correlation_id = $1 ORDER BY created_at",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;
        Self::documents(rows)
    }
}

#[derive(Debug, Clone)]
pub struct PgRetryStore {
    pool: PgPool,
}

impl PgRetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> GreenhouseResult<PendingRetryRecord> {
        let status: String = row.get("status");
        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");
        Ok(PendingRetryRecord {
            id: row.get("id"),
            kind: row.get("kind"),
            payload: row.get("payload"),
            attempts: u32::try_from(attempts).unwrap_or(0),
            max_attempts: u32::try_from(max_attempts).unwrap_or(1),
            next_retry_at: row.get::<DateTime<Utc>, _>("next_retry_at"),
            status: parse_status::<RetryStatus>(&status)?,
            last_error: row.get("last_error"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

const RETRY_COLUMNS: &str =
    "id, kind, payload, attempts, max_attempts, next_retry_at, status, last_error, created_at, updated_at";

#[async_trait]
impl RetryStore for PgRetryStore {
    async fn get(&self, id: &str) -> GreenhouseResult<Option<PendingRetryRecord>> {
        let query = format!("SELECT {RETRY_COLUMNS} FROM pending_retry_records WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn upsert(&self, record: &PendingRetryRecord) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_retry_records
                (id, kind, payload, attempts, max_attempts, next_retry_at, status, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
                SET payload = EXCLUDED.payload,
                    attempts = EXCLUDED.attempts,
                    max_attempts = EXCLUDED.max_attempts,
                    next_retry_at = EXCLUDED.next_retry_at,
                    status = EXCLUDED.status,
                    last_error = EXCLUDED.last_error,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.kind)
        .bind(&record.payload)
        .bind(record.attempts as i32)
        .bind(record.max_attempts as i32)
        .bind(record.next_retry_at)
        .bind(record.status.to_string())
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> GreenhouseResult<()> {
        sqlx::query("DELETE FROM pending_retry_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        let query = format!(
            "SELECT {RETRY_COLUMNS} FROM pending_retry_records \
             WHERE status = 'pending' AND next_retry_at <= $1 \
             ORDER BY next_retry_at LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_dead_letters(&self) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        let query = format!(
            "SELECT {RETRY_COLUMNS} FROM pending_retry_records WHERE status = 'dlq' ORDER BY updated_at"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }
}

/// Append-only event sink over `simulation_events`
#[derive(Debug, Clone)]
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn level_name(level: EventLevel) -> &'static str {
    match level {
        EventLevel::Debug => "debug",
        EventLevel::Info => "info",
        EventLevel::Warning => "warning",
        EventLevel::Error => "error",
    }
}

fn level_from_name(raw: &str) -> EventLevel {
    match raw {
        "debug" => EventLevel::Debug,
        "warning" => EventLevel::Warning,
        "error" => EventLevel::Error,
        _ => EventLevel::Info,
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn append(&self, event: SimulationEvent) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO simulation_events
                (simulation_id, zone_id, service, stage, status, level, message, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.simulation_id)
        .bind(event.zone_id)
        .bind(&event.service)
        .bind(&event.stage)
        .bind(&event.status)
        .bind(level_name(event.level))
        .bind(&event.message)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM simulation_events WHERE simulation_id = $1")
                .bind(simulation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn list_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<Vec<SimulationEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT simulation_id, zone_id, service, stage, status, level, message, payload, occurred_at
            FROM simulation_events WHERE simulation_id = $1 ORDER BY id
            "#,
        )
        .bind(simulation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let level: String = row.get("level");
                SimulationEvent {
                    simulation_id: row.get("simulation_id"),
                    zone_id: row.get("zone_id"),
                    service: row.get("service"),
                    stage: row.get("stage"),
                    status: row.get("status"),
                    level: level_from_name(&level),
                    message: row.get("message"),
                    payload: row.get("payload"),
                    occurred_at: row.get::<DateTime<Utc>, _>("occurred_at"),
                }
            })
            .collect())
    }
}
