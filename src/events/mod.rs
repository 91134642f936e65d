//! # Structured Audit Events
//!
//! Append-only event sink consumed by the simulation orchestrator. Every event carries
//! the run id and zone id plus `service / stage / status / level / message / payload`
//! and a timestamp. Sinks never rewrite or delete events.

pub mod publisher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GreenhouseResult;

pub use publisher::EventPublisher;

/// Stage names stamped on simulation events
pub mod stages {
    pub const REPORT: &str = "report";
    pub const PHASE: &str = "phase";
    pub const HARVEST: &str = "harvest";
    pub const FINALIZE: &str = "finalize";
}

/// Status names stamped on simulation events
pub mod statuses {
    pub const RUNNING: &str = "running";
    pub const ADVANCED: &str = "advanced";
    pub const HALTED: &str = "halted";
    pub const HARVESTED: &str = "harvested";
    pub const FAILED: &str = "failed";
    pub const COMPLETED: &str = "completed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub simulation_id: Uuid,
    pub zone_id: i64,
    pub service: String,
    pub stage: String,
    pub status: String,
    pub level: EventLevel,
    pub message: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl SimulationEvent {
    pub fn new(
        simulation_id: Uuid,
        zone_id: i64,
        service: impl Into<String>,
        stage: &str,
        status: &str,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            simulation_id,
            zone_id,
            service: service.into(),
            stage: stage.to_string(),
            status: status.to_string(),
            level: EventLevel::Info,
            message: message.into(),
            payload: Value::Null,
            occurred_at,
        }
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: SimulationEvent) -> GreenhouseResult<()>;

    async fn count_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<u64>;

    async fn list_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<Vec<SimulationEvent>>;
}
