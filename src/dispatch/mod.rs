//! # Delayed Self-Dispatch
//!
//! "Invoke this step again after N seconds." Waiting is never a blocking sleep or a
//! recursive call: a step persists a [`DispatchEnvelope`] with an absolute `due_at` and
//! returns. Whichever worker instance later claims the envelope runs the next step.
//!
//! ## Delivery semantics
//!
//! - **At-least-once**: a claimed envelope that is never completed becomes claimable
//!   again, and transient handler failures are redelivered. Handlers must be idempotent.
//! - **No ordering across targets**: each run or task chain schedules at most one
//!   successor, so ordering only matters within a chain.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::GreenhouseResult;

pub use memory::InMemoryDispatcher;
#[cfg(feature = "postgres")]
pub use postgres::PgDispatcher;
pub use worker::{DispatchHandler, DispatchRouter, DispatchWorker};

/// What a dispatched envelope invokes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchTarget {
    /// One tick of a simulation run. `phase_index` is the phase whose timer fired;
    /// `None` for the initial step.
    SimulationStep {
        simulation_id: Uuid,
        phase_index: Option<i32>,
    },
    /// Evaluation of a scheduler task (initial or follow-up)
    SchedulerTask { task_id: Uuid },
}

impl DispatchTarget {
    pub fn simulation_step(simulation_id: Uuid, phase_index: Option<i32>) -> Self {
        Self::SimulationStep {
            simulation_id,
            phase_index,
        }
    }

    pub fn scheduler_task(task_id: Uuid) -> Self {
        Self::SchedulerTask { task_id }
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimulationStep {
                simulation_id,
                phase_index: Some(index),
            } => write!(f, "simulation_step:{simulation_id}:{index}"),
            Self::SimulationStep {
                simulation_id,
                phase_index: None,
            } => write!(f, "simulation_step:{simulation_id}:start"),
            Self::SchedulerTask { task_id } => write!(f, "scheduler_task:{task_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub id: Uuid,
    pub target: DispatchTarget,
    /// Absolute time at which the envelope becomes claimable
    pub due_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempt, 1-indexed
    pub attempt: u32,
}

impl DispatchEnvelope {
    pub fn new(target: DispatchTarget, enqueued_at: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            due_at: enqueued_at + to_chrono(delay),
            enqueued_at,
            attempt: 1,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }

    /// Seconds between enqueue and due time
    pub fn delay_seconds(&self) -> i64 {
        (self.due_at - self.enqueued_at).num_seconds()
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Durable delayed-task port
#[async_trait]
pub trait DelayedDispatcher: Send + Sync {
    /// Schedule `target` to run after `delay`
    async fn dispatch(&self, target: DispatchTarget, delay: Duration) -> GreenhouseResult<DispatchEnvelope>;

    /// Claim up to `limit` envelopes due at `now`, oldest first
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> GreenhouseResult<Vec<DispatchEnvelope>>;

    /// Acknowledge a claimed envelope; it will not be delivered again
    async fn complete(&self, envelope_id: Uuid) -> GreenhouseResult<()>;

    /// Return a claimed envelope to the queue after `delay` with its attempt bumped
    async fn redeliver(&self, envelope: DispatchEnvelope, delay: Duration) -> GreenhouseResult<()>;
}
