use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    /// Terminal until manually requeued
    Dlq,
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Dlq => write!(f, "dlq"),
        }
    }
}

impl std::str::FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dlq" => Ok(Self::Dlq),
            other => Err(format!("unknown retry status: {other}")),
        }
    }
}

/// Compensating state for a retry-managed operation, keyed by its dedupe key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRetryRecord {
    pub id: String,
    pub kind: String,
    /// Everything needed to re-run the operation from the sweep
    pub payload: Value,
    /// Failures so far; never decreases except on manual requeue
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: RetryStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingRetryRecord {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            attempts: 0,
            max_attempts,
            next_retry_at: now,
            status: RetryStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.status == RetryStatus::Dlq
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RetryStatus::Pending && self.next_retry_at <= now
    }

    /// Count a failure; moves to `dlq` once `attempts` reaches `max_attempts`.
    ///
    /// Returns `true` when this failure dead-lettered the record.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        self.attempts += 1;
        self.max_attempts = policy.max_attempts;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if policy.is_exhausted(self.attempts) {
            self.status = RetryStatus::Dlq;
            true
        } else {
            self.next_retry_at = policy.next_retry_at(self.attempts, now);
            false
        }
    }

    /// Manual exit from `dlq`
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.attempts = 0;
        self.status = RetryStatus::Pending;
        self.next_retry_at = now;
        self.updated_at = now;
    }
}
