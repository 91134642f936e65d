//! Alert ingestion job.
//!
//! Alerts arrive from zone controllers and external monitors, possibly more than once.
//! The dedupe key names the named lock (`alert:{dedupe_key}`) and the pending retry
//! record, so concurrent duplicates collapse into a single processor call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{kinds, SweepStats};
use crate::error::GreenhouseResult;
use crate::retry::{RetryManager, RetryOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingAlert {
    pub dedupe_key: String,
    pub zone_id: Option<i64>,
    pub code: String,
    #[serde(default)]
    pub details: Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingAlert {
    pub fn new(
        dedupe_key: impl Into<String>,
        code: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dedupe_key: dedupe_key.into(),
            zone_id: None,
            code: code.into(),
            details: Value::Null,
            received_at,
        }
    }

    pub fn for_zone(mut self, zone_id: i64) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn retry_key(&self) -> String {
        format!("alert:{}", self.dedupe_key)
    }
}

/// Downstream alert rule processor
#[async_trait]
pub trait AlertProcessor: Send + Sync {
    async fn process(&self, alert: &IncomingAlert) -> GreenhouseResult<()>;
}

pub struct AlertIngestionJob {
    retry: Arc<RetryManager>,
    processor: Arc<dyn AlertProcessor>,
}

impl std::fmt::Debug for AlertIngestionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertIngestionJob").finish_non_exhaustive()
    }
}

impl AlertIngestionJob {
    pub fn new(retry: Arc<RetryManager>, processor: Arc<dyn AlertProcessor>) -> Self {
        Self { retry, processor }
    }

    pub async fn ingest(&self, alert: &IncomingAlert) -> GreenhouseResult<RetryOutcome<()>> {
        let key = alert.retry_key();
        let payload = serde_json::to_value(alert)?;
        let outcome = self
            .retry
            .execute(&key, kinds::ALERT_INGESTION, payload, || {
                self.processor.process(alert)
            })
            .await?;

        if outcome.is_success() {
            tracing::debug!(
                dedupe_key = %alert.dedupe_key,
                code = %alert.code,
                zone_id = ?alert.zone_id,
                "Alert ingested"
            );
        }
        Ok(outcome)
    }

    /// Re-run pending alert records whose backoff elapsed at `now`
    pub async fn sweep(&self, now: DateTime<Utc>, limit: usize) -> GreenhouseResult<SweepStats> {
        let mut stats = SweepStats::default();
        let due = self.retry.due_records(now, limit).await?;

        for record in due.into_iter().filter(|r| r.kind == kinds::ALERT_INGESTION) {
            let alert: IncomingAlert = match serde_json::from_value(record.payload.clone()) {
                Ok(alert) => alert,
                Err(error) => {
                    tracing::warn!(retry_key = %record.id, error = %error, "Undecodable alert payload, skipping");
                    stats.skipped += 1;
                    continue;
                }
            };
            let outcome = self.ingest(&alert).await?;
            stats.tally(&outcome);
        }

        if stats.attempted > 0 {
            tracing::info!(
                attempted = stats.attempted,
                succeeded = stats.succeeded,
                dead_lettered = stats.dead_lettered,
                "Alert retry sweep finished"
            );
        }
        Ok(stats)
    }
}
