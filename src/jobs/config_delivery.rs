//! Node configuration delivery job.
//!
//! Pushes a versioned configuration document to one node. Deliveries to the same node
//! are serialized by the `node:{node_uid}` lock; a failed push is retried from the
//! pending record, whose payload carries the full document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{kinds, SweepStats};
use crate::devices::{CommandPayload, DeviceCommand, DeviceCommandTransport};
use crate::error::GreenhouseResult;
use crate::retry::{RetryManager, RetryOutcome};

pub const CONFIG_CHANNEL: &str = "config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_uid: String,
    pub version: u64,
    pub config: Value,
}

impl NodeConfig {
    pub fn new(node_uid: impl Into<String>, version: u64, config: Value) -> Self {
        Self {
            node_uid: node_uid.into(),
            version,
            config,
        }
    }

    pub fn retry_key(&self) -> String {
        format!("node:{}", self.node_uid)
    }

    fn command(&self) -> DeviceCommand {
        DeviceCommand::new(
            self.node_uid.clone(),
            CONFIG_CHANNEL,
            CommandPayload::Configure {
                config: self.config.clone(),
                version: self.version,
            },
        )
        .with_correlation_id(format!("config:{}:v{}", self.node_uid, self.version))
    }
}

pub struct NodeConfigDeliveryJob {
    retry: Arc<RetryManager>,
    transport: Arc<dyn DeviceCommandTransport>,
}

impl std::fmt::Debug for NodeConfigDeliveryJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfigDeliveryJob").finish_non_exhaustive()
    }
}

impl NodeConfigDeliveryJob {
    pub fn new(retry: Arc<RetryManager>, transport: Arc<dyn DeviceCommandTransport>) -> Self {
        Self { retry, transport }
    }

    pub async fn deliver(&self, node_config: &NodeConfig) -> GreenhouseResult<RetryOutcome<()>> {
        let key = node_config.retry_key();
        let payload = serde_json::to_value(node_config)?;
        let outcome = self
            .retry
            .execute(&key, kinds::CONFIG_DELIVERY, payload, || {
                self.transport.send(node_config.command())
            })
            .await?;

        if outcome.is_success() {
            tracing::info!(
                node_uid = %node_config.node_uid,
                version = node_config.version,
                "Node config delivered"
            );
        }
        Ok(outcome)
    }

    /// Re-run pending deliveries whose backoff elapsed at `now`
    pub async fn sweep(&self, now: DateTime<Utc>, limit: usize) -> GreenhouseResult<SweepStats> {
        let mut stats = SweepStats::default();
        let due = self.retry.due_records(now, limit).await?;

        for record in due.into_iter().filter(|r| r.kind == kinds::CONFIG_DELIVERY) {
            let node_config: NodeConfig = match serde_json::from_value(record.payload.clone()) {
                Ok(node_config) => node_config,
                Err(error) => {
                    tracing::warn!(retry_key = %record.id, error = %error, "Undecodable config payload, skipping");
                    stats.skipped += 1;
                    continue;
                }
            };
            let outcome = self.deliver(&node_config).await?;
            stats.tally(&outcome);
        }
        Ok(stats)
    }
}
