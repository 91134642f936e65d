//! # Device Command Transport
//!
//! Fire-and-forget port to zone hardware. A command addresses one node and one channel
//! and carries a typed payload; delivery is acknowledged by the bridge but the physical
//! effect is confirmed separately (see [`crate::scheduler::ZoneAutomation`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{GreenhouseError, GreenhouseResult};

/// Typed command payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    /// Switch an actuator channel on or off
    SetState { on: bool },
    /// Drive an analog channel to a setpoint
    SetValue { value: f64 },
    /// Run an actuator for a bounded time
    RunFor { seconds: u64 },
    /// Push a node configuration document
    Configure { config: Value, version: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub node_uid: String,
    pub channel: String,
    pub payload: CommandPayload,
    /// Links the command back to the scheduler chain or job that issued it
    pub correlation_id: Option<String>,
}

impl DeviceCommand {
    pub fn new(node_uid: impl Into<String>, channel: impl Into<String>, payload: CommandPayload) -> Self {
        Self {
            node_uid: node_uid.into(),
            channel: channel.into(),
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[async_trait]
pub trait DeviceCommandTransport: Send + Sync {
    /// Hand the command to the bridge. An `Err` is a [`GreenhouseError::TransportFailure`].
    async fn send(&self, command: DeviceCommand) -> GreenhouseResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub command: DeviceCommand,
    pub sent_at: DateTime<Utc>,
}

/// Transport that records every command and can be told to fail for specific nodes
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: RwLock<Vec<SentCommand>>,
    failing_nodes: RwLock<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_node(&self, node_uid: impl Into<String>) {
        self.failing_nodes.write().insert(node_uid.into());
    }

    pub fn heal_node(&self, node_uid: &str) {
        self.failing_nodes.write().remove(node_uid);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.read().clone()
    }

    pub fn sent_to(&self, node_uid: &str) -> Vec<DeviceCommand> {
        self.sent
            .read()
            .iter()
            .filter(|s| s.command.node_uid == node_uid)
            .map(|s| s.command.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceCommandTransport for RecordingTransport {
    async fn send(&self, command: DeviceCommand) -> GreenhouseResult<()> {
        if self.failing_nodes.read().contains(&command.node_uid) {
            tracing::warn!(
                node_uid = %command.node_uid,
                channel = %command.channel,
                "Device command rejected by transport"
            );
            return Err(GreenhouseError::transport(
                command.node_uid.clone(),
                "node unreachable",
            ));
        }

        tracing::debug!(
            node_uid = %command.node_uid,
            channel = %command.channel,
            "Device command sent"
        );
        self.sent.write().push(SentCommand {
            command,
            sent_at: Utc::now(),
        });
        Ok(())
    }
}
