//! # Retry-Managed Jobs
//!
//! Side-effecting jobs wrapped by [`RetryManager`](crate::retry::RetryManager):
//!
//! - [`AlertIngestionJob`]: hands an incoming alert to the rule processor, deduplicated
//!   by the alert's dedupe key
//! - [`NodeConfigDeliveryJob`]: pushes a configuration document to one node over the
//!   device transport, serialized per node
//!
//! Failures are recorded on a pending retry record; each job's `sweep` re-runs records
//! whose backoff has elapsed.

pub mod alert_ingestion;
pub mod config_delivery;

pub use alert_ingestion::{AlertIngestionJob, AlertProcessor, IncomingAlert};
pub use config_delivery::{NodeConfig, NodeConfigDeliveryJob};

use crate::retry::RetryOutcome;

/// Retry kinds, used to select the retry policy and to filter sweeps
pub mod kinds {
    pub const ALERT_INGESTION: &str = "alert_ingestion";
    pub const CONFIG_DELIVERY: &str = "config_delivery";
}

/// Tally of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    /// In progress elsewhere, already dead-lettered, or undecodable
    pub skipped: usize,
}

impl SweepStats {
    pub(crate) fn tally<T>(&mut self, outcome: &RetryOutcome<T>) {
        self.attempted += 1;
        match outcome {
            RetryOutcome::Succeeded(_) => self.succeeded += 1,
            RetryOutcome::RetryScheduled { .. } => self.rescheduled += 1,
            RetryOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            RetryOutcome::DeadLetterSkipped
            | RetryOutcome::AlreadyInProgress
            | RetryOutcome::AlreadyApplied => self.skipped += 1,
        }
    }
}
