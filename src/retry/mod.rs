//! # Bounded Retry and Dead-Lettering
//!
//! Wraps side-effecting operations (alert ingestion, node config delivery) with
//! compensating state keyed by a dedupe key:
//!
//! - every failure increments `attempts` and schedules the next try from a fixed,
//!   ascending backoff ladder
//! - the failure that brings `attempts` to `max_attempts` moves the record to `dlq`
//! - `dlq` is terminal for automation; only [`RetryManager::requeue_dead_letter`] exits it
//! - each execution runs under the named lock for its key, so concurrent duplicates
//!   collapse into one side effect and a silent no-op

pub mod manager;
pub mod policy;
pub mod record;

pub use manager::{RetryManager, RetryOutcome};
pub use policy::RetryPolicy;
pub use record::{PendingRetryRecord, RetryStatus};
