//! # Named Locks
//!
//! Per-key mutual exclusion for side-effecting operations (node id, alert dedupe key,
//! simulation run). Locks are time-bounded leases, not indefinite locks: a holder that
//! dies leaves a lease that simply expires.
//!
//! ## Contract
//!
//! - Acquisition waits at most [`LockOptions::wait`]; not acquiring is reported as
//!   `None`, which callers treat as "already in progress" and turn into a silent no-op.
//! - [`with_named_lock`] releases the lease on every exit path, including errors and
//!   panics inside the guarded operation.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::GreenhouseResult;
use crate::metrics;

pub use memory::InMemoryNamedLock;
#[cfg(feature = "postgres")]
pub use postgres::PgNamedLock;

/// Proof of a held lease; required to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lease length; bounds how long a crashed holder blocks the key
    pub ttl: Duration,
    /// Maximum time spent waiting for a contended key
    pub wait: Duration,
    pub poll_interval: Duration,
}

impl LockOptions {
    pub fn new(ttl: Duration, wait: Duration) -> Self {
        Self {
            ttl,
            wait,
            poll_interval: Duration::from_millis(25),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            ttl: config.lease_ttl(),
            wait: config.acquire_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Single non-blocking attempt
    async fn try_acquire(&self, key: &str, ttl: Duration) -> GreenhouseResult<Option<LockToken>>;

    /// Returns `false` when the lease had already expired or been taken over
    async fn release(&self, token: &LockToken) -> GreenhouseResult<bool>;

    /// Poll [`NamedLock::try_acquire`] until it succeeds or `options.wait` elapses
    async fn acquire(&self, key: &str, options: &LockOptions) -> GreenhouseResult<Option<LockToken>> {
        let deadline = tokio::time::Instant::now() + options.wait;
        loop {
            if let Some(token) = self.try_acquire(key, options.ttl).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() + options.poll_interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    }
}

/// Run `operation` while holding `key`.
///
/// Returns `Ok(None)` without running the operation when the lock cannot be acquired in
/// time. The lease is released whether the operation succeeds, fails or panics.
pub async fn with_named_lock<L, F, Fut, T>(
    lock: &L,
    key: &str,
    options: &LockOptions,
    operation: F,
) -> GreenhouseResult<Option<T>>
where
    L: NamedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = GreenhouseResult<T>>,
{
    let Some(token) = lock.acquire(key, options).await? else {
        tracing::debug!(lock_key = %key, "Named lock busy, skipping");
        metrics::record_lock_contended(key);
        return Ok(None);
    };

    let outcome = AssertUnwindSafe(operation()).catch_unwind().await;

    match lock.release(&token).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(lock_key = %key, "Named lock lease expired before release");
        }
        Err(error) => {
            tracing::warn!(lock_key = %key, error = %error, "Failed to release named lock");
        }
    }

    match outcome {
        Ok(result) => result.map(Some),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
