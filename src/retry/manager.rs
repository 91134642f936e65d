use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::{PendingRetryRecord, RetryPolicy, RetryStatus};
use crate::cache::{retry_applied_key, StatusCache};
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::{GreenhouseError, GreenhouseResult, StateTransitionError};
use crate::locks::{with_named_lock, LockOptions, NamedLock};
use crate::metrics;
use crate::store::RetryStore;

/// Result of one retry-managed execution
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded(T),
    /// The operation failed (or its backoff has not elapsed); the sweep will retry it
    RetryScheduled {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// This failure exhausted the policy
    DeadLettered { attempts: u32, last_error: String },
    /// The record is already dead-lettered; the operation was not run
    DeadLetterSkipped,
    /// Another worker holds the key's lock
    AlreadyInProgress,
    /// The same payload already succeeded for this key within the applied window
    AlreadyApplied,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Self::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

pub struct RetryManager {
    store: Arc<dyn RetryStore>,
    lock: Arc<dyn NamedLock>,
    lock_options: LockOptions,
    cache: Arc<dyn StatusCache>,
    policies: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("lock_options", &self.lock_options)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl RetryManager {
    pub fn new(
        store: Arc<dyn RetryStore>,
        lock: Arc<dyn NamedLock>,
        lock_options: LockOptions,
        cache: Arc<dyn StatusCache>,
        policies: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            lock,
            lock_options,
            cache,
            policies,
            clock,
        }
    }

    pub fn policy_for(&self, kind: &str) -> &RetryPolicy {
        self.policies.policy_for(kind)
    }

    /// Run `operation` under the lock for `key`, tracking failures on the record `key`.
    ///
    /// `payload` is stored on the record so a sweep can re-run the operation later.
    pub async fn execute<F, Fut, T>(
        &self,
        key: &str,
        kind: &str,
        payload: Value,
        operation: F,
    ) -> GreenhouseResult<RetryOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GreenhouseResult<T>>,
    {
        let outcome = with_named_lock(self.lock.as_ref(), key, &self.lock_options, || {
            self.execute_locked(key, kind, payload, operation)
        })
        .await?;

        Ok(outcome.unwrap_or_else(|| {
            tracing::debug!(retry_key = %key, kind = %kind, "Operation already in progress, skipping");
            RetryOutcome::AlreadyInProgress
        }))
    }

    async fn execute_locked<F, Fut, T>(
        &self,
        key: &str,
        kind: &str,
        payload: Value,
        operation: F,
    ) -> GreenhouseResult<RetryOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GreenhouseResult<T>>,
    {
        let now = self.clock.now();
        let existing = self.store.get(key).await?;

        if let Some(record) = &existing {
            if record.status == RetryStatus::Dlq {
                tracing::warn!(
                    retry_key = %key,
                    kind = %kind,
                    attempts = record.attempts,
                    "Record is dead-lettered, not retrying"
                );
                return Ok(RetryOutcome::DeadLetterSkipped);
            }
            if record.next_retry_at > now {
                tracing::debug!(
                    retry_key = %key,
                    next_retry_at = %record.next_retry_at,
                    "Backoff not elapsed, deferring to sweep"
                );
                return Ok(RetryOutcome::RetryScheduled {
                    attempts: record.attempts,
                    next_retry_at: record.next_retry_at,
                });
            }
        }

        // A caller that waited out the lock behind a successful twin must not repeat it
        if existing.is_none() && self.was_applied(key, &payload).await {
            tracing::debug!(retry_key = %key, kind = %kind, "Payload already applied, skipping");
            return Ok(RetryOutcome::AlreadyApplied);
        }

        match operation().await {
            Ok(value) => {
                if existing.is_some() {
                    self.store.delete(key).await?;
                    tracing::info!(retry_key = %key, kind = %kind, "Retried operation succeeded");
                }
                self.mark_applied(key, payload).await;
                Ok(RetryOutcome::Succeeded(value))
            }
            Err(error) => {
                let policy = self.policy_for(kind).clone();
                let mut record = existing.unwrap_or_else(|| {
                    PendingRetryRecord::new(key, kind, payload, policy.max_attempts, now)
                });
                let message = error.to_string();
                let dead_lettered = record.record_failure(message.clone(), &policy, now);
                self.store.upsert(&record).await?;
                metrics::record_retry_failure(kind, dead_lettered);

                if dead_lettered {
                    tracing::error!(
                        retry_key = %key,
                        kind = %kind,
                        attempts = record.attempts,
                        error_code = error.code(),
                        error = %message,
                        "Retry budget exhausted, record dead-lettered"
                    );
                    Ok(RetryOutcome::DeadLettered {
                        attempts: record.attempts,
                        last_error: message,
                    })
                } else {
                    tracing::warn!(
                        retry_key = %key,
                        kind = %kind,
                        attempts = record.attempts,
                        max_attempts = record.max_attempts,
                        next_retry_at = %record.next_retry_at,
                        error = %message,
                        "Operation failed, retry scheduled"
                    );
                    Ok(RetryOutcome::RetryScheduled {
                        attempts: record.attempts,
                        next_retry_at: record.next_retry_at,
                    })
                }
            }
        }
    }

    async fn was_applied(&self, key: &str, payload: &Value) -> bool {
        match self.cache.get(&retry_applied_key(key)).await {
            Ok(marker) => marker.as_ref() == Some(payload),
            Err(error) => {
                tracing::warn!(retry_key = %key, error = %error, "Failed to read applied marker");
                false
            }
        }
    }

    async fn mark_applied(&self, key: &str, payload: Value) {
        let ttl = self.policies.applied_window();
        if let Err(error) = self.cache.put(&retry_applied_key(key), payload, ttl).await {
            tracing::warn!(retry_key = %key, error = %error, "Failed to write applied marker");
        }
    }

    /// Pending records whose backoff has elapsed at `now`
    pub async fn due_records(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        self.store.list_due(now, limit).await
    }

    pub async fn dead_letters(&self) -> GreenhouseResult<Vec<PendingRetryRecord>> {
        self.store.list_dead_letters().await
    }

    pub async fn record(&self, key: &str) -> GreenhouseResult<Option<PendingRetryRecord>> {
        self.store.get(key).await
    }

    /// Manual exit from `dlq`: attempts reset and the record is due immediately
    pub async fn requeue_dead_letter(&self, key: &str) -> GreenhouseResult<PendingRetryRecord> {
        let mut record = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| GreenhouseError::not_found("retry_record", key))?;

        if record.status != RetryStatus::Dlq {
            return Err(StateTransitionError::Invalid {
                entity: "retry_record",
                id: key.to_string(),
                from: record.status.to_string(),
                to: RetryStatus::Pending.to_string(),
            }
            .into());
        }

        record.requeue(self.clock.now());
        self.store.upsert(&record).await?;
        tracing::info!(retry_key = %key, kind = %record.kind, "Dead-lettered record requeued");
        Ok(record)
    }
}
