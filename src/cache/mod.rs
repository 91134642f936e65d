//! Short-TTL key-value cache for ephemeral run and operation status.
//!
//! The cache is a read accelerator. Durable stores remain the source of truth and
//! every orchestration decision is re-derived from them. The one exception is the
//! applied marker a retry key gets on success, which only narrows duplicate execution
//! within a short window and never replaces a stored record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::GreenhouseResult;

#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> GreenhouseResult<()>;

    async fn get(&self, key: &str) -> GreenhouseResult<Option<Value>>;

    async fn remove(&self, key: &str) -> GreenhouseResult<()>;
}

/// Cache key for a simulation run's status snapshot
pub fn simulation_status_key(simulation_id: &uuid::Uuid) -> String {
    format!("simulation:{simulation_id}:status")
}

/// Cache key marking the last payload that succeeded for a retry key
pub fn retry_applied_key(key: &str) -> String {
    format!("retry:{key}:applied")
}

/// Cache key for a scheduler task's status snapshot
pub fn task_status_key(task_id: &uuid::Uuid) -> String {
    format!("scheduler_task:{task_id}:status")
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Process-local TTL cache
#[derive(Debug)]
pub struct InMemoryStatusCache {
    entries: DashMap<String, CachedValue>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStatusCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop expired entries; returns how many were evicted
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before - self.entries.len()
    }
}

impl Default for InMemoryStatusCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl StatusCache for InMemoryStatusCache {
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> GreenhouseResult<()> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value,
                expires_at: self.clock.now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> GreenhouseResult<Option<Value>> {
        let now = self.clock.now();
        let hit = self
            .entries
            .get(key)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.value.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, cached| cached.expires_at <= now);
        }
        Ok(hit)
    }

    async fn remove(&self, key: &str) -> GreenhouseResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
