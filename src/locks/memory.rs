//! In-memory lease lock for tests and single-process deployments.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no cross-process coordination
//! - Leases are lost when the process exits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{LockToken, NamedLock};
use crate::clock::{Clock, SystemClock};
use crate::error::GreenhouseResult;

#[derive(Debug, Clone)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryNamedLock {
    leases: Mutex<HashMap<String, Lease>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryNamedLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Whether an unexpired lease exists for `key`
    pub fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.leases
            .lock()
            .get(key)
            .map(|lease| lease.expires_at > now)
            .unwrap_or(false)
    }
}

impl Default for InMemoryNamedLock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl NamedLock for InMemoryNamedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> GreenhouseResult<Option<LockToken>> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();

        if let Some(lease) = leases.get(key) {
            if lease.expires_at > now {
                return Ok(None);
            }
            // Expired lease, take it over
        }

        let lease = Lease {
            token: Uuid::new_v4(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
        };
        let token = LockToken {
            key: key.to_string(),
            token: lease.token,
            expires_at: lease.expires_at,
        };
        leases.insert(key.to_string(), lease);
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> GreenhouseResult<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();

        let Some(lease) = leases.get(&token.key) else {
            return Ok(false);
        };
        if lease.token != token.token {
            return Ok(false);
        }
        let still_valid = lease.expires_at > now;
        leases.remove(&token.key);
        Ok(still_valid)
    }
}
