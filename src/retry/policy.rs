use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigResult, ConfigurationError};

/// Ceiling on a single backoff rung (one year)
const MAX_BACKOFF_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Bounded retry policy with a fixed, ascending backoff ladder.
///
/// Attempts beyond the ladder reuse its last rung, so worst-case latency is bounded by
/// `max_attempts * last rung`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_seconds: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: vec![60, 120, 240],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_seconds: Vec<u64>) -> Self {
        Self {
            max_attempts,
            backoff_seconds,
        }
    }

    /// `field` names the policy's location in the configuration tree
    pub fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.max_attempts"),
                self.max_attempts,
                "must be at least 1",
            ));
        }
        if self.backoff_seconds.is_empty() {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.backoff_seconds"),
                "[]",
                "must not be empty",
            ));
        }
        if self.backoff_seconds.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.backoff_seconds"),
                format!("{:?}", self.backoff_seconds),
                "must be ascending",
            ));
        }
        Ok(())
    }

    /// Delay before the retry that follows failure number `attempts` (1-indexed)
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let rung = (attempts.max(1) as usize - 1).min(self.backoff_seconds.len().saturating_sub(1));
        let seconds = self
            .backoff_seconds
            .get(rung)
            .copied()
            .unwrap_or(60)
            .min(MAX_BACKOFF_SECONDS);
        Duration::seconds(seconds as i64)
    }

    pub fn next_retry_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.backoff_for(attempts)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
