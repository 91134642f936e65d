//! # Greenhouse Configuration System
//!
//! Layered configuration for the orchestration core. Sources are merged in order:
//!
//! 1. Compiled defaults ([`GreenhouseConfig::default`])
//! 2. `config/greenhouse.toml` (optional)
//! 3. `config/greenhouse.{environment}.toml` (optional)
//! 4. Environment variables prefixed with `GREENHOUSE__` (e.g. `GREENHOUSE__LOCKS__LEASE_TTL_SECONDS=60`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use greenhouse_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let policy = manager.config().retry.policy_for("alert_ingestion");
//! println!("alert ingestion retries up to {} times", policy.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::retry::RetryPolicy;

/// Root configuration structure mirroring `config/greenhouse.toml`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GreenhouseConfig {
    /// Deployment environment (development, test, production)
    pub environment: String,

    /// Database connection settings for the PostgreSQL stores
    pub database: DatabaseConfig,

    /// Accelerated grow-cycle simulation settings
    pub simulation: SimulationConfig,

    /// Scheduler task lifecycle deadlines
    pub scheduler: SchedulerConfig,

    /// Bounded retry policies keyed by retry kind
    pub retry: RetryConfig,

    /// Named lock behaviour
    pub locks: LockConfig,

    /// Delayed dispatch polling
    pub dispatch: DispatchConfig,

    /// Logging settings
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// `service` field stamped on every simulation event
    pub service_name: String,
    /// TTL of the cached run status
    pub status_cache_ttl_seconds: u64,
    /// Lease held by a single step while it mutates the report
    pub step_lock_ttl_seconds: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            service_name: "simulation".to_string(),
            status_cache_ttl_seconds: 600,
            step_lock_ttl_seconds: 120,
        }
    }
}

impl SimulationConfig {
    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_seconds)
    }

    pub fn step_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.step_lock_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds after acceptance at which an unresolved task times out (`due_at`)
    pub confirm_timeout_seconds: u64,
    /// Seconds after acceptance at which an unresolved task expires (`expires_at`)
    pub expire_after_seconds: u64,
    /// Delay between follow-up re-checks of an asynchronous hardware operation
    pub recheck_interval_seconds: u64,
    /// TTL of cached task status snapshots
    pub status_ttl_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_seconds: 900,
            expire_after_seconds: 3600,
            recheck_interval_seconds: 60,
            status_ttl_seconds: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn confirm_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirm_timeout_seconds as i64)
    }

    pub fn expire_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expire_after_seconds as i64)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_seconds)
    }
}

/// Retry policies. Kinds without an explicit entry use `default`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default: RetryPolicy,
    pub policies: HashMap<String, RetryPolicy>,
    /// How long a successful payload suppresses an identical execution for its key
    pub applied_window_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert("alert_ingestion".to_string(), RetryPolicy::default());
        policies.insert("config_delivery".to_string(), RetryPolicy::default());
        Self {
            default: RetryPolicy::default(),
            policies,
            applied_window_seconds: 300,
        }
    }
}

impl RetryConfig {
    pub fn policy_for(&self, kind: &str) -> &RetryPolicy {
        self.policies.get(kind).unwrap_or(&self.default)
    }

    pub fn applied_window(&self) -> Duration {
        Duration::from_secs(self.applied_window_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_ttl_seconds: u64,
    pub acquire_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: 30,
            acquire_timeout_ms: 2000,
            poll_interval_ms: 25,
        }
    }
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Overrides the environment default when set (same syntax as `RUST_LOG`)
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            json_logs: false,
        }
    }
}

impl Default for GreenhouseConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            database: DatabaseConfig::default(),
            simulation: SimulationConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            locks: LockConfig::default(),
            dispatch: DispatchConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl GreenhouseConfig {
    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if !matches!(
            self.environment.as_str(),
            "development" | "test" | "production"
        ) {
            return Err(ConfigurationError::UnknownEnvironment {
                environment: self.environment.clone(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                "must be at least 1",
            ));
        }

        if self.scheduler.confirm_timeout_seconds > self.scheduler.expire_after_seconds {
            return Err(ConfigurationError::invalid_value(
                "scheduler.confirm_timeout_seconds",
                self.scheduler.confirm_timeout_seconds,
                "must not exceed scheduler.expire_after_seconds",
            ));
        }

        if self.scheduler.recheck_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.recheck_interval_seconds",
                0,
                "must be at least 1",
            ));
        }

        self.retry.default.validate("retry.default")?;
        for (kind, policy) in &self.retry.policies {
            policy.validate(&format!("retry.policies.{kind}"))?;
        }

        if self.locks.poll_interval_ms == 0 || self.locks.lease_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "locks",
                format!(
                    "poll_interval_ms={}, lease_ttl_seconds={}",
                    self.locks.poll_interval_ms, self.locks.lease_ttl_seconds
                ),
                "poll interval and lease ttl must be positive",
            ));
        }

        if self.retry.applied_window().as_millis() < u128::from(self.locks.acquire_timeout_ms) {
            return Err(ConfigurationError::invalid_value(
                "retry.applied_window_seconds",
                self.retry.applied_window_seconds,
                "must cover locks.acquire_timeout_ms",
            ));
        }

        if self.dispatch.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.batch_size",
                0,
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Database URL, required only when PostgreSQL stores are in use
    pub fn database_url(&self) -> ConfigResult<&str> {
        self.database
            .url
            .as_deref()
            .ok_or_else(|| ConfigurationError::missing_required_field("url", "database"))
    }
}
