//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Handles environment detection,
//! optional TOML layering, and `GREENHOUSE__` environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::GreenhouseConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "greenhouse";
const ENV_PREFIX: &str = "GREENHOUSE";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: GreenhouseConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful in tests that must not mutate process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading greenhouse configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %config.environment,
            retry_kinds = config.retry.policies.len(),
            lock_ttl_seconds = config.locks.lease_ttl_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding hosts)
    pub fn from_config(config: GreenhouseConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<GreenhouseConfig> {
        let mut defaults = GreenhouseConfig::default();
        defaults.environment = environment.to_string();

        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let layered = config::Config::builder()
            .add_source(
                config::Config::try_from(&defaults)
                    .map_err(|e| ConfigurationError::load_error("defaults", e))?,
            )
            .add_source(config::File::from(base_file.clone()).required(false))
            .add_source(config::File::from(env_file.clone()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(
                    format!("{} / {}", base_file.display(), env_file.display()),
                    e,
                )
            })?;

        layered
            .try_deserialize::<GreenhouseConfig>()
            .map_err(|e| ConfigurationError::load_error("merged configuration", e))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GreenhouseConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var("GREENHOUSE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
