//! # Structured Logging Module
//!
//! Environment-aware `tracing` initialisation. The environment comes from
//! `GREENHOUSE_ENV` / `APP_ENV` (default `development`); `RUST_LOG` wins over the
//! environment default level. Initialisation is idempotent and never panics when a
//! host already installed a global subscriber.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{ConfigManager, TelemetryConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_with_telemetry(&TelemetryConfig::default());
}

/// Initialize structured logging, honouring the `[telemetry]` configuration section
pub fn init_with_telemetry(telemetry: &TelemetryConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = build_filter(&environment, telemetry.log_level.as_deref());

        let layer = if telemetry.json_logs {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized, keeping it");
        }

        tracing::info!(
            environment = %environment,
            json = telemetry.json_logs,
            "Structured logging initialized"
        );
    });
}

fn build_filter(environment: &str, configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = configured
            .map(str::to_string)
            .unwrap_or_else(|| default_log_level(environment).to_string());
        EnvFilter::new(directive)
    })
}

/// Default level for an environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
