//! # Greenhouse Configuration Validator
//!
//! Command-line tool for validating greenhouse configuration across environments before
//! starting the dispatch worker.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use greenhouse_core::config::{ConfigManager, GreenhouseConfig};

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate greenhouse configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration (default)
    All,

    /// Validate and print one configuration section
    Component {
        /// Section name (database, simulation, scheduler, retry, locks, dispatch, telemetry)
        name: String,
    },

    /// Print the merged configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Show) => show(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("Configuration validation failed: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<GreenhouseConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for environment '{}'", cli.environment))?;
    Ok(manager.config().clone())
}

fn validate_all(cli: &Cli) -> Result<()> {
    let config = load(cli)?;

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Table => {
            println!("Environment:        {}", config.environment);
            println!(
                "Database:           {}",
                if config.database.url.is_some() {
                    "configured"
                } else {
                    "not configured (in-memory stores)"
                }
            );
            println!("Simulation service: {}", config.simulation.service_name);
            println!(
                "Scheduler:          confirm {}s, expire {}s, recheck {}s",
                config.scheduler.confirm_timeout_seconds,
                config.scheduler.expire_after_seconds,
                config.scheduler.recheck_interval_seconds
            );
            println!(
                "Retry default:      {} attempts, backoff {:?}",
                config.retry.default.max_attempts, config.retry.default.backoff_seconds
            );
            let mut kinds: Vec<_> = config.retry.policies.iter().collect();
            kinds.sort_by(|a, b| a.0.cmp(b.0));
            for (kind, policy) in kinds {
                println!(
                    "  {kind:<18}{} attempts, backoff {:?}",
                    policy.max_attempts, policy.backoff_seconds
                );
            }
            println!(
                "Locks:              lease {}s, acquire timeout {}ms",
                config.locks.lease_ttl_seconds, config.locks.acquire_timeout_ms
            );
            println!(
                "Dispatch:           poll {}ms, batch {}",
                config.dispatch.poll_interval_ms, config.dispatch.batch_size
            );
            println!("\nAll configuration validation checks passed");
        }
    }
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> Result<()> {
    let config = load(cli)?;
    let section = match name.to_lowercase().as_str() {
        "database" => serde_json::to_value(&config.database)?,
        "simulation" => serde_json::to_value(&config.simulation)?,
        "scheduler" => serde_json::to_value(&config.scheduler)?,
        "retry" => serde_json::to_value(&config.retry)?,
        "locks" => serde_json::to_value(&config.locks)?,
        "dispatch" => serde_json::to_value(&config.dispatch)?,
        "telemetry" => serde_json::to_value(&config.telemetry)?,
        other => bail!("unknown component: {other}"),
    };
    println!("{}", serde_json::to_string_pretty(&section)?);
    println!("Component '{name}' validation passed");
    Ok(())
}

fn show(cli: &Cli) -> Result<()> {
    let config = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
