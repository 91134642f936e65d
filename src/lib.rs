#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Greenhouse Core
//!
//! Orchestration core for greenhouse zone automation.
//!
//! ## Overview
//!
//! Long-running greenhouse processes are modelled as chains of short, idempotent steps
//! that re-derive every decision from durable storage and wait by scheduling a future
//! dispatch of themselves, never by blocking:
//!
//! - **Simulation**: accelerated grow-cycle runs. A real-time budget is split across
//!   recipe phases ([`simulation::schedule`]), each step opens or closes one phase entry
//!   on the run's report, and the last step harvests and finalizes.
//! - **Scheduler**: zone automation tasks classified as run / skip / fail with a closed
//!   reason-code vocabulary, asynchronous hardware operations confirmed by follow-up
//!   tasks against absolute deadlines.
//! - **Retry**: bounded, fixed-ladder retries with a dead-letter state for side-effecting
//!   jobs, serialized by named locks.
//!
//! ## Module Organization
//!
//! - [`simulation`] - allocator, run/report model, step orchestrator, finalizer
//! - [`scheduler`] - task lifecycle engine, states, timeline
//! - [`retry`] - retry policies, pending records, retry manager
//! - [`jobs`] - alert ingestion and node config delivery
//! - [`dispatch`] - delayed self-dispatch and the dispatch worker
//! - [`locks`] - named lease locks
//! - [`store`] - durable storage ports (in-memory and PostgreSQL)
//! - [`cycle`], [`devices`], [`events`], [`cache`] - ports to neighbouring services
//! - [`config`], [`logging`], [`metrics`], [`error`], [`clock`] - ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use greenhouse_core::config::ConfigManager;
//! use greenhouse_core::logging::init_with_telemetry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! init_with_telemetry(&manager.config().telemetry);
//! println!("retry kinds configured: {}", manager.config().retry.policies.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod jobs;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod system;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigManager, GreenhouseConfig};
pub use error::{GreenhouseError, GreenhouseResult, StateTransitionError};
pub use retry::{RetryManager, RetryOutcome, RetryPolicy};
pub use scheduler::{SchedulerTaskState, SchedulerTaskStatus, TaskLifecycleEngine};
pub use simulation::{SimulationOrchestrator, SimulationReport, SimulationRun, StepOutcome};
pub use system::{ExternalPorts, GreenhouseSystem, StorageBackend};
