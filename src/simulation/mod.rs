//! # Simulation Orchestration
//!
//! Drives an accelerated grow-cycle simulation as a chain of short, idempotent,
//! self-rescheduling steps:
//!
//! 1. `start_run` persists the run and dispatches the first step
//! 2. each step opens or closes one phase entry on the report, advances the owning
//!    grow cycle, and dispatches its successor after the phase's allocated seconds
//! 3. the last phase (or a domain halt, or an advance failure) finalizes the run:
//!    harvest, metrics, terminal status
//!
//! Steps carry the phase index they were scheduled for. A step whose token no longer
//! matches the report's open entry is stale and does nothing, so duplicate deliveries
//! never double-advance a cycle.

pub mod finalizer;
pub mod models;
pub mod orchestrator;
pub mod schedule;

pub use finalizer::SimulationFinalizer;
pub use models::{
    PhaseEntry, PhaseEntryStatus, ReportError, ReportMetrics, ReportStatus, ScenarioContext,
    SimulationReport, SimulationRun, SimulationRunStatus, SimulationScenario,
};
pub use orchestrator::{
    SimulationContext, SimulationOrchestrator, SimulationStatusSnapshot, StepOutcome, StepSkip,
};
pub use schedule::{allocate, PhaseScheduleMap, PhaseWeight};
