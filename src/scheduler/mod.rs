//! # Scheduler Task Lifecycle
//!
//! Decision state machine for live zone automation:
//!
//! ```text
//! accepted -> running -> completed | failed | rejected | expired | timeout | not_found
//! ```
//!
//! Every evaluation classifies the task as `run`, `skip` or `fail`, stamps a reason code,
//! and appends exactly one timeline event per transition. Asynchronous hardware
//! operations hand off to follow-up tasks sharing the parent's correlation id, which
//! re-check the zone until the condition holds or an absolute deadline passes.

pub mod lifecycle;
pub mod states;
pub mod task_status;
pub mod timeline;

pub use lifecycle::{
    ConditionCheck, EvaluationOutcome, ExecutionMode, PlannedCommand, TaskLifecycleEngine,
    ZoneAutomation,
};
pub use states::{AutomationTaskType, ReasonCode, SchedulerTaskState, TaskDecision};
pub use task_status::{SchedulerTaskStatus, TaskRequest};
pub use timeline::{LifecycleEntry, TimelineEvent, TimelineEventKind};
