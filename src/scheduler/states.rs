use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduler task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerTaskState {
    /// Submitted, waiting for its first evaluation
    Accepted,
    /// Being evaluated, or waiting on an asynchronous hardware confirmation
    Running,
    Completed,
    Failed,
    /// The zone refused the task (override, interlock, disabled zone)
    Rejected,
    /// `expires_at` passed before the task resolved
    Expired,
    /// `due_at` passed before the task resolved
    Timeout,
    /// The target zone no longer exists
    NotFound,
}

impl SchedulerTaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Accepted | Self::Running)
    }

    /// Terminal states that must carry an `error_code`
    pub fn requires_error_code(&self) -> bool {
        matches!(self, Self::Failed | Self::Expired | Self::Timeout | Self::NotFound)
    }

    pub fn can_transition_to(&self, to: SchedulerTaskState) -> bool {
        match self {
            Self::Accepted => to != Self::Accepted,
            Self::Running => !matches!(to, Self::Accepted | Self::Running),
            _ => false,
        }
    }
}

impl fmt::Display for SchedulerTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

impl std::str::FromStr for SchedulerTaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "timeout" => Ok(Self::Timeout),
            "not_found" => Ok(Self::NotFound),
            _ => Err(format!("Invalid scheduler task state: {s}")),
        }
    }
}

/// Classification of a task evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDecision {
    Run,
    Skip,
    Fail,
}

impl fmt::Display for TaskDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Skip => write!(f, "skip"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Why a task is in its current state. Also used as `error_code` on failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    TaskAccepted,
    EvaluationStarted,
    /// Current condition already satisfies the target
    TargetAlreadyMet,
    CommandConfirmed,
    CommandNotConfirmed,
    /// A long-running hardware operation was started; a follow-up tracks it
    AsyncOperationStarted,
    AwaitingConfirmation,
    ConditionMet,
    ConfirmationTimeout,
    DeadlineExceeded,
    TaskExpired,
    ZoneNotFound,
    ZoneDisabled,
    ManualOverride,
    SafetyInterlock,
    TransportFailure,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAccepted => "task_accepted",
            Self::EvaluationStarted => "evaluation_started",
            Self::TargetAlreadyMet => "target_already_met",
            Self::CommandConfirmed => "command_confirmed",
            Self::CommandNotConfirmed => "command_not_confirmed",
            Self::AsyncOperationStarted => "async_operation_started",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::ConditionMet => "condition_met",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::TaskExpired => "task_expired",
            Self::ZoneNotFound => "zone_not_found",
            Self::ZoneDisabled => "zone_disabled",
            Self::ManualOverride => "manual_override",
            Self::SafetyInterlock => "safety_interlock",
            Self::TransportFailure => "transport_failure",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of zone automation the scheduler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationTaskType {
    Irrigation,
    Lighting,
    Ventilation,
    Heating,
    Misting,
    NutrientDosing,
    TankRefill,
}

impl fmt::Display for AutomationTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Irrigation => write!(f, "irrigation"),
            Self::Lighting => write!(f, "lighting"),
            Self::Ventilation => write!(f, "ventilation"),
            Self::Heating => write!(f, "heating"),
            Self::Misting => write!(f, "misting"),
            Self::NutrientDosing => write!(f, "nutrient_dosing"),
            Self::TankRefill => write!(f, "tank_refill"),
        }
    }
}
