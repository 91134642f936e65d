//! Append-only audit trail of a scheduler task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::states::{ReasonCode, SchedulerTaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEventKind {
    /// Exactly one per state transition
    Transition { to: SchedulerTaskState },
    CommandSent { node_uid: String, channel: String },
    AsyncOperationStarted,
    FollowUpScheduled {
        task_id: Uuid,
        scheduled_for: DateTime<Utc>,
    },
    RecheckScheduled { scheduled_for: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    #[serde(flatten)]
    pub kind: TimelineEventKind,
    pub reason_code: Option<ReasonCode>,
    pub error_code: Option<ReasonCode>,
    pub at: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn is_transition(&self) -> bool {
        matches!(self.kind, TimelineEventKind::Transition { .. })
    }
}

/// Status + timestamp pair in the lifecycle log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub status: SchedulerTaskState,
    pub at: DateTime<Utc>,
}
