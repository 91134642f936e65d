use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::states::{AutomationTaskType, ReasonCode, SchedulerTaskState, TaskDecision};
use super::timeline::{LifecycleEntry, TimelineEvent, TimelineEventKind};
use crate::error::StateTransitionError;

/// Request to schedule one unit of zone automation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub zone_id: i64,
    pub task_type: AutomationTaskType,
    #[serde(default)]
    pub payload: Value,
    /// Defaults to now
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Defaults to the new task's id
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TaskRequest {
    pub fn new(zone_id: i64, task_type: AutomationTaskType, payload: Value) -> Self {
        Self {
            zone_id,
            task_type,
            payload,
            scheduled_for: None,
            correlation_id: None,
        }
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Durable status record of a scheduler task.
///
/// Only [`SchedulerTaskStatus::transition`] and [`SchedulerTaskStatus::resolve`] change
/// `status`, and both append exactly one transition event to the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTaskStatus {
    pub task_id: Uuid,
    pub zone_id: i64,
    pub task_type: AutomationTaskType,
    pub status: SchedulerTaskState,
    pub decision: Option<TaskDecision>,
    pub action_required: Option<bool>,
    pub reason_code: ReasonCode,
    pub error_code: Option<ReasonCode>,
    pub scheduled_for: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub correlation_id: String,
    pub parent_task_id: Option<Uuid>,
    /// Re-check task spawned by an asynchronous operation
    pub follow_up: bool,
    pub payload: Value,
    pub lifecycle: Vec<LifecycleEntry>,
    pub timeline: Vec<TimelineEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulerTaskStatus {
    /// New accepted task. The `accepted` transition is the first timeline event.
    pub fn accepted(
        request: TaskRequest,
        due_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let task_id = Uuid::new_v4();
        let correlation_id = request
            .correlation_id
            .unwrap_or_else(|| task_id.to_string());
        let mut status = Self {
            task_id,
            zone_id: request.zone_id,
            task_type: request.task_type,
            status: SchedulerTaskState::Accepted,
            decision: None,
            action_required: None,
            reason_code: ReasonCode::TaskAccepted,
            error_code: None,
            scheduled_for: request.scheduled_for.unwrap_or(now),
            due_at,
            expires_at,
            correlation_id,
            parent_task_id: None,
            follow_up: false,
            payload: request.payload,
            lifecycle: Vec::new(),
            timeline: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        status.append_transition(SchedulerTaskState::Accepted, now);
        status
    }

    /// Follow-up re-check task for an asynchronous operation started by `self`.
    ///
    /// Shares the correlation id and the absolute deadlines of its parent.
    pub fn follow_up(&self, scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let request = TaskRequest {
            zone_id: self.zone_id,
            task_type: self.task_type,
            payload: self.payload.clone(),
            scheduled_for: Some(scheduled_for),
            correlation_id: Some(self.correlation_id.clone()),
        };
        let mut task = Self::accepted(request, self.due_at, self.expires_at, now);
        task.parent_task_id = Some(self.task_id);
        task.follow_up = true;
        task
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move to `to`, recording `reason` (and `error_code` when given)
    pub fn transition(
        &mut self,
        to: SchedulerTaskState,
        reason: ReasonCode,
        error_code: Option<ReasonCode>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        if self.status.is_terminal() {
            return Err(StateTransitionError::AlreadyTerminal {
                entity: "scheduler_task",
                id: self.task_id.to_string(),
                state: self.status.to_string(),
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(StateTransitionError::Invalid {
                entity: "scheduler_task",
                id: self.task_id.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        // Failure-class states always carry an error code; default it to the reason
        let error_code = match error_code {
            Some(code) => Some(code),
            None if to.requires_error_code() => Some(reason),
            None => None,
        };

        self.status = to;
        self.reason_code = reason;
        self.error_code = error_code;
        self.append_transition(to, now);
        Ok(())
    }

    /// Terminal transition carrying the evaluation's decision
    pub fn resolve(
        &mut self,
        decision: TaskDecision,
        to: SchedulerTaskState,
        reason: ReasonCode,
        error_code: Option<ReasonCode>,
        now: DateTime<Utc>,
    ) -> Result<(), StateTransitionError> {
        let error_code = match (decision, error_code) {
            (TaskDecision::Fail, None) => Some(reason),
            (_, code) => code,
        };
        self.transition(to, reason, error_code, now)?;
        self.decision = Some(decision);
        self.action_required =
            Some(decision == TaskDecision::Run || to == SchedulerTaskState::Failed);
        Ok(())
    }

    /// Non-transition timeline entry
    pub fn record(&mut self, kind: TimelineEventKind, reason_code: Option<ReasonCode>, now: DateTime<Utc>) {
        self.timeline.push(TimelineEvent {
            kind,
            reason_code,
            error_code: None,
            at: now,
        });
        self.updated_at = now;
    }

    /// Whether a device command has been sent on behalf of this task
    pub fn command_sent(&self) -> bool {
        self.timeline
            .iter()
            .any(|e| matches!(e.kind, TimelineEventKind::CommandSent { .. }))
    }

    pub fn transition_count(&self) -> usize {
        self.timeline.iter().filter(|e| e.is_transition()).count()
    }

    fn append_transition(&mut self, to: SchedulerTaskState, now: DateTime<Utc>) {
        self.lifecycle.push(LifecycleEntry { status: to, at: now });
        self.timeline.push(TimelineEvent {
            kind: TimelineEventKind::Transition { to },
            reason_code: Some(self.reason_code),
            error_code: self.error_code,
            at: now,
        });
        self.updated_at = now;
    }
}
