//! Task lifecycle engine: submission, evaluation and status queries.
//!
//! Evaluation is a pure function of the stored task record plus the zone's current
//! condition, so a redelivered evaluation of a terminal task is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::states::{ReasonCode, SchedulerTaskState, TaskDecision};
use super::task_status::{SchedulerTaskStatus, TaskRequest};
use super::timeline::TimelineEventKind;
use crate::cache::{task_status_key, StatusCache};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::devices::{DeviceCommand, DeviceCommandTransport};
use crate::dispatch::{to_chrono, DelayedDispatcher, DispatchTarget};
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::metrics;
use crate::store::TaskStatusStore;

/// Zone condition relative to the task's target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCheck {
    Satisfied,
    Unmet,
    ZoneNotFound,
    /// The zone refuses the task for the given reason
    Rejected(ReasonCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The effect can be confirmed right after sending
    Synchronous,
    /// Long-running hardware operation; confirmed by follow-up re-checks.
    /// `None` uses the configured recheck interval.
    Asynchronous { recheck_after: Option<Duration> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCommand {
    pub command: DeviceCommand,
    pub mode: ExecutionMode,
}

/// Zone-side knowledge the engine consumes: sensing, command planning, confirmation
#[async_trait]
pub trait ZoneAutomation: Send + Sync {
    async fn check_condition(&self, task: &SchedulerTaskStatus) -> GreenhouseResult<ConditionCheck>;

    async fn plan_command(&self, task: &SchedulerTaskStatus) -> GreenhouseResult<PlannedCommand>;

    /// Whether the command's effect is observable; only used for synchronous commands
    async fn confirm_command(
        &self,
        task: &SchedulerTaskStatus,
        command: &DeviceCommand,
    ) -> GreenhouseResult<bool>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// No task with that id; the delivery is dropped
    Missing,
    /// Redelivery of an already resolved task
    AlreadyTerminal(SchedulerTaskState),
    Resolved(SchedulerTaskStatus),
    /// Follow-up still waiting; another re-check has been dispatched
    Rescheduled(SchedulerTaskStatus),
}

struct Resolution {
    decision: TaskDecision,
    to: SchedulerTaskState,
    reason: ReasonCode,
    error_code: Option<ReasonCode>,
}

impl Resolution {
    fn new(decision: TaskDecision, to: SchedulerTaskState, reason: ReasonCode) -> Self {
        Self {
            decision,
            to,
            reason,
            error_code: None,
        }
    }

    fn transport_failure() -> Self {
        Self {
            decision: TaskDecision::Fail,
            to: SchedulerTaskState::Failed,
            reason: ReasonCode::TransportFailure,
            error_code: Some(ReasonCode::TransportFailure),
        }
    }
}

fn is_transport_failure(error: &GreenhouseError) -> bool {
    matches!(error, GreenhouseError::TransportFailure { .. })
}

pub struct TaskLifecycleEngine {
    store: Arc<dyn TaskStatusStore>,
    automation: Arc<dyn ZoneAutomation>,
    transport: Arc<dyn DeviceCommandTransport>,
    dispatcher: Arc<dyn DelayedDispatcher>,
    cache: Arc<dyn StatusCache>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for TaskLifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycleEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskLifecycleEngine {
    pub fn new(
        store: Arc<dyn TaskStatusStore>,
        automation: Arc<dyn ZoneAutomation>,
        transport: Arc<dyn DeviceCommandTransport>,
        dispatcher: Arc<dyn DelayedDispatcher>,
        cache: Arc<dyn StatusCache>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            automation,
            transport,
            dispatcher,
            cache,
            clock,
            config,
        }
    }

    /// Accept a task and dispatch its first evaluation at `scheduled_for`.
    ///
    /// `due_at` and `expires_at` are absolute, derived from `scheduled_for`.
    pub async fn submit(&self, request: TaskRequest) -> GreenhouseResult<SchedulerTaskStatus> {
        let now = self.clock.now();
        let scheduled_for = request.scheduled_for.unwrap_or(now);
        let due_at = scheduled_for + self.config.confirm_timeout();
        let expires_at = scheduled_for + self.config.expire_after();

        let task = SchedulerTaskStatus::accepted(request, due_at, expires_at, now);
        self.store.insert(&task).await?;
        self.cache_status(&task).await;
        self.dispatcher
            .dispatch(
                DispatchTarget::scheduler_task(task.task_id),
                delay_until(scheduled_for, now),
            )
            .await?;

        tracing::info!(
            task_id = %task.task_id,
            zone_id = task.zone_id,
            task_type = %task.task_type,
            correlation_id = %task.correlation_id,
            scheduled_for = %task.scheduled_for,
            due_at = %task.due_at,
            "Scheduler task accepted"
        );
        Ok(task)
    }

    /// Evaluate one task. Safe to call repeatedly for the same id.
    pub async fn evaluate(&self, task_id: Uuid) -> GreenhouseResult<EvaluationOutcome> {
        let Some(mut task) = self.store.get(task_id).await? else {
            tracing::warn!(task_id = %task_id, "Scheduler task not found, skipping evaluation");
            return Ok(EvaluationOutcome::Missing);
        };

        if task.is_terminal() {
            tracing::debug!(
                task_id = %task_id,
                status = %task.status,
                "Scheduler task already terminal, skipping evaluation"
            );
            return Ok(EvaluationOutcome::AlreadyTerminal(task.status));
        }

        let now = self.clock.now();

        // A first evaluation delivered after its deadlines never acts on the zone
        if !task.follow_up {
            if let Some(resolution) = deadline_resolution(&task, now, ReasonCode::DeadlineExceeded) {
                return self.persist_resolution(task, resolution, now).await;
            }
        }

        if task.status == SchedulerTaskState::Accepted {
            task.transition(
                SchedulerTaskState::Running,
                ReasonCode::EvaluationStarted,
                None,
                now,
            )?;
        }

        // An interrupted evaluation already acted on the zone; finish it without re-checking
        if task.command_sent() {
            return self.execute_action(task, now).await;
        }

        let check = match self.automation.check_condition(&task).await {
            Ok(check) => check,
            Err(error) if is_transport_failure(&error) => {
                tracing::warn!(task_id = %task_id, error = %error, "Condition check failed");
                return self
                    .persist_resolution(task, Resolution::transport_failure(), now)
                    .await;
            }
            Err(error) => return Err(error),
        };

        match check {
            ConditionCheck::ZoneNotFound => {
                tracing::warn!(task_id = %task_id, zone_id = task.zone_id, "Zone not found");
                let resolution = Resolution {
                    error_code: Some(ReasonCode::ZoneNotFound),
                    ..Resolution::new(
                        TaskDecision::Fail,
                        SchedulerTaskState::NotFound,
                        ReasonCode::ZoneNotFound,
                    )
                };
                self.persist_resolution(task, resolution, now).await
            }
            ConditionCheck::Rejected(reason) => {
                let resolution =
                    Resolution::new(TaskDecision::Skip, SchedulerTaskState::Rejected, reason);
                self.persist_resolution(task, resolution, now).await
            }
            ConditionCheck::Satisfied if task.follow_up => {
                let resolution = Resolution::new(
                    TaskDecision::Run,
                    SchedulerTaskState::Completed,
                    ReasonCode::ConditionMet,
                );
                self.persist_resolution(task, resolution, now).await
            }
            ConditionCheck::Satisfied => {
                let resolution = Resolution::new(
                    TaskDecision::Skip,
                    SchedulerTaskState::Completed,
                    ReasonCode::TargetAlreadyMet,
                );
                self.persist_resolution(task, resolution, now).await
            }
            ConditionCheck::Unmet if task.follow_up => self.recheck_follow_up(task, now).await,
            ConditionCheck::Unmet => self.execute_action(task, now).await,
        }
    }

    async fn execute_action(
        &self,
        mut task: SchedulerTaskStatus,
        now: DateTime<Utc>,
    ) -> GreenhouseResult<EvaluationOutcome> {
        let planned = match self.automation.plan_command(&task).await {
            Ok(planned) => planned,
            Err(error) if is_transport_failure(&error) => {
                return self
                    .persist_resolution(task, Resolution::transport_failure(), now)
                    .await;
            }
            Err(error) => return Err(error),
        };

        let command = planned
            .command
            .with_correlation_id(task.correlation_id.clone());
        if task.command_sent() {
            tracing::debug!(
                task_id = %task.task_id,
                node_uid = %command.node_uid,
                "Device command already sent, resuming evaluation"
            );
        } else {
            if let Err(error) = self.transport.send(command.clone()).await {
                tracing::warn!(
                    task_id = %task.task_id,
                    node_uid = %command.node_uid,
                    error = %error,
                    "Device command could not be sent"
                );
                return self
                    .persist_resolution(task, Resolution::transport_failure(), now)
                    .await;
            }
            task.record(
                TimelineEventKind::CommandSent {
                    node_uid: command.node_uid.clone(),
                    channel: command.channel.clone(),
                },
                None,
                now,
            );
            self.store.update(&task).await?;
        }

        match planned.mode {
            ExecutionMode::Synchronous => {
                let resolution = match self.automation.confirm_command(&task, &command).await {
                    Ok(true) => Resolution::new(
                        TaskDecision::Run,
                        SchedulerTaskState::Completed,
                        ReasonCode::CommandConfirmed,
                    ),
                    Ok(false) => Resolution::new(
                        TaskDecision::Fail,
                        SchedulerTaskState::Failed,
                        ReasonCode::CommandNotConfirmed,
                    ),
                    Err(error) if is_transport_failure(&error) => Resolution::transport_failure(),
                    Err(error) => return Err(error),
                };
                self.persist_resolution(task, resolution, now).await
            }
            ExecutionMode::Asynchronous { recheck_after } => {
                task.record(
                    TimelineEventKind::AsyncOperationStarted,
                    Some(ReasonCode::AsyncOperationStarted),
                    now,
                );
                let delay = bounded_delay(
                    recheck_after.unwrap_or_else(|| self.config.recheck_interval()),
                    task.due_at,
                    now,
                );
                let follow_up = match self.existing_follow_up(&task).await? {
                    Some(existing) => existing,
                    None => {
                        // Dispatched before insert so a stored follow-up is always queued
                        let follow_up = task.follow_up(now + to_chrono(delay), now);
                        self.dispatcher
                            .dispatch(DispatchTarget::scheduler_task(follow_up.task_id), delay)
                            .await?;
                        self.store.insert(&follow_up).await?;
                        self.cache_status(&follow_up).await;
                        follow_up
                    }
                };
                task.record(
                    TimelineEventKind::FollowUpScheduled {
                        task_id: follow_up.task_id,
                        scheduled_for: follow_up.scheduled_for,
                    },
                    None,
                    now,
                );

                tracing::info!(
                    task_id = %task.task_id,
                    follow_up_task_id = %follow_up.task_id,
                    correlation_id = %task.correlation_id,
                    recheck_in_seconds = delay.as_secs(),
                    "Asynchronous operation started, follow-up scheduled"
                );

                let resolution = Resolution::new(
                    TaskDecision::Run,
                    SchedulerTaskState::Completed,
                    ReasonCode::AsyncOperationStarted,
                );
                self.persist_resolution(task, resolution, now).await
            }
        }
    }

    async fn existing_follow_up(
        &self,
        parent: &SchedulerTaskStatus,
    ) -> GreenhouseResult<Option<SchedulerTaskStatus>> {
        Ok(self
            .store
            .list_by_correlation(&parent.correlation_id)
            .await?
            .into_iter()
            .find(|task| task.parent_task_id == Some(parent.task_id)))
    }

    async fn recheck_follow_up(
        &self,
        mut task: SchedulerTaskStatus,
        now: DateTime<Utc>,
    ) -> GreenhouseResult<EvaluationOutcome> {
        if let Some(resolution) = deadline_resolution(&task, now, ReasonCode::ConfirmationTimeout) {
            return self.persist_resolution(task, resolution, now).await;
        }

        let delay = bounded_delay(self.config.recheck_interval(), task.due_at, now);
        let scheduled_for = now + to_chrono(delay);
        task.reason_code = ReasonCode::AwaitingConfirmation;
        task.scheduled_for = scheduled_for;
        task.record(
            TimelineEventKind::RecheckScheduled { scheduled_for },
            Some(ReasonCode::AwaitingConfirmation),
            now,
        );
        self.store.update(&task).await?;
        self.cache_status(&task).await;
        self.dispatcher
            .dispatch(DispatchTarget::scheduler_task(task.task_id), delay)
            .await?;

        tracing::debug!(
            task_id = %task.task_id,
            correlation_id = %task.correlation_id,
            scheduled_for = %scheduled_for,
            "Condition still unmet, re-check scheduled"
        );
        Ok(EvaluationOutcome::Rescheduled(task))
    }

    async fn persist_resolution(
        &self,
        mut task: SchedulerTaskStatus,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> GreenhouseResult<EvaluationOutcome> {
        task.resolve(
            resolution.decision,
            resolution.to,
            resolution.reason,
            resolution.error_code,
            now,
        )?;
        self.store.update(&task).await?;
        self.cache_status(&task).await;
        metrics::record_task_terminal(&task.status.to_string());

        if task.status == SchedulerTaskState::Completed || task.status == SchedulerTaskState::Rejected {
            tracing::info!(
                task_id = %task.task_id,
                zone_id = task.zone_id,
                correlation_id = %task.correlation_id,
                status = %task.status,
                decision = %resolution.decision,
                reason_code = %task.reason_code,
                "Scheduler task resolved"
            );
        } else {
            tracing::warn!(
                task_id = %task.task_id,
                zone_id = task.zone_id,
                correlation_id = %task.correlation_id,
                status = %task.status,
                decision = %resolution.decision,
                reason_code = %task.reason_code,
                error_code = task.error_code.map(|c| c.as_str()).unwrap_or(""),
                "Scheduler task resolved unsuccessfully"
            );
        }
        Ok(EvaluationOutcome::Resolved(task))
    }

    async fn cache_status(&self, task: &SchedulerTaskStatus) {
        let value = match serde_json::to_value(task) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(task_id = %task.task_id, error = %error, "Task status not cacheable");
                return;
            }
        };
        let ttl = Duration::from_secs(self.config.status_ttl_seconds);
        if let Err(error) = self.cache.put(&task_status_key(&task.task_id), value, ttl).await {
            tracing::warn!(task_id = %task.task_id, error = %error, "Failed to cache task status");
        }
    }

    /// Current status, from the cache when warm
    pub async fn task_status(&self, task_id: Uuid) -> GreenhouseResult<Option<SchedulerTaskStatus>> {
        if let Ok(Some(cached)) = self.cache.get(&task_status_key(&task_id)).await {
            if let Ok(task) = serde_json::from_value::<SchedulerTaskStatus>(cached) {
                return Ok(Some(task));
            }
        }
        self.store.get(task_id).await
    }

    pub async fn list_for_zone(&self, zone_id: i64) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        self.store.list_for_zone(zone_id).await
    }

    /// A task and every follow-up spawned from it, oldest first
    pub async fn list_chain(&self, correlation_id: &str) -> GreenhouseResult<Vec<SchedulerTaskStatus>> {
        self.store.list_by_correlation(correlation_id).await
    }
}

/// Expired wins over timeout; `None` while both deadlines are ahead
fn deadline_resolution(
    task: &SchedulerTaskStatus,
    now: DateTime<Utc>,
    timeout_reason: ReasonCode,
) -> Option<Resolution> {
    if task.is_expired(now) {
        Some(Resolution::new(
            TaskDecision::Fail,
            SchedulerTaskState::Expired,
            ReasonCode::TaskExpired,
        ))
    } else if task.is_past_due(now) {
        Some(Resolution::new(
            TaskDecision::Fail,
            SchedulerTaskState::Timeout,
            timeout_reason,
        ))
    } else {
        None
    }
}

fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// `requested`, but never past `deadline`
fn bounded_delay(requested: Duration, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    requested.min(delay_until(deadline, now))
}
