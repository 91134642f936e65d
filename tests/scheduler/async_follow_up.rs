use serde_json::json;
use std::time::Duration;

use greenhouse_core::scheduler::{
    AutomationTaskType, ConditionCheck, ExecutionMode, ReasonCode, SchedulerTaskState,
    SchedulerTaskStatus, TaskDecision, TaskRequest, TimelineEventKind,
};

use crate::common::harness::TestSystem;

const ZONE: i64 = 31;

async fn start_refill(t: &TestSystem) -> SchedulerTaskStatus {
    t.automation.set_mode(
        ZONE,
        ExecutionMode::Asynchronous {
            recheck_after: None,
        },
    );
    let parent = t
        .system
        .scheduler
        .submit(
            TaskRequest::new(ZONE, AutomationTaskType::TankRefill, json!({ "target_level": 90 }))
                .with_correlation_id("refill-tank-a"),
        )
        .await
        .unwrap();
    t.drain().await;
    t.system
        .scheduler
        .task_status(parent.task_id)
        .await
        .unwrap()
        .unwrap()
}

async fn follow_up_of(t: &TestSystem, parent: &SchedulerTaskStatus) -> SchedulerTaskStatus {
    t.system
        .scheduler
        .list_chain(&parent.correlation_id)
        .await
        .unwrap()
        .into_iter()
        .find(|task| task.parent_task_id == Some(parent.task_id))
        .unwrap()
}

#[tokio::test]
async fn test_async_parent_completes_and_hands_off_to_follow_up() {
    let t = TestSystem::new();
    let parent = start_refill(&t).await;

    assert_eq!(parent.status, SchedulerTaskState::Completed);
    assert_eq!(parent.decision, Some(TaskDecision::Run));
    assert_eq!(parent.reason_code, ReasonCode::AsyncOperationStarted);
    assert!(parent
        .timeline
        .iter()
        .any(|e| e.kind == TimelineEventKind::AsyncOperationStarted));

    let follow_up = follow_up_of(&t, &parent).await;
    assert!(follow_up.follow_up);
    assert_eq!(follow_up.status, SchedulerTaskState::Accepted);
    assert_eq!(follow_up.correlation_id, "refill-tank-a");
    assert_eq!(follow_up.due_at, parent.due_at);
    assert_eq!(follow_up.expires_at, parent.expires_at);
    assert!(parent.timeline.iter().any(|e| matches!(
        e.kind,
        TimelineEventKind::FollowUpScheduled { task_id, .. } if task_id == follow_up.task_id
    )));

    // Re-check after the default interval
    let next = t.dispatcher.last_dispatched().unwrap();
    assert_eq!(next.delay_seconds(), 60);
}

#[tokio::test]
async fn test_follow_up_completes_once_condition_holds() {
    let t = TestSystem::new();
    let parent = start_refill(&t).await;
    let sent_before = t.transport.sent().len();

    // Still filling at the first re-check
    t.advance_and_drain(60).await;
    let waiting = follow_up_of(&t, &parent).await;
    assert_eq!(waiting.status, SchedulerTaskState::Running);
    assert_eq!(waiting.reason_code, ReasonCode::AwaitingConfirmation);

    t.automation.set_condition(ZONE, ConditionCheck::Satisfied);
    t.advance_and_drain(60).await;

    let done = follow_up_of(&t, &parent).await;
    assert_eq!(done.status, SchedulerTaskState::Completed);
    assert_eq!(done.reason_code, ReasonCode::ConditionMet);
    assert_eq!(done.decision, Some(TaskDecision::Run));
    assert_eq!(done.transition_count(), 3);
    assert_eq!(
        done.timeline
            .iter()
            .filter(|e| matches!(e.kind, TimelineEventKind::RecheckScheduled { .. }))
            .count(),
        1
    );

    // Follow-ups observe, they never resend
    assert_eq!(t.transport.sent().len(), sent_before);

    let chain = t.system.scheduler.list_chain("refill-tank-a").await.unwrap();
    assert_eq!(chain.len(), 2);
    assert!(chain.iter().all(|task| task.is_terminal()));
}

#[tokio::test]
async fn test_follow_up_times_out_at_the_confirmation_deadline() {
    let t = TestSystem::new();
    let parent = start_refill(&t).await;

    for _ in 0..16 {
        t.advance_and_drain(60).await;
    }

    let follow_up = follow_up_of(&t, &parent).await;
    assert_eq!(follow_up.status, SchedulerTaskState::Timeout);
    assert_eq!(follow_up.reason_code, ReasonCode::ConfirmationTimeout);
    assert_eq!(follow_up.error_code, Some(ReasonCode::ConfirmationTimeout));
    assert_eq!(follow_up.lifecycle.last().unwrap().at, parent.due_at);
    assert_eq!(t.dispatcher.pending_len(), 0);
}

#[tokio::test]
async fn test_custom_recheck_interval_is_bounded_by_deadline() {
    let t = TestSystem::new();
    t.automation.set_mode(
        ZONE,
        ExecutionMode::Asynchronous {
            recheck_after: Some(Duration::from_secs(3600)),
        },
    );
    let parent = t
        .system
        .scheduler
        .submit(TaskRequest::new(ZONE, AutomationTaskType::Heating, json!({})))
        .await
        .unwrap();
    t.drain().await;

    // Never scheduled past the parent's 900 s confirmation window
    assert_eq!(t.dispatcher.last_dispatched().unwrap().delay_seconds(), 900);

    t.advance_and_drain(900).await;
    let parent = t.system.scheduler.task_status(parent.task_id).await.unwrap().unwrap();
    let follow_up = follow_up_of(&t, &parent).await;
    assert_eq!(follow_up.status, SchedulerTaskState::Timeout);
}

#[tokio::test]
async fn test_redelivered_parent_does_not_resend_or_spawn_twice() {
    let t = TestSystem::new();
    t.automation.set_mode(
        ZONE,
        ExecutionMode::Asynchronous {
            recheck_after: None,
        },
    );
    let parent = t
        .system
        .scheduler
        .submit(
            TaskRequest::new(ZONE, AutomationTaskType::TankRefill, json!({ "target_level": 90 }))
                .with_correlation_id("refill-tank-b"),
        )
        .await
        .unwrap();

    // The command-sent write lands, the final resolution write does not
    t.task_statuses.script_update_failure_after(1);
    let stats = t.drain().await;
    assert_eq!(stats.redelivered, 1);
    assert_eq!(t.transport.sent().len(), 1);

    let interrupted = t.system.scheduler.task_status(parent.task_id).await.unwrap().unwrap();
    assert_eq!(interrupted.status, SchedulerTaskState::Running);
    assert!(interrupted.command_sent());

    assert_eq!(t.advance_and_drain(1).await.handled, 1);
    assert_eq!(t.transport.sent().len(), 1);

    let parent = t.system.scheduler.task_status(parent.task_id).await.unwrap().unwrap();
    assert_eq!(parent.status, SchedulerTaskState::Completed);
    assert_eq!(parent.reason_code, ReasonCode::AsyncOperationStarted);
    assert_eq!(parent.transition_count(), 3);
    assert_eq!(
        parent
            .timeline
            .iter()
            .filter(|e| matches!(e.kind, TimelineEventKind::FollowUpScheduled { .. }))
            .count(),
        1
    );

    let chain = t.system.scheduler.list_chain("refill-tank-b").await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(
        chain.iter().filter(|task| task.parent_task_id == Some(parent.task_id)).count(),
        1
    );
}
