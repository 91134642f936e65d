use chrono::Duration as ChronoDuration;
use serde_json::json;

use greenhouse_core::clock::Clock;
use greenhouse_core::scheduler::{
    AutomationTaskType, ConditionCheck, EvaluationOutcome, ReasonCode, SchedulerTaskState,
    SchedulerTaskStatus, TaskDecision, TaskRequest, TimelineEventKind,
};

use crate::common::fakes::node_for_zone;
use crate::common::harness::TestSystem;

async fn submit_and_drain(t: &TestSystem, zone_id: i64) -> SchedulerTaskStatus {
    let task = t
        .system
        .scheduler
        .submit(TaskRequest::new(
            zone_id,
            AutomationTaskType::Irrigation,
            json!({ "target_moisture": 42, "seconds": 45 }),
        ))
        .await
        .unwrap();
    t.drain().await;
    t.system
        .scheduler
        .task_status(task.task_id)
        .await
        .unwrap()
        .unwrap()
}

fn assert_well_formed(task: &SchedulerTaskStatus) {
    assert!(task.is_terminal(), "task {} is {}", task.task_id, task.status);
    assert!(task.decision.is_some());
    assert!(task.action_required.is_some());
    assert_eq!(task.transition_count(), task.lifecycle.len());
    assert_eq!(task.lifecycle.first().map(|e| e.status), Some(SchedulerTaskState::Accepted));
    assert_eq!(task.lifecycle.last().map(|e| e.status), Some(task.status));
    if task.status.requires_error_code() || task.decision == Some(TaskDecision::Fail) {
        assert!(task.error_code.is_some(), "task {} has no error code", task.task_id);
    }
    assert!(task.timeline.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test]
async fn test_condition_already_met_is_skipped_without_command() {
    let t = TestSystem::new();
    t.automation.set_condition(11, ConditionCheck::Satisfied);

    let task = submit_and_drain(&t, 11).await;
    assert_eq!(task.status, SchedulerTaskState::Completed);
    assert_eq!(task.decision, Some(TaskDecision::Skip));
    assert_eq!(task.reason_code, ReasonCode::TargetAlreadyMet);
    assert_eq!(task.action_required, Some(false));
    assert!(task.error_code.is_none());
    assert!(t.transport.sent_to(&node_for_zone(11)).is_empty());
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_confirmed_synchronous_command_completes() {
    let t = TestSystem::new();

    let task = submit_and_drain(&t, 12).await;
    assert_eq!(task.status, SchedulerTaskState::Completed);
    assert_eq!(task.decision, Some(TaskDecision::Run));
    assert_eq!(task.reason_code, ReasonCode::CommandConfirmed);
    assert_eq!(task.action_required, Some(true));

    let sent = t.transport.sent_to(&node_for_zone(12));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "pump");
    assert_eq!(sent[0].correlation_id.as_deref(), Some(task.correlation_id.as_str()));

    let lifecycle: Vec<_> = task.lifecycle.iter().map(|e| e.status).collect();
    assert_eq!(
        lifecycle,
        vec![
            SchedulerTaskState::Accepted,
            SchedulerTaskState::Running,
            SchedulerTaskState::Completed
        ]
    );
    assert!(task
        .timeline
        .iter()
        .any(|e| matches!(&e.kind, TimelineEventKind::CommandSent { channel, .. } if channel == "pump")));
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_unconfirmed_synchronous_command_fails() {
    let t = TestSystem::new();
    t.automation.set_confirms(13, false);

    let task = submit_and_drain(&t, 13).await;
    assert_eq!(task.status, SchedulerTaskState::Failed);
    assert_eq!(task.decision, Some(TaskDecision::Fail));
    assert_eq!(task.reason_code, ReasonCode::CommandNotConfirmed);
    assert_eq!(task.error_code, Some(ReasonCode::CommandNotConfirmed));
    assert_eq!(task.action_required, Some(true));
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_missing_zone_resolves_not_found() {
    let t = TestSystem::new();
    t.automation.set_condition(14, ConditionCheck::ZoneNotFound);

    let task = submit_and_drain(&t, 14).await;
    assert_eq!(task.status, SchedulerTaskState::NotFound);
    assert_eq!(task.decision, Some(TaskDecision::Fail));
    assert_eq!(task.error_code, Some(ReasonCode::ZoneNotFound));
    assert!(t.transport.sent().is_empty());
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_manual_override_rejects_task() {
    let t = TestSystem::new();
    t.automation
        .set_condition(15, ConditionCheck::Rejected(ReasonCode::ManualOverride));

    let task = submit_and_drain(&t, 15).await;
    assert_eq!(task.status, SchedulerTaskState::Rejected);
    assert_eq!(task.decision, Some(TaskDecision::Skip));
    assert_eq!(task.reason_code, ReasonCode::ManualOverride);
    assert!(task.error_code.is_none());
    assert!(t.transport.sent().is_empty());
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_unreachable_node_fails_with_transport_failure() {
    let t = TestSystem::new();
    t.transport.fail_node(node_for_zone(16));

    let task = submit_and_drain(&t, 16).await;
    assert_eq!(task.status, SchedulerTaskState::Failed);
    assert_eq!(task.reason_code, ReasonCode::TransportFailure);
    assert_eq!(task.error_code, Some(ReasonCode::TransportFailure));
    assert!(t.transport.sent_to(&node_for_zone(16)).is_empty());
    assert!(!task
        .timeline
        .iter()
        .any(|e| matches!(e.kind, TimelineEventKind::CommandSent { .. })));
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_offline_sensors_fail_with_transport_failure() {
    let t = TestSystem::new();
    t.automation.take_sensor_offline(17);

    let task = submit_and_drain(&t, 17).await;
    assert_eq!(task.status, SchedulerTaskState::Failed);
    assert_eq!(task.error_code, Some(ReasonCode::TransportFailure));
    assert!(t.transport.sent().is_empty());
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_late_first_evaluation_times_out_without_acting() {
    let t = TestSystem::new();
    let task = t
        .system
        .scheduler
        .submit(TaskRequest::new(18, AutomationTaskType::Ventilation, json!({})))
        .await
        .unwrap();
    assert_eq!(task.due_at, task.scheduled_for + ChronoDuration::seconds(900));
    assert_eq!(task.expires_at, task.scheduled_for + ChronoDuration::seconds(3600));

    // The worker was down until exactly the confirmation deadline
    t.advance_and_drain(900).await;

    let task = t.system.scheduler.task_status(task.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, SchedulerTaskState::Timeout);
    assert_eq!(task.reason_code, ReasonCode::DeadlineExceeded);
    assert_eq!(task.error_code, Some(ReasonCode::DeadlineExceeded));
    assert_eq!(t.automation.checks(), 0);
    assert!(t.transport.sent().is_empty());
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_delivery_after_expiry_resolves_expired() {
    let t = TestSystem::new();
    let task = t
        .system
        .scheduler
        .submit(TaskRequest::new(19, AutomationTaskType::Lighting, json!({})))
        .await
        .unwrap();

    t.advance_and_drain(3600).await;

    let task = t.system.scheduler.task_status(task.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, SchedulerTaskState::Expired);
    assert_eq!(task.reason_code, ReasonCode::TaskExpired);
    assert_eq!(task.error_code, Some(ReasonCode::TaskExpired));
    assert_eq!(task.decision, Some(TaskDecision::Fail));
    assert_well_formed(&task);
}

#[tokio::test]
async fn test_future_task_waits_for_its_slot() {
    let t = TestSystem::new();
    let at = t.clock.now() + ChronoDuration::minutes(10);
    let task = t
        .system
        .scheduler
        .submit(TaskRequest::new(20, AutomationTaskType::Misting, json!({})).scheduled_for(at))
        .await
        .unwrap();
    assert_eq!(task.due_at, at + ChronoDuration::seconds(900));

    assert_eq!(t.advance_and_drain(599).await.handled, 0);
    let waiting = t.system.scheduler.task_status(task.task_id).await.unwrap().unwrap();
    assert_eq!(waiting.status, SchedulerTaskState::Accepted);

    assert_eq!(t.advance_and_drain(1).await.handled, 1);
    let done = t.system.scheduler.task_status(task.task_id).await.unwrap().unwrap();
    assert_eq!(done.status, SchedulerTaskState::Completed);
}

#[tokio::test]
async fn test_redelivered_evaluation_of_terminal_task_is_a_no_op() {
    let t = TestSystem::new();
    let task = submit_and_drain(&t, 21).await;
    let before = t.transport.sent().len();

    let outcome = t.system.scheduler.evaluate(task.task_id).await.unwrap();
    assert_eq!(
        outcome,
        EvaluationOutcome::AlreadyTerminal(SchedulerTaskState::Completed)
    );
    assert_eq!(t.transport.sent().len(), before);

    let after = t.system.scheduler.task_status(task.task_id).await.unwrap().unwrap();
    assert_eq!(after.timeline, task.timeline);
}

#[tokio::test]
async fn test_every_task_in_a_zone_is_classified() {
    let t = TestSystem::new();
    let zone = 22;
    for target in [30, 35, 40, 45] {
        t.system
            .scheduler
            .submit(TaskRequest::new(
                zone,
                AutomationTaskType::NutrientDosing,
                json!({ "target_ec": target }),
            ))
            .await
            .unwrap();
    }
    t.drain().await;
    t.automation.set_confirms(zone, false);
    t.system
        .scheduler
        .submit(TaskRequest::new(zone, AutomationTaskType::TankRefill, json!({})))
        .await
        .unwrap();
    t.drain().await;

    let tasks = t.system.scheduler.list_for_zone(zone).await.unwrap();
    assert_eq!(tasks.len(), 5);
    tasks.iter().for_each(assert_well_formed);
    assert_eq!(
        tasks
            .iter()
            .filter(|task| task.status == SchedulerTaskState::Failed)
            .count(),
        1
    );
}
