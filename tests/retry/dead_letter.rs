use chrono::Duration as ChronoDuration;
use serde_json::json;

use greenhouse_core::clock::Clock;
use greenhouse_core::jobs::{IncomingAlert, NodeConfig};
use greenhouse_core::retry::{RetryOutcome, RetryPolicy, RetryStatus};

use crate::common::harness::{test_config, TestSystem};

const NODE: &str = "nd-irrig-4";

fn node_config() -> NodeConfig {
    NodeConfig::new(NODE, 12, json!({ "flow_limit_lpm": 8, "sample_interval_s": 15 }))
}

#[tokio::test]
async fn test_config_delivery_walks_backoff_ladder_into_dead_letter() {
    let t = TestSystem::new();
    t.transport.fail_node(NODE);
    let start = t.clock.now();
    let jobs = &t.system.config_delivery;

    assert_eq!(
        jobs.deliver(&node_config()).await.unwrap(),
        RetryOutcome::RetryScheduled {
            attempts: 1,
            next_retry_at: start + ChronoDuration::seconds(60),
        }
    );

    // A second push inside the backoff window defers to the sweep without sending
    assert!(matches!(
        jobs.deliver(&node_config()).await.unwrap(),
        RetryOutcome::RetryScheduled { attempts: 1, .. }
    ));

    t.clock.advance_secs(59);
    assert_eq!(jobs.sweep(t.clock.now(), 10).await.unwrap().attempted, 0);

    t.clock.advance_secs(1);
    let stats = jobs.sweep(t.clock.now(), 10).await.unwrap();
    assert_eq!((stats.attempted, stats.rescheduled), (1, 1));
    let record = t.system.retry.record("node:nd-irrig-4").await.unwrap().unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(record.next_retry_at, t.clock.now() + ChronoDuration::seconds(120));

    t.clock.advance_secs(120);
    let stats = jobs.sweep(t.clock.now(), 10).await.unwrap();
    assert_eq!(stats.dead_lettered, 1);

    let record = t.system.retry.record("node:nd-irrig-4").await.unwrap().unwrap();
    assert_eq!(record.status, RetryStatus::Dlq);
    assert_eq!(record.attempts, 3);
    assert!(record.last_error.unwrap().contains(NODE));
    assert!(t.transport.sent_to(NODE).is_empty());
}

#[tokio::test]
async fn test_dead_lettered_record_is_never_retried_automatically() {
    let t = TestSystem::new();
    t.transport.fail_node(NODE);
    let jobs = &t.system.config_delivery;

    jobs.deliver(&node_config()).await.unwrap();
    for wait in [60, 120] {
        t.clock.advance_secs(wait);
        jobs.sweep(t.clock.now(), 10).await.unwrap();
    }
    assert_eq!(t.system.retry.dead_letters().await.unwrap().len(), 1);

    t.transport.heal_node(NODE);
    t.clock.advance_secs(86_400);
    assert_eq!(jobs.sweep(t.clock.now(), 10).await.unwrap().attempted, 0);
    assert!(t.system.retry.due_records(t.clock.now(), 10).await.unwrap().is_empty());

    // Direct calls refuse to run the operation as well
    assert_eq!(
        jobs.deliver(&node_config()).await.unwrap(),
        RetryOutcome::DeadLetterSkipped
    );
    assert!(t.transport.sent_to(NODE).is_empty());
}

#[tokio::test]
async fn test_requeued_dead_letter_is_delivered_by_next_sweep() {
    let t = TestSystem::new();
    t.transport.fail_node(NODE);
    let jobs = &t.system.config_delivery;

    jobs.deliver(&node_config()).await.unwrap();
    for wait in [60, 120] {
        t.clock.advance_secs(wait);
        jobs.sweep(t.clock.now(), 10).await.unwrap();
    }

    t.transport.heal_node(NODE);
    let requeued = t.system.retry.requeue_dead_letter("node:nd-irrig-4").await.unwrap();
    assert_eq!(requeued.status, RetryStatus::Pending);
    assert_eq!(requeued.attempts, 0);

    let stats = jobs.sweep(t.clock.now(), 10).await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert!(t.system.retry.record("node:nd-irrig-4").await.unwrap().is_none());

    // The sweep replayed the stored document, not a reconstruction
    let sent = t.transport.sent_to(NODE);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation_id.as_deref(), Some("config:nd-irrig-4:v12"));
}

#[tokio::test]
async fn test_requeue_of_pending_record_is_rejected() {
    let t = TestSystem::new();
    t.transport.fail_node(NODE);
    t.system.config_delivery.deliver(&node_config()).await.unwrap();

    let err = t
        .system
        .retry
        .requeue_dead_letter("node:nd-irrig-4")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");

    let err = t.system.retry.requeue_dead_letter("node:unknown").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_alert_sweep_recovers_after_transient_failures() {
    let t = TestSystem::new();
    t.alert_processor.fail_next(2);
    let alert = IncomingAlert::new("leak-zone-3-0412", "water_leak", t.clock.now())
        .for_zone(3)
        .with_details(json!({ "sensor": "floor-2" }));

    assert!(matches!(
        t.system.alerts.ingest(&alert).await.unwrap(),
        RetryOutcome::RetryScheduled { attempts: 1, .. }
    ));
    t.clock.advance_secs(60);
    assert_eq!(t.system.alerts.sweep(t.clock.now(), 10).await.unwrap().rescheduled, 1);
    t.clock.advance_secs(120);
    assert_eq!(t.system.alerts.sweep(t.clock.now(), 10).await.unwrap().succeeded, 1);

    assert_eq!(t.alert_processor.calls(), 3);
    assert_eq!(t.alert_processor.processed(), vec!["leak-zone-3-0412".to_string()]);
    assert!(t.system.retry.record("alert:leak-zone-3-0412").await.unwrap().is_none());
}

#[tokio::test]
async fn test_per_kind_policy_overrides_default() {
    let mut config = test_config();
    config
        .retry
        .policies
        .insert("alert_ingestion".to_string(), RetryPolicy::new(1, vec![30]));
    let t = TestSystem::with_config(config);
    t.alert_processor.fail_next(1);

    let alert = IncomingAlert::new("smoke-zone-9", "smoke_detected", t.clock.now());
    match t.system.alerts.ingest(&alert).await.unwrap() {
        RetryOutcome::DeadLettered { attempts, last_error } => {
            assert_eq!(attempts, 1);
            assert!(last_error.contains("rule engine unavailable"));
        }
        other => panic!("expected DeadLettered, got {other:?}"),
    }

    // Config deliveries keep the default three attempts
    assert_eq!(t.system.retry.policy_for("config_delivery").max_attempts, 3);
}

#[tokio::test]
async fn test_sweeps_only_pick_up_their_own_kind() {
    let t = TestSystem::new();
    t.transport.fail_node(NODE);
    t.alert_processor.fail_next(1);

    t.system.config_delivery.deliver(&node_config()).await.unwrap();
    let alert = IncomingAlert::new("co2-high-1", "co2_high", t.clock.now());
    t.system.alerts.ingest(&alert).await.unwrap();

    t.clock.advance_secs(60);
    assert_eq!(t.system.retry.due_records(t.clock.now(), 10).await.unwrap().len(), 2);

    let stats = t.system.alerts.sweep(t.clock.now(), 10).await.unwrap();
    assert_eq!((stats.attempted, stats.succeeded), (1, 1));

    let remaining = t.system.retry.due_records(t.clock.now(), 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "node:nd-irrig-4");
}
