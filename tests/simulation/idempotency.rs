use std::time::Duration;

use greenhouse_core::dispatch::{DelayedDispatcher, DispatchTarget};
use greenhouse_core::locks::NamedLock;
use greenhouse_core::simulation::{
    ReportStatus, SimulationScenario, StepOutcome, StepSkip,
};

use crate::common::harness::{TestSystem, CYCLE_ID, ZONE_ID};

async fn started_run(t: &TestSystem) -> uuid::Uuid {
    t.add_two_phase_cycle();
    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();
    t.drain().await;
    run.id
}

#[tokio::test]
async fn test_replayed_token_does_not_advance_twice() {
    let t = TestSystem::new();
    let id = started_run(&t).await;

    t.clock.advance_secs(105);
    let first = t.system.simulation.step(id, Some(0)).await.unwrap();
    assert!(matches!(
        first,
        StepOutcome::Advanced {
            from_phase_index: 0,
            to_phase_index: 1,
            ..
        }
    ));

    let replay = t.system.simulation.step(id, Some(0)).await.unwrap();
    assert_eq!(replay, StepOutcome::Skipped(StepSkip::StaleStep));
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);

    let report = t.system.simulation.report(id).await.unwrap().unwrap();
    assert_eq!(report.phases.len(), 2);
}

#[tokio::test]
async fn test_duplicate_delivery_in_the_same_batch_is_harmless() {
    let t = TestSystem::new();
    let id = started_run(&t).await;

    // Simulate an at-least-once transport delivering the successor twice
    t.dispatcher
        .dispatch(DispatchTarget::simulation_step(id, Some(0)), Duration::from_secs(105))
        .await
        .unwrap();
    assert_eq!(t.dispatcher.pending_len(), 2);

    let stats = t.advance_and_drain(105).await;
    assert_eq!(stats.handled, 2);
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);

    let report = t.system.simulation.report(id).await.unwrap().unwrap();
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.open_entry().map(|e| e.phase_index), Some(1));

    // Exactly one successor was scheduled for phase 1
    let successors = t
        .dispatcher
        .pending()
        .into_iter()
        .filter(|e| e.target == DispatchTarget::simulation_step(id, Some(1)))
        .count();
    assert_eq!(successors, 1);
}

#[tokio::test]
async fn test_steps_after_finalization_are_no_ops() {
    let t = TestSystem::new();
    let id = started_run(&t).await;
    t.advance_and_drain(105).await;
    t.advance_and_drain(495).await;
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);

    for token in [None, Some(0), Some(1)] {
        assert_eq!(
            t.system.simulation.step(id, token).await.unwrap(),
            StepOutcome::Skipped(StepSkip::RunInactive)
        );
    }
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);

    let report = t.system.simulation.report(id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_step_is_skipped_while_lock_is_held() {
    let t = TestSystem::new();
    let id = started_run(&t).await;
    t.clock.advance_secs(105);

    let key = format!("simulation:{id}");
    let token = t
        .lock
        .try_acquire(&key, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let outcome = t.system.simulation.step(id, Some(0)).await.unwrap();
    assert_eq!(outcome, StepOutcome::AlreadyInProgress);
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 0);

    assert!(t.lock.release(&token).await.unwrap());
    let outcome = t.system.simulation.step(id, Some(0)).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Advanced { .. }));
    assert!(!t.lock.is_held(&key));
}

#[tokio::test]
async fn test_parallel_steps_for_one_run_advance_once() {
    let t = TestSystem::new();
    let id = started_run(&t).await;
    t.clock.advance_secs(105);

    let (a, b) = tokio::join!(
        t.system.simulation.step(id, Some(0)),
        t.system.simulation.step(id, Some(0))
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, StepOutcome::Advanced { .. }))
        .count();
    assert_eq!(advanced, 1);
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);
}

#[tokio::test]
async fn test_interrupted_step_does_not_advance_cycle_again() {
    let t = TestSystem::new();
    let id = started_run(&t).await;
    t.clock.advance_secs(105);

    // A previous attempt advanced the cycle but crashed before saving the report
    t.cycles.set_current_phase(CYCLE_ID, Some(1));

    let outcome = t.system.simulation.step(id, Some(0)).await.unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Advanced {
            from_phase_index: 0,
            to_phase_index: 1,
            ..
        }
    ));
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 0);
}
