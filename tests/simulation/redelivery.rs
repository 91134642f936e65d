use greenhouse_core::dispatch::DispatchTarget;
use greenhouse_core::events::EventSink;
use greenhouse_core::simulation::{
    PhaseEntryStatus, ReportStatus, SimulationRunStatus, SimulationScenario, StepOutcome,
};

use crate::common::harness::{TestSystem, CYCLE_ID, ZONE_ID};

#[tokio::test]
async fn test_failed_first_successor_dispatch_is_retried_by_redelivery() {
    let t = TestSystem::new();
    t.add_two_phase_cycle();
    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();

    t.dispatcher.fail_next_dispatches(1);
    let stats = t.drain().await;
    assert_eq!((stats.handled, stats.redelivered), (0, 1));
    assert!(t.system.simulation.report(run.id).await.unwrap().is_none());

    assert_eq!(t.advance_and_drain(1).await.handled, 1);
    let next = t.dispatcher.last_dispatched().unwrap();
    assert_eq!(next.target, DispatchTarget::simulation_step(run.id, Some(0)));

    t.advance_and_drain(105).await;
    t.advance_and_drain(495).await;
    let stored = t.system.simulation.run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SimulationRunStatus::Completed);

    let running_events = t
        .events
        .list_for_run(run.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.stage == "report" && e.status == "running")
        .count();
    assert_eq!(running_events, 1);
}

#[tokio::test]
async fn test_failed_successor_dispatch_after_advance_keeps_chain_alive() {
    let t = TestSystem::new();
    t.add_two_phase_cycle();
    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();
    t.drain().await;

    // The cycle advances, then queuing the next step fails
    t.clock.advance_secs(105);
    t.dispatcher.fail_next_dispatches(1);
    assert!(t.system.simulation.step(run.id, Some(0)).await.unwrap_err().is_transient());
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);

    // The same token is still current, so a retry finishes the transition
    let outcome = t.system.simulation.step(run.id, Some(0)).await.unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Advanced {
            from_phase_index: 0,
            to_phase_index: 1,
            ..
        }
    ));
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);
    let next = t.dispatcher.last_dispatched().unwrap();
    assert_eq!(next.target, DispatchTarget::simulation_step(run.id, Some(1)));

    // The successor queued before the retry is now stale
    t.drain().await;
    t.advance_and_drain(495).await;
    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.phases.len(), 2);
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);
}

#[tokio::test]
async fn test_interrupted_unaccelerated_pass_keeps_earlier_phases() {
    let t = TestSystem::new();
    t.add_three_phase_cycle();
    let scenario = SimulationScenario {
        sim_zone_id: Some(ZONE_ID),
        sim_grow_cycle_id: Some(CYCLE_ID),
        ..Default::default()
    };
    let run = t.system.simulation.start_run(ZONE_ID, scenario).await.unwrap();

    // Fails the reload right after the first advance
    t.cycles.script_load_failure_after(3);
    assert!(t.system.simulation.step(run.id, None).await.unwrap_err().is_transient());
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);
    let partial = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(partial.phases.len(), 1);

    let outcome = t.system.simulation.step(run.id, None).await.unwrap();
    assert_eq!(outcome, StepOutcome::Finalized(ReportStatus::Completed));

    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    let indexes: Vec<i32> = report.phases.iter().map(|p| p.phase_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(report.phases.iter().all(|p| p.status == PhaseEntryStatus::Completed));
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 2);

    let trail: Vec<(String, String)> = t
        .events
        .list_for_run(run.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.stage, e.status))
        .collect();
    let expected: Vec<(String, String)> = [
        ("report", "running"),
        ("phase", "advanced"),
        ("phase", "advanced"),
        ("harvest", "harvested"),
        ("report", "completed"),
    ]
    .iter()
    .map(|(stage, status)| (stage.to_string(), status.to_string()))
    .collect();
    assert_eq!(trail, expected);
}
