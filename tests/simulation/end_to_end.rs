use std::time::Duration;
use tokio::sync::watch;

use greenhouse_core::clock::Clock;
use greenhouse_core::dispatch::DispatchTarget;
use greenhouse_core::events::EventSink;
use greenhouse_core::simulation::{
    PhaseEntryStatus, ReportStatus, SimulationRunStatus, SimulationScenario, StepOutcome,
};

use crate::common::harness::{TestSystem, CYCLE_ID, ZONE_ID};

#[tokio::test]
async fn test_accelerated_run_walks_both_phases_and_harvests() {
    let t = TestSystem::new();
    t.add_two_phase_cycle();
    t.cycles.set_zone_devices(ZONE_ID, 4);

    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();
    assert_eq!(run.status, SimulationRunStatus::Processing);

    // Step 1: report created, seedling running, next step after 105 s
    assert_eq!(t.drain().await.handled, 1);
    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Running);
    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].phase_index, 0);
    assert_eq!(report.phases[0].status, PhaseEntryStatus::Running);

    let next = t.dispatcher.last_dispatched().unwrap();
    assert_eq!(next.target, DispatchTarget::simulation_step(run.id, Some(0)));
    assert_eq!(next.delay_seconds(), 105);

    let stored = t.system.simulation.run(run.id).await.unwrap().unwrap();
    let schedule = stored.phase_schedule.unwrap();
    assert_eq!(schedule.seconds_for(0), Some(105));
    assert_eq!(schedule.seconds_for(1), Some(495));

    // Nothing fires early
    assert_eq!(t.advance_and_drain(104).await.handled, 0);

    // Step 2: seedling closed, cycle advanced, vegetative running
    assert_eq!(t.advance_and_drain(1).await.handled, 1);
    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[0].status, PhaseEntryStatus::Completed);
    assert!(report.phases[0].completed_at.is_some());
    assert_eq!(report.phases[1].status, PhaseEntryStatus::Running);
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 1);

    let next = t.dispatcher.last_dispatched().unwrap();
    assert_eq!(next.target, DispatchTarget::simulation_step(run.id, Some(1)));
    assert_eq!(next.delay_seconds(), 495);

    // Step 3: last phase closed, harvested, finalized
    assert_eq!(t.advance_and_drain(495).await.handled, 1);
    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    assert!(report.errors.is_empty());
    assert!(report.phases.iter().all(|p| p.status == PhaseEntryStatus::Completed));
    assert_eq!(report.finished_at, Some(t.clock.now()));

    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.phases_count, 2);
    assert_eq!(metrics.devices_count, 4);
    assert_eq!(metrics.duration_seconds, 600);
    assert!(t.cycles.is_harvested(CYCLE_ID));
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);

    let stored = t.system.simulation.run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SimulationRunStatus::Completed);
    let status = t.system.simulation.status(run.id).await.unwrap().unwrap();
    assert_eq!(status.status, SimulationRunStatus::Completed);
    assert_eq!(status.report_status, Some(ReportStatus::Completed));

    // No successor after finalization
    assert_eq!(t.dispatcher.pending_len(), 0);
}

#[tokio::test]
async fn test_run_emits_audit_trail_in_order() {
    let t = TestSystem::new();
    t.add_two_phase_cycle();
    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();

    t.drain().await;
    t.advance_and_drain(105).await;
    t.advance_and_drain(495).await;

    let events = t.events.list_for_run(run.id).await.unwrap();
    let trail: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.stage.as_str(), e.status.as_str()))
        .collect();
    assert_eq!(
        trail,
        vec![
            ("report", "running"),
            ("phase", "advanced"),
            ("harvest", "harvested"),
            ("report", "completed"),
        ]
    );
    assert!(events.iter().all(|e| e.service == "simulation" && e.zone_id == ZONE_ID));

    // The terminal event is appended after the metrics were computed
    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.metrics.unwrap().events_count, 3);
}

#[tokio::test]
async fn test_finalized_report_has_one_completed_entry_per_phase() {
    let t = TestSystem::new();
    t.add_three_phase_cycle();
    let scenario = SimulationScenario {
        time_scale: Some(2880.0),
        sim_zone_id: Some(ZONE_ID),
        sim_grow_cycle_id: Some(CYCLE_ID),
        ..Default::default()
    };
    let run = t.system.simulation.start_run(ZONE_ID, scenario).await.unwrap();

    // 24 days compressed 2880x is 12 minutes; walk well past it
    t.drain().await;
    for _ in 0..20 {
        t.advance_and_drain(60).await;
    }

    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.phases.len(), 3);
    assert!(report.phases.iter().all(|p| p.completed_at.is_some()));
    let indexes: Vec<i32> = report.phases.iter().map(|p| p.phase_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(report.metrics.unwrap().phases_count, 3);

    let schedule = t
        .system
        .simulation
        .run(run.id)
        .await
        .unwrap()
        .unwrap()
        .phase_schedule
        .unwrap();
    assert_eq!(schedule.total_seconds(), 720);
}

#[tokio::test]
async fn test_unaccelerated_run_completes_in_a_single_step() {
    let t = TestSystem::new();
    t.add_three_phase_cycle();
    let scenario = SimulationScenario {
        sim_zone_id: Some(ZONE_ID),
        sim_grow_cycle_id: Some(CYCLE_ID),
        ..Default::default()
    };
    let run = t.system.simulation.start_run(ZONE_ID, scenario).await.unwrap();

    let outcome = t.system.simulation.step(run.id, None).await.unwrap();
    assert_eq!(outcome, StepOutcome::Finalized(ReportStatus::Completed));

    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.phases.len(), 3);
    assert!(report.phases.iter().all(|p| p.status == PhaseEntryStatus::Completed));
    assert_eq!(t.cycles.advance_calls(CYCLE_ID), 2);
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);
    assert!(t
        .system
        .simulation
        .run(run.id)
        .await
        .unwrap()
        .unwrap()
        .phase_schedule
        .is_none());

    // The queued initial dispatch is now a no-op
    t.drain().await;
    assert_eq!(t.cycles.harvest_calls(CYCLE_ID), 1);
}

#[tokio::test]
async fn test_background_worker_runs_first_step_and_stops_on_shutdown() {
    let t = TestSystem::new();
    t.add_two_phase_cycle();
    let run = t
        .system
        .simulation
        .start_run(ZONE_ID, SimulationScenario::accelerated(ZONE_ID, CYCLE_ID, 10.0))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (result, ()) = tokio::join!(t.system.run(shutdown_rx), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
    });
    result.unwrap();

    let report = t.system.simulation.report(run.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Running);
    assert_eq!(report.phases.len(), 1);
}
