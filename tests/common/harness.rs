//! In-memory `GreenhouseSystem` with handles to every fake for assertions.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use greenhouse_core::cache::InMemoryStatusCache;
use greenhouse_core::clock::{Clock, ManualClock};
use greenhouse_core::config::{ConfigManager, GreenhouseConfig};
use greenhouse_core::cycle::{InMemoryGrowCycles, PhaseDefinition};
use greenhouse_core::devices::RecordingTransport;
use greenhouse_core::dispatch::worker::DrainStats;
use greenhouse_core::dispatch::InMemoryDispatcher;
use greenhouse_core::events::EventPublisher;
use greenhouse_core::locks::InMemoryNamedLock;
use greenhouse_core::store::{InMemoryRetryStore, InMemorySimulationStore, InMemoryTaskStatusStore};
use greenhouse_core::{ExternalPorts, GreenhouseSystem, StorageBackend};

use super::fakes::{RecordingAlertProcessor, ScriptedAutomation};

pub const ZONE_ID: i64 = 3;
pub const CYCLE_ID: i64 = 7;

pub fn test_config() -> GreenhouseConfig {
    let mut config = GreenhouseConfig::default();
    config.environment = "test".to_string();
    config.locks.acquire_timeout_ms = 50;
    config.locks.poll_interval_ms = 5;
    config.dispatch.poll_interval_ms = 10;
    config
}

pub struct TestSystem {
    pub clock: ManualClock,
    pub cycles: Arc<InMemoryGrowCycles>,
    pub automation: Arc<ScriptedAutomation>,
    pub transport: Arc<RecordingTransport>,
    pub alert_processor: Arc<RecordingAlertProcessor>,
    pub dispatcher: Arc<InMemoryDispatcher>,
    pub events: Arc<EventPublisher>,
    pub simulations: Arc<InMemorySimulationStore>,
    pub retries: Arc<InMemoryRetryStore>,
    pub task_statuses: Arc<InMemoryTaskStatusStore>,
    pub lock: Arc<InMemoryNamedLock>,
    pub system: GreenhouseSystem,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GreenhouseConfig) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let cycles = Arc::new(InMemoryGrowCycles::new());
        let automation = Arc::new(ScriptedAutomation::new());
        let transport = Arc::new(RecordingTransport::new());
        let alert_processor = Arc::new(RecordingAlertProcessor::new());
        let dispatcher = Arc::new(InMemoryDispatcher::new(shared.clone()));
        let events = Arc::new(EventPublisher::default());
        let simulations = Arc::new(InMemorySimulationStore::new());
        let retries = Arc::new(InMemoryRetryStore::new());
        let task_statuses = Arc::new(InMemoryTaskStatusStore::new());
        let lock = Arc::new(InMemoryNamedLock::new(shared.clone()));

        let backend = StorageBackend {
            simulations: simulations.clone(),
            task_statuses: task_statuses.clone(),
            retries: retries.clone(),
            events: events.clone(),
            cache: Arc::new(InMemoryStatusCache::new(shared.clone())),
            dispatcher: dispatcher.clone(),
            lock: lock.clone(),
        };
        let ports = ExternalPorts {
            cycles: cycles.clone(),
            automation: automation.clone(),
            transport: transport.clone(),
            alert_processor: alert_processor.clone(),
        };
        let system = GreenhouseSystem::new(
            ConfigManager::from_config(config).unwrap(),
            shared,
            backend,
            ports,
        );

        Self {
            clock,
            cycles,
            automation,
            transport,
            alert_processor,
            dispatcher,
            events,
            simulations,
            retries,
            task_statuses,
            lock,
            system,
        }
    }

    /// Handle everything due right now
    pub async fn drain(&self) -> DrainStats {
        self.system.drain_due().await.unwrap()
    }

    pub async fn advance_and_drain(&self, seconds: i64) -> DrainStats {
        self.clock.advance_secs(seconds);
        self.drain().await
    }

    /// Seedling (72 h) then vegetative (336 h)
    pub fn add_two_phase_cycle(&self) {
        self.cycles.add_cycle(
            CYCLE_ID,
            ZONE_ID,
            vec![
                PhaseDefinition::new(501, 0, "seedling").with_hours(72.0),
                PhaseDefinition::new(502, 1, "vegetative").with_hours(336.0),
            ],
        );
    }

    pub fn add_three_phase_cycle(&self) {
        self.cycles.add_cycle(
            CYCLE_ID,
            ZONE_ID,
            vec![
                PhaseDefinition::new(501, 0, "seedling").with_days(3.0),
                PhaseDefinition::new(502, 1, "vegetative").with_days(14.0),
                PhaseDefinition::new(503, 2, "flowering").with_days(7.0),
            ],
        );
    }
}
