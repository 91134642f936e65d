//! # Greenhouse System Context
//!
//! Dependency container wiring storage backends, external ports and configuration into
//! the orchestration services. Hosts build one [`GreenhouseSystem`] per process and run
//! its dispatch worker; tests build it over in-memory backends and a manual clock.

use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::{InMemoryStatusCache, StatusCache};
use crate::clock::Clock;
use crate::config::ConfigManager;
use crate::cycle::GrowCycleService;
use crate::devices::DeviceCommandTransport;
use crate::dispatch::{DelayedDispatcher, DispatchRouter, DispatchWorker, InMemoryDispatcher};
use crate::error::GreenhouseResult;
use crate::events::{EventPublisher, EventSink};
use crate::jobs::{AlertIngestionJob, AlertProcessor, NodeConfigDeliveryJob};
use crate::locks::{InMemoryNamedLock, LockOptions, NamedLock};
use crate::retry::RetryManager;
use crate::scheduler::{TaskLifecycleEngine, ZoneAutomation};
use crate::simulation::{SimulationContext, SimulationOrchestrator};
use crate::store::{
    InMemoryRetryStore, InMemorySimulationStore, InMemoryTaskStatusStore, RetryStore,
    SimulationStore, TaskStatusStore,
};

/// Durable state and coordination primitives
#[derive(Clone)]
pub struct StorageBackend {
    pub simulations: Arc<dyn SimulationStore>,
    pub task_statuses: Arc<dyn TaskStatusStore>,
    pub retries: Arc<dyn RetryStore>,
    pub events: Arc<dyn EventSink>,
    pub cache: Arc<dyn StatusCache>,
    pub dispatcher: Arc<dyn DelayedDispatcher>,
    pub lock: Arc<dyn NamedLock>,
}

impl StorageBackend {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            simulations: Arc::new(InMemorySimulationStore::new()),
            task_statuses: Arc::new(InMemoryTaskStatusStore::new()),
            retries: Arc::new(InMemoryRetryStore::new()),
            events: Arc::new(EventPublisher::default()),
            cache: Arc::new(InMemoryStatusCache::new(clock.clone())),
            dispatcher: Arc::new(InMemoryDispatcher::new(clock.clone())),
            lock: Arc::new(InMemoryNamedLock::new(clock)),
        }
    }

    /// PostgreSQL-backed stores, lease lock and dispatch table. The status cache stays
    /// in process memory.
    #[cfg(feature = "postgres")]
    pub async fn postgres(
        config: &crate::config::DatabaseConfig,
        clock: Arc<dyn Clock>,
    ) -> GreenhouseResult<Self> {
        use crate::dispatch::PgDispatcher;
        use crate::locks::PgNamedLock;
        use crate::store::postgres::{
            apply_schema, connect, PgEventSink, PgRetryStore, PgSimulationStore, PgTaskStatusStore,
        };

        let pool = connect(config).await?;
        apply_schema(&pool).await?;

        Ok(Self {
            simulations: Arc::new(PgSimulationStore::new(pool.clone())),
            task_statuses: Arc::new(PgTaskStatusStore::new(pool.clone())),
            retries: Arc::new(PgRetryStore::new(pool.clone())),
            events: Arc::new(PgEventSink::new(pool.clone())),
            cache: Arc::new(InMemoryStatusCache::new(clock.clone())),
            dispatcher: Arc::new(PgDispatcher::new(pool.clone(), clock.clone())),
            lock: Arc::new(PgNamedLock::new(pool, clock)),
        })
    }
}

/// Collaborators owned by other services
#[derive(Clone)]
pub struct ExternalPorts {
    pub cycles: Arc<dyn GrowCycleService>,
    pub automation: Arc<dyn ZoneAutomation>,
    pub transport: Arc<dyn DeviceCommandTransport>,
    pub alert_processor: Arc<dyn AlertProcessor>,
}

pub struct GreenhouseSystem {
    pub system_id: Uuid,
    pub config_manager: Arc<ConfigManager>,
    pub clock: Arc<dyn Clock>,
    pub backend: StorageBackend,
    pub simulation: Arc<SimulationOrchestrator>,
    pub scheduler: Arc<TaskLifecycleEngine>,
    pub retry: Arc<RetryManager>,
    pub alerts: AlertIngestionJob,
    pub config_delivery: NodeConfigDeliveryJob,
    pub worker: DispatchWorker,
}

impl std::fmt::Debug for GreenhouseSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreenhouseSystem")
            .field("system_id", &self.system_id)
            .field("environment", &self.config_manager.environment())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl GreenhouseSystem {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
        backend: StorageBackend,
        ports: ExternalPorts,
    ) -> Self {
        let config = config_manager.config();
        let lock_options = LockOptions::from(&config.locks);

        let simulation = Arc::new(SimulationOrchestrator::new(
            SimulationContext {
                store: backend.simulations.clone(),
                cycles: ports.cycles.clone(),
                events: backend.events.clone(),
                cache: backend.cache.clone(),
                dispatcher: backend.dispatcher.clone(),
                lock: backend.lock.clone(),
                clock: clock.clone(),
            },
            config.simulation.clone(),
            lock_options,
        ));

        let scheduler = Arc::new(TaskLifecycleEngine::new(
            backend.task_statuses.clone(),
            ports.automation.clone(),
            ports.transport.clone(),
            backend.dispatcher.clone(),
            backend.cache.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));

        let retry = Arc::new(RetryManager::new(
            backend.retries.clone(),
            backend.lock.clone(),
            lock_options,
            backend.cache.clone(),
            config.retry.clone(),
            clock.clone(),
        ));

        let worker = DispatchWorker::new(
            backend.dispatcher.clone(),
            Arc::new(DispatchRouter::new(simulation.clone(), scheduler.clone())),
            clock.clone(),
            config.dispatch.clone(),
        );

        let system_id = Uuid::new_v4();
        tracing::info!(
            system_id = %system_id,
            environment = %config_manager.environment(),
            "Greenhouse system initialized"
        );

        Self {
            system_id,
            alerts: AlertIngestionJob::new(retry.clone(), ports.alert_processor),
            config_delivery: NodeConfigDeliveryJob::new(retry.clone(), ports.transport),
            config_manager,
            clock,
            backend,
            simulation,
            scheduler,
            retry,
            worker,
        }
    }

    /// Drain everything due at the clock's current time
    pub async fn drain_due(&self) -> GreenhouseResult<crate::dispatch::worker::DrainStats> {
        self.worker.run_once(self.clock.now()).await
    }

    /// Run the dispatch worker until `shutdown` flips to `true`
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> GreenhouseResult<()> {
        self.worker.run(shutdown).await
    }
}
