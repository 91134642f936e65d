//! Dispatch worker: drains due envelopes and routes them to their handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{DelayedDispatcher, DispatchEnvelope, DispatchTarget};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::error::GreenhouseResult;
use crate::scheduler::TaskLifecycleEngine;
use crate::simulation::SimulationOrchestrator;

#[async_trait]
pub trait DispatchHandler: Send + Sync {
    async fn handle(&self, envelope: &DispatchEnvelope) -> GreenhouseResult<()>;
}

/// Routes simulation steps to the orchestrator and scheduler tasks to the lifecycle engine
#[derive(Clone)]
pub struct DispatchRouter {
    simulation: Arc<SimulationOrchestrator>,
    scheduler: Arc<TaskLifecycleEngine>,
}

impl DispatchRouter {
    pub fn new(simulation: Arc<SimulationOrchestrator>, scheduler: Arc<TaskLifecycleEngine>) -> Self {
        Self {
            simulation,
            scheduler,
        }
    }
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter").finish_non_exhaustive()
    }
}

#[async_trait]
impl DispatchHandler for DispatchRouter {
    async fn handle(&self, envelope: &DispatchEnvelope) -> GreenhouseResult<()> {
        match envelope.target {
            DispatchTarget::SimulationStep {
                simulation_id,
                phase_index,
            } => {
                self.simulation.step(simulation_id, phase_index).await?;
            }
            DispatchTarget::SchedulerTask { task_id } => {
                self.scheduler.evaluate(task_id).await?;
            }
        }
        Ok(())
    }
}

/// Summary of one polling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub handled: usize,
    pub redelivered: usize,
    pub dropped: usize,
}

pub struct DispatchWorker {
    dispatcher: Arc<dyn DelayedDispatcher>,
    handler: Arc<dyn DispatchHandler>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchWorker {
    pub fn new(
        dispatcher: Arc<dyn DelayedDispatcher>,
        handler: Arc<dyn DispatchHandler>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            dispatcher,
            handler,
            clock,
            config,
        }
    }

    /// Claim and handle every envelope due at `now`, one batch.
    ///
    /// Transient handler failures are redelivered after one poll interval; anything else
    /// is logged and acknowledged so a poisoned envelope cannot loop forever.
    pub async fn run_once(&self, now: DateTime<Utc>) -> GreenhouseResult<DrainStats> {
        let envelopes = self.dispatcher.take_due(now, self.config.batch_size).await?;
        let mut stats = DrainStats::default();

        for envelope in envelopes {
            match self.handler.handle(&envelope).await {
                Ok(()) => {
                    self.dispatcher.complete(envelope.id).await?;
                    stats.handled += 1;
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        envelope_id = %envelope.id,
                        target = %envelope.target,
                        attempt = envelope.attempt,
                        error = %error,
                        "Dispatch handler failed transiently, redelivering"
                    );
                    self.dispatcher
                        .redeliver(envelope, self.config.poll_interval())
                        .await?;
                    stats.redelivered += 1;
                }
                Err(error) => {
                    tracing::error!(
                        envelope_id = %envelope.id,
                        target = %envelope.target,
                        error_code = error.code(),
                        error = %error,
                        "Dispatch handler failed, dropping envelope"
                    );
                    self.dispatcher.complete(envelope.id).await?;
                    stats.dropped += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> GreenhouseResult<()> {
        let mut interval = tokio::time::interval(self.poll_interval());
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Dispatch worker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.run_once(self.clock.now()).await {
                        tracing::error!(error = %error, "Dispatch polling pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Dispatch worker stopped");
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval().max(Duration::from_millis(1))
    }
}
