//! In-process event publisher.
//!
//! ```rust
//! use chrono::Utc;
//! use greenhouse_core::events::{EventPublisher, EventSink, SimulationEvent};
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::default();
//! let mut receiver = publisher.subscribe();
//! let run = Uuid::new_v4();
//!
//! publisher
//!     .append(SimulationEvent::new(run, 3, "simulation", "report", "running", "started", Utc::now()))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(publisher.count_for_run(run).await.unwrap(), 1);
//! assert_eq!(receiver.recv().await.unwrap().stage, "report");
//! # });
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{EventSink, SimulationEvent};
use crate::error::GreenhouseResult;

/// In-process event sink: keeps an append-only log and fans events out to subscribers
#[derive(Debug)]
pub struct EventPublisher {
    sender: broadcast::Sender<SimulationEvent>,
    log: RwLock<Vec<SimulationEvent>>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            log: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventSink for EventPublisher {
    async fn append(&self, event: SimulationEvent) -> GreenhouseResult<()> {
        tracing::debug!(
            simulation_id = %event.simulation_id,
            zone_id = event.zone_id,
            stage = %event.stage,
            status = %event.status,
            "Simulation event appended"
        );
        self.log.write().push(event.clone());
        // No subscribers is fine; the log is the source of truth
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn count_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<u64> {
        Ok(self
            .log
            .read()
            .iter()
            .filter(|event| event.simulation_id == simulation_id)
            .count() as u64)
    }

    async fn list_for_run(&self, simulation_id: Uuid) -> GreenhouseResult<Vec<SimulationEvent>> {
        Ok(self
            .log
            .read()
            .iter()
            .filter(|event| event.simulation_id == simulation_id)
            .cloned()
            .collect())
    }
}
