//! In-memory delayed dispatcher for tests and local development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: pending envelopes are lost on exit
//! - Claims never time out; an uncompleted claim stays in flight until redelivered
//! - Dispatch history is kept for assertions and grows without bound
//! - Dispatch failures are scripted through [`InMemoryDispatcher::fail_next_dispatches`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{to_chrono, DelayedDispatcher, DispatchEnvelope, DispatchTarget};
use crate::clock::{Clock, SystemClock};
use crate::error::{GreenhouseError, GreenhouseResult};

#[derive(Debug, Default)]
struct Queues {
    pending: Vec<DispatchEnvelope>,
    in_flight: HashMap<Uuid, DispatchEnvelope>,
    history: Vec<DispatchEnvelope>,
}

#[derive(Debug)]
pub struct InMemoryDispatcher {
    queues: Mutex<Queues>,
    failures_left: AtomicU32,
    clock: Arc<dyn Clock>,
}

impl InMemoryDispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            failures_left: AtomicU32::new(0),
            clock,
        }
    }

    /// Envelopes not yet claimed, ordered by due time
    pub fn pending(&self) -> Vec<DispatchEnvelope> {
        let mut pending = self.queues.lock().pending.clone();
        pending.sort_by_key(|e| e.due_at);
        pending
    }

    pub fn pending_len(&self) -> usize {
        self.queues.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.queues.lock().in_flight.len()
    }

    /// Every envelope ever dispatched, in dispatch order
    pub fn history(&self) -> Vec<DispatchEnvelope> {
        self.queues.lock().history.clone()
    }

    /// Reject the next `times` dispatches with a transient error
    pub fn fail_next_dispatches(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    /// Most recently dispatched envelope
    pub fn last_dispatched(&self) -> Option<DispatchEnvelope> {
        self.queues.lock().history.last().cloned()
    }
}

impl Default for InMemoryDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl DelayedDispatcher for InMemoryDispatcher {
    async fn dispatch(
        &self,
        target: DispatchTarget,
        delay: Duration,
    ) -> GreenhouseResult<DispatchEnvelope> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GreenhouseError::DispatchError(format!(
                "queue unavailable, dropped {target}"
            )));
        }

        let envelope = DispatchEnvelope::new(target, self.clock.now(), delay);
        tracing::debug!(
            envelope_id = %envelope.id,
            target = %envelope.target,
            due_at = %envelope.due_at,
            "Dispatch scheduled"
        );
        let mut queues = self.queues.lock();
        queues.pending.push(envelope.clone());
        queues.history.push(envelope.clone());
        Ok(envelope)
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GreenhouseResult<Vec<DispatchEnvelope>> {
        let mut queues = self.queues.lock();
        let (mut due, rest): (Vec<_>, Vec<_>) =
            queues.pending.drain(..).partition(|e| e.is_due(now));
        queues.pending = rest;

        due.sort_by_key(|e| e.due_at);
        if due.len() > limit {
            let overflow = due.split_off(limit);
            queues.pending.extend(overflow);
        }
        for envelope in &due {
            queues.in_flight.insert(envelope.id, envelope.clone());
        }
        Ok(due)
    }

    async fn complete(&self, envelope_id: Uuid) -> GreenhouseResult<()> {
        self.queues.lock().in_flight.remove(&envelope_id);
        Ok(())
    }

    async fn redeliver(&self, mut envelope: DispatchEnvelope, delay: Duration) -> GreenhouseResult<()> {
        let mut queues = self.queues.lock();
        queues.in_flight.remove(&envelope.id);
        envelope.attempt += 1;
        envelope.due_at = self.clock.now() + to_chrono(delay);
        queues.pending.push(envelope);
        Ok(())
    }
}
