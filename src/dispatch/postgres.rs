//! PostgreSQL delayed dispatcher backed by the `scheduled_dispatches` table.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several workers can poll the same table, and
//! a claim is a lease: rows whose `claimed_until` has passed become claimable again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{to_chrono, DelayedDispatcher, DispatchEnvelope, DispatchTarget};
use crate::clock::Clock;
use crate::error::{GreenhouseError, GreenhouseResult};

#[derive(Debug, Clone)]
pub struct PgDispatcher {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    claim_lease: Duration,
}

impl PgDispatcher {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            claim_lease: Duration::from_secs(300),
        }
    }

    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }

    fn envelope_from_row(row: &PgRow) -> GreenhouseResult<DispatchEnvelope> {
        let target: DispatchTarget = serde_json::from_value(row.get("target"))?;
        let attempt: i32 = row.get("attempt");
        Ok(DispatchEnvelope {
            id: row.get("id"),
            target,
            due_at: row.get::<DateTime<Utc>, _>("due_at"),
            enqueued_at: row.get::<DateTime<Utc>, _>("enqueued_at"),
            attempt: u32::try_from(attempt).unwrap_or(1),
        })
    }
}

#[async_trait]
impl DelayedDispatcher for PgDispatcher {
    async fn dispatch(
        &self,
        target: DispatchTarget,
        delay: Duration,
    ) -> GreenhouseResult<DispatchEnvelope> {
        let envelope = DispatchEnvelope::new(target, self.clock.now(), delay);
        sqlx::query(
            r#"
            INSERT INTO scheduled_dispatches (id, target, due_at, enqueued_at, attempt)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(envelope.id)
        .bind(serde_json::to_value(&envelope.target)?)
        .bind(envelope.due_at)
        .bind(envelope.enqueued_at)
        .bind(envelope.attempt as i32)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            envelope_id = %envelope.id,
            target = %envelope.target,
            due_at = %envelope.due_at,
            "Dispatch scheduled"
        );
        Ok(envelope)
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> GreenhouseResult<Vec<DispatchEnvelope>> {
        let limit = i64::try_from(limit)
            .map_err(|_| GreenhouseError::DispatchError(format!("batch size {limit} too large")))?;
        let claimed_until = now + to_chrono(self.claim_lease);

        let rows = sqlx::query(
            r#"
            UPDATE scheduled_dispatches
            SET claimed_until = $2
            WHERE id IN (
                SELECT id FROM scheduled_dispatches
                WHERE due_at <= $1
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY due_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, target, due_at, enqueued_at, attempt
            "#,
        )
        .bind(now)
        .bind(claimed_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut envelopes = rows
            .iter()
            .map(Self::envelope_from_row)
            .collect::<GreenhouseResult<Vec<_>>>()?;
        envelopes.sort_by_key(|e| e.due_at);
        Ok(envelopes)
    }

    async fn complete(&self, envelope_id: Uuid) -> GreenhouseResult<()> {
        sqlx::query("DELETE FROM scheduled_dispatches WHERE id = $1")
            .bind(envelope_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn redeliver(&self, envelope: DispatchEnvelope, delay: Duration) -> GreenhouseResult<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_dispatches
            SET due_at = $2, attempt = attempt + 1, claimed_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(envelope.id)
        .bind(self.clock.now() + to_chrono(delay))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
