//! PostgreSQL lease lock backed by the `named_locks` table.
//!
//! A lease row is taken over only once it has expired, so a crashed holder blocks its
//! key for at most one TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{LockToken, NamedLock};
use crate::clock::Clock;
use crate::error::GreenhouseResult;

#[derive(Debug, Clone)]
pub struct PgNamedLock {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgNamedLock {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl NamedLock for PgNamedLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> GreenhouseResult<Option<LockToken>> {
        let now = self.clock.now();
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30));
        let token = Uuid::new_v4();

        let query = r#"
            INSERT INTO named_locks (lock_key, token, expires_at, acquired_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (lock_key) DO UPDATE
                SET token = EXCLUDED.token,
                    expires_at = EXCLUDED.expires_at,
                    acquired_at = EXCLUDED.acquired_at
                WHERE named_locks.expires_at <= $4
            RETURNING token, expires_at
        "#;

        let row = sqlx::query(query)
            .bind(key)
            .bind(token)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(LockToken {
                key: key.to_string(),
                token: row.get::<Uuid, _>("token"),
                expires_at: row.get::<DateTime<Utc>, _>("expires_at"),
            }),
            None => None,
        })
    }

    async fn release(&self, token: &LockToken) -> GreenhouseResult<bool> {
        let result = sqlx::query(
            "DELETE FROM named_locks WHERE lock_key = $1 AND token = $2 AND expires_at > $3",
        )
        .bind(&token.key)
        .bind(token.token)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Drop our own expired row so it does not linger
            sqlx::query("DELETE FROM named_locks WHERE lock_key = $1 AND token = $2")
                .bind(&token.key)
                .bind(token.token)
                .execute(&self.pool)
                .await?;
            return Ok(false);
        }
        Ok(true)
    }
}
