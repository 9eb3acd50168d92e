//! Repository for ingested event persistence.
//!
//! Idempotency is enforced here, not in the handler: the insert carries
//! `ON CONFLICT (idempotency_key) DO NOTHING`, so a duplicate push can
//! never create a second row even when two deliveries race.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` like the producer's outbox, but
//! leaves no intermediate status behind. Instead the claim pushes
//! `next_retry_at` forward by a lease, which hides the row from concurrent
//! claimers and makes a crashed worker's claim expire on its own.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{Event, EventId, EventStatus},
};

const EVENT_COLUMNS: &str = "id, idempotency_key, event_type, order_id, store_id, status, \
                             retry_count, next_retry_at, snapshot, received_at, processed_at, \
                             last_error";

/// Repository for ingested event operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts an event unless its idempotency key already exists.
    ///
    /// Returns `true` when a row was created, `false` for a duplicate.
    /// Either outcome is a successful ingestion.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any reason other than the
    /// idempotency conflict.
    pub async fn insert_if_absent(&self, event: &Event) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                id, idempotency_key, event_type, order_id, store_id, status,
                retry_count, received_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(event.id.0)
        .bind(&event.idempotency_key)
        .bind(&event.event_type)
        .bind(&event.order_id)
        .bind(&event.store_id)
        .bind(event.status.to_string())
        .bind(event.retry_count)
        .bind(event.received_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether an event with the given idempotency key exists.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn exists_by_key(&self, idempotency_key: &str) -> Result<bool> {
        let exists = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM events WHERE idempotency_key = $1)
            "#,
        )
        .bind(idempotency_key)
        .fetch_one(&*self.pool)
        .await?;

        Ok(exists)
    }

    /// Claims due pending events for snapshot reconciliation.
    ///
    /// Eligible rows are `snapshot_pending`, within the retry ceiling, and
    /// due; ordering matches the producer's outbox claim. Claimed rows get
    /// `next_retry_at` pushed forward by `lease`, so concurrent claimers
    /// skip them and an abandoned claim self-expires.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<Event>> {
        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM events
            WHERE status = 'snapshot_pending'
              AND retry_count <= $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY next_retry_at ASC NULLS FIRST, received_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(max_retries)
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if event_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let lease_until = now
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET next_retry_at = $2
            WHERE id = ANY($1)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&event_ids)
        .bind(lease_until)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(events)
    }

    /// Stores the pulled snapshot and marks the event processed. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_processed(
        &self,
        event_id: EventId,
        snapshot: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET status = 'snapshot_processed', snapshot = $2, processed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(sqlx::types::Json(snapshot))
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Reschedules a failed reconciliation attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        event_id: EventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET retry_count = $2, next_retry_at = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(last_error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an event permanently failed. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        event_id: EventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET status = 'snapshot_failed', retry_count = $2, processed_at = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(retry_count)
        .bind(now)
        .bind(last_error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Loads an event by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE idempotency_key = $1
            "#
        ))
        .bind(idempotency_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Counts events currently in the given status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: EventStatus) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events WHERE status = $1
            "#,
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }
}
