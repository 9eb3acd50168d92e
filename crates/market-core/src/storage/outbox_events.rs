//! Repository for outbox event database operations.
//!
//! Home of the locking-claim query. Claiming selects pending rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers skip rows already locked
//! by another claimer instead of blocking, then checkpoints them to
//! `processing` inside the same transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{OutboxEvent, OutboxEventId, OutboxStatus},
};

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, payload, status, \
                              retry_count, max_retries, next_retry_at, last_attempt_at, \
                              created_at, processed_at, last_error";

/// Repository for outbox event operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Appends an outbox event within the caller's transaction.
    ///
    /// Must ride the same transaction as the business mutation it records;
    /// `Storage::create_order_with_event` is the usual entry point.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> Result<OutboxEventId> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id, aggregate_id, aggregate_type, event_type, payload, status,
                retry_count, max_retries, next_retry_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id.0)
        .bind(event.aggregate_id)
        .bind(event.aggregate_type.as_str())
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.status.to_string())
        .bind(event.retry_count)
        .bind(event.max_retries)
        .bind(event.next_retry_at)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(event.id)
    }

    /// Claims due pending events and checkpoints them to `processing`.
    ///
    /// Eligible rows have status `pending`, a retry count within their
    /// ceiling, and a due (or absent) `next_retry_at`; ordering is by
    /// `next_retry_at` nulls-first, then creation order. `FOR UPDATE SKIP
    /// LOCKED` gives non-blocking mutual exclusion across workers: a row
    /// locked by another claimer is skipped, never waited on.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM outbox_events
            WHERE status = 'pending'
              AND retry_count <= max_retries
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY next_retry_at ASC NULLS FIRST, created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if event_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let events = sqlx::query_as::<_, OutboxEvent>(&format!(
            r#"
            UPDATE outbox_events
            SET status = 'processing', last_attempt_at = $2
            WHERE id = ANY($1)
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(&event_ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(events)
    }

    /// Marks an event as delivered to every active subscriber.
    ///
    /// Terminal state. Retry bookkeeping is left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(&self, event_id: OutboxEventId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'sent', processed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an event terminal because its store has no active webhook.
    ///
    /// A configuration condition, not a fault: never retried.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_unregistered(
        &self,
        event_id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'webhook_not_registered', processed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(event_id.0)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Returns a failed event to `pending` with its next retry scheduled.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending', retry_count = $2, next_retry_at = $3, last_error = $4
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

    /// Dead-letters an event after its retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', retry_count = $2, processed_at = $3, last_error = $4
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

    /// Reclaims rows stuck in `processing` since before `stale_before`.
    ///
    /// A crash between the claim checkpoint and the finalize write leaves a
    /// row in `processing` forever; rows whose claim is older than the
    /// stale threshold are returned to `pending` for the next cycle.
    /// Returns the number of rows reclaimed.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reclaim_stuck(&self, stale_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending'
            WHERE status = 'processing'
              AND last_attempt_at IS NOT NULL
              AND last_attempt_at < $1
            "#,
        )
        .bind(stale_before)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Loads a single event by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, event_id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        let event = sqlx::query_as::<_, OutboxEvent>(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_events
            WHERE id = $1
            "#
        ))
        .bind(event_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Counts events currently in the given status.
    ///
    /// Used by tests and operational checks.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: OutboxStatus) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM outbox_events WHERE status = $1
            "#,
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }
}
