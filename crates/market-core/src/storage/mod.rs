//! Repository layer for marketplace persistence.
//!
//! One repository per table, aggregated behind `Storage`. All database
//! access goes through these repositories; no SQL elsewhere. Cross-table
//! transactional operations (order mutation + outbox append) live on
//! `Storage` itself so the write-ahead invariant has a single home.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod orders;
pub mod outbox_events;
pub mod webhooks;

use crate::{
    error::Result,
    models::{Order, OrderStatus, OutboxEvent},
};

/// Container for all marketplace repositories.
#[derive(Clone)]
pub struct Storage {
    /// Repository for order aggregates.
    pub orders: Arc<orders::Repository>,

    /// Repository for outbox event rows.
    pub outbox_events: Arc<outbox_events::Repository>,

    /// Repository for webhook subscriptions.
    pub webhooks: Arc<webhooks::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a storage instance sharing one connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            orders: Arc::new(orders::Repository::new(pool.clone())),
            outbox_events: Arc::new(outbox_events::Repository::new(pool.clone())),
            webhooks: Arc::new(webhooks::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Persists an order and its outbox event atomically.
    ///
    /// The outbox invariant: no committed mutation without its queued
    /// event, no queued event without its committed mutation. Both rows
    /// ride the same transaction.
    ///
    /// # Errors
    ///
    /// Returns error if either insert or the commit fails; nothing is
    /// persisted in that case.
    pub async fn create_order_with_event(&self, order: &Order, event: &OutboxEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        self.orders.create_in_tx(&mut tx, order).await?;
        self.outbox_events.create_in_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Applies a status transition and appends its outbox event atomically.
    ///
    /// # Errors
    ///
    /// Returns error if the update, insert, or commit fails.
    pub async fn update_order_status_with_event(
        &self,
        order: &Order,
        new_status: OrderStatus,
        updated_at: DateTime<Utc>,
        event: &OutboxEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        self.orders.update_status_in_tx(&mut tx, order.id, new_status, updated_at).await?;
        self.outbox_events.create_in_tx(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }
}
