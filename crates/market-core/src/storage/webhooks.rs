//! Repository for webhook subscription persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Webhook, WebhookId},
};

const WEBHOOK_COLUMNS: &str =
    "id, store_ids, callback_url, token, active, created_at, updated_at";

/// Repository for webhook subscription operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists a new webhook subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, webhook: &Webhook) -> Result<WebhookId> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, store_ids, callback_url, token, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(webhook.id.0)
        .bind(&webhook.store_ids)
        .bind(&webhook.callback_url)
        .bind(&webhook.token)
        .bind(webhook.active)
        .bind(webhook.created_at)
        .execute(&*self.pool)
        .await?;

        Ok(webhook.id)
    }

    /// Active subscriptions covering the given store.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_active_by_store(&self, store_id: &str) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(&format!(
            r#"
            SELECT {WEBHOOK_COLUMNS}
            FROM webhooks
            WHERE active AND $1 = ANY(store_ids)
            ORDER BY created_at
            "#
        ))
        .bind(store_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(webhooks)
    }

    /// Loads a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, webhook_id: WebhookId) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>(&format!(
            r#"
            SELECT {WEBHOOK_COLUMNS}
            FROM webhooks
            WHERE id = $1
            "#
        ))
        .bind(webhook_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(webhook)
    }

    /// Deactivates a subscription. The row itself is kept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no subscription has the given id.
    pub async fn deactivate(&self, webhook_id: WebhookId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhooks
            SET active = FALSE, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(webhook_id.0)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("webhook {webhook_id} not found")));
        }

        Ok(())
    }
}
