//! Storage port for the outbox processor.
//!
//! Abstracts the database operations the processor needs so delivery
//! logic, retry policy, and error handling can be tested without Postgres.
//! Production uses `PostgresOutboxStorage` over the market-core
//! repositories; tests use the in-memory mock below.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use market_core::{
    error::Result,
    models::{OutboxEvent, OutboxEventId, Webhook},
};
use uuid::Uuid;

/// Storage operations required by the outbox processor.
pub trait OutboxStorage: Send + Sync + 'static {
    /// Returns stale `processing` rows to `pending`.
    ///
    /// Rows claimed before `stale_before` are considered abandoned by a
    /// crashed worker and become claimable again.
    fn reclaim_stuck(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Claims due pending events, checkpointing them to `processing`.
    ///
    /// Production uses `FOR UPDATE SKIP LOCKED` so concurrent claimers
    /// skip each other's rows instead of blocking.
    fn claim_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>>> + Send + '_>>;

    /// Active webhook subscriptions for the store owning the aggregate.
    fn find_active_webhooks(
        &self,
        aggregate_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Webhook>>> + Send + '_>>;

    /// Marks an event delivered to all subscribers. Terminal.
    fn mark_sent(
        &self,
        event_id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks an event terminal because no subscriber covers its store.
    fn mark_unregistered(
        &self,
        event_id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns an event to `pending` with its next retry scheduled.
    fn schedule_retry(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Dead-letters an event after exhausted retries. Terminal.
    fn mark_failed(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads an event by id, for verification and monitoring.
    fn find_event(
        &self,
        event_id: OutboxEventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxEvent>>> + Send + '_>>;
}

/// Production storage implementation over the market-core repositories.
pub struct PostgresOutboxStorage {
    storage: Arc<market_core::Storage>,
}

impl PostgresOutboxStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<market_core::Storage>) -> Self {
        Self { storage }
    }
}

impl OutboxStorage for PostgresOutboxStorage {
    fn reclaim_stuck(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox_events.reclaim_stuck(stale_before).await })
    }

    fn claim_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox_events.claim_pending(batch_size, now).await })
    }

    fn find_active_webhooks(
        &self,
        aggregate_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Webhook>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            // Resolve the owning store first; an event whose aggregate has
            // vanished behaves like an unsubscribed store.
            let Some(order) =
                storage.orders.find_by_id(market_core::OrderId(aggregate_id)).await?
            else {
                return Ok(Vec::new());
            };
            storage.webhooks.find_active_by_store(&order.store_id).await
        })
    }

    fn mark_sent(
        &self,
        event_id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox_events.mark_sent(event_id, now).await })
    }

    fn mark_unregistered(
        &self,
        event_id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox_events.mark_unregistered(event_id, now).await })
    }

    fn schedule_retry(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .outbox_events
                .schedule_retry(event_id, retry_count, next_retry_at, &last_error)
                .await
        })
    }

    fn mark_failed(
        &self,
        event_id: OutboxEventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.outbox_events.mark_failed(event_id, retry_count, now, &last_error).await
        })
    }

    fn find_event(
        &self,
        event_id: OutboxEventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxEvent>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox_events.find_by_id(event_id).await })
    }
}

pub mod mock {
    //! In-memory storage for testing processor logic without a database.

    use std::collections::HashMap;

    use market_core::models::OutboxStatus;
    use tokio::sync::RwLock;

    use super::*;

    /// Mock outbox storage with deterministic, inspectable state.
    pub struct MockOutboxStorage {
        events: Arc<RwLock<HashMap<OutboxEventId, OutboxEvent>>>,
        webhooks: Arc<RwLock<HashMap<Uuid, Vec<Webhook>>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockOutboxStorage {
        /// Creates an empty mock storage.
        pub fn new() -> Self {
            Self {
                events: Arc::new(RwLock::new(HashMap::new())),
                webhooks: Arc::new(RwLock::new(HashMap::new())),
                claim_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Seeds an outbox event.
        pub async fn add_event(&self, event: OutboxEvent) {
            self.events.write().await.insert(event.id, event);
        }

        /// Registers webhooks for an aggregate's store.
        pub async fn add_webhooks(&self, aggregate_id: Uuid, webhooks: Vec<Webhook>) {
            self.webhooks.write().await.insert(aggregate_id, webhooks);
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Snapshot of an event's current row.
        pub async fn event(&self, event_id: OutboxEventId) -> Option<OutboxEvent> {
            self.events.read().await.get(&event_id).cloned()
        }
    }

    impl Default for MockOutboxStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl OutboxStorage for MockOutboxStorage {
        fn reclaim_stuck(
            &self,
            stale_before: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                let mut reclaimed = 0;
                for event in events.values_mut() {
                    let stale = event.status == OutboxStatus::Processing
                        && event.last_attempt_at.is_some_and(|at| at < stale_before);
                    if stale {
                        event.status = OutboxStatus::Pending;
                        reclaimed += 1;
                    }
                }
                Ok(reclaimed)
            })
        }

        fn claim_pending(
            &self,
            batch_size: usize,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>>> + Send + '_>> {
            let events = self.events.clone();
            let claim_error = self.claim_error.clone();
            Box::pin(async move {
                if let Some(error) = claim_error.write().await.take() {
                    return Err(market_core::CoreError::Database(error));
                }

                let mut events = events.write().await;
                let mut due: Vec<&OutboxEvent> = events
                    .values()
                    .filter(|e| {
                        e.status == OutboxStatus::Pending
                            && e.retry_count <= e.max_retries
                            && e.next_retry_at.is_none_or(|at| at <= now)
                    })
                    .collect();
                // Same ordering as the SQL claim: next_retry_at nulls
                // first, then creation order.
                due.sort_by_key(|e| (e.next_retry_at.is_some(), e.next_retry_at, e.created_at));
                let claimed_ids: Vec<OutboxEventId> =
                    due.into_iter().take(batch_size).map(|e| e.id).collect();

                let mut claimed = Vec::with_capacity(claimed_ids.len());
                for id in claimed_ids {
                    if let Some(event) = events.get_mut(&id) {
                        event.status = OutboxStatus::Processing;
                        event.last_attempt_at = Some(now);
                        claimed.push(event.clone());
                    }
                }
                Ok(claimed)
            })
        }

        fn find_active_webhooks(
            &self,
            aggregate_id: Uuid,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Webhook>>> + Send + '_>> {
            let webhooks = self.webhooks.clone();
            Box::pin(async move {
                let active = webhooks
                    .read()
                    .await
                    .get(&aggregate_id)
                    .map(|hooks| hooks.iter().filter(|w| w.active).cloned().collect())
                    .unwrap_or_default();
                Ok(active)
            })
        }

        fn mark_sent(
            &self,
            event_id: OutboxEventId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = OutboxStatus::Sent;
                    event.processed_at = Some(now);
                }
                Ok(())
            })
        }

        fn mark_unregistered(
            &self,
            event_id: OutboxEventId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = OutboxStatus::WebhookNotRegistered;
                    event.processed_at = Some(now);
                }
                Ok(())
            })
        }

        fn schedule_retry(
            &self,
            event_id: OutboxEventId,
            retry_count: i32,
            next_retry_at: DateTime<Utc>,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = OutboxStatus::Pending;
                    event.retry_count = retry_count;
                    event.next_retry_at = Some(next_retry_at);
                    event.last_error = Some(last_error);
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            event_id: OutboxEventId,
            retry_count: i32,
            now: DateTime<Utc>,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = OutboxStatus::Failed;
                    event.retry_count = retry_count;
                    event.processed_at = Some(now);
                    event.last_error = Some(last_error);
                }
                Ok(())
            })
        }

        fn find_event(
            &self,
            event_id: OutboxEventId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxEvent>>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move { Ok(events.read().await.get(&event_id).cloned()) })
        }
    }
}
