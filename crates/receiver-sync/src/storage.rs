//! Storage port for the snapshot reconciliation processor.
//!
//! Same pattern as the producer's outbox port: a trait over the handful of
//! operations the processor needs, a Postgres implementation over the
//! receiver-core repository, and an in-memory mock for tests.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use receiver_core::{
    error::Result,
    models::{Event, EventId},
};

/// Storage operations required by the snapshot processor.
pub trait EventStorage: Send + Sync + 'static {
    /// Claims due pending events under a lease.
    ///
    /// Claimed rows have `next_retry_at` pushed past `now + lease` so
    /// concurrent claimers skip them; an abandoned claim expires on its
    /// own when the lease runs out.
    fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>>> + Send + '_>>;

    /// Stores the pulled snapshot and marks the event processed. Terminal.
    fn mark_processed(
        &self,
        event_id: EventId,
        snapshot: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Reschedules a failed reconciliation attempt.
    fn schedule_retry(
        &self,
        event_id: EventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks an event permanently failed. Terminal.
    fn mark_failed(
        &self,
        event_id: EventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production storage implementation over the receiver-core repository.
pub struct PostgresEventStorage {
    repository: Arc<receiver_core::Repository>,
}

impl PostgresEventStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(repository: Arc<receiver_core::Repository>) -> Self {
        Self { repository }
    }
}

impl EventStorage for PostgresEventStorage {
    fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>>> + Send + '_>> {
        let repository = self.repository.clone();
        Box::pin(
            async move { repository.claim_pending(batch_size, max_retries, now, lease).await },
        )
    }

    fn mark_processed(
        &self,
        event_id: EventId,
        snapshot: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let repository = self.repository.clone();
        Box::pin(async move { repository.mark_processed(event_id, &snapshot, now).await })
    }

    fn schedule_retry(
        &self,
        event_id: EventId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let repository = self.repository.clone();
        Box::pin(async move {
            repository.schedule_retry(event_id, retry_count, next_retry_at, &last_error).await
        })
    }

    fn mark_failed(
        &self,
        event_id: EventId,
        retry_count: i32,
        now: DateTime<Utc>,
        last_error: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let repository = self.repository.clone();
        Box::pin(async move {
            repository.mark_failed(event_id, retry_count, now, &last_error).await
        })
    }
}

pub mod mock {
    //! In-memory storage for testing reconciliation without a database.

    use std::collections::HashMap;

    use receiver_core::models::EventStatus;
    use tokio::sync::RwLock;

    use super::*;

    /// Mock event storage with deterministic, inspectable state.
    pub struct MockEventStorage {
        events: Arc<RwLock<HashMap<EventId, Event>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockEventStorage {
        /// Creates an empty mock storage.
        pub fn new() -> Self {
            Self {
                events: Arc::new(RwLock::new(HashMap::new())),
                claim_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Seeds an ingested event.
        pub async fn add_event(&self, event: Event) {
            self.events.write().await.insert(event.id, event);
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Snapshot of an event's current row.
        pub async fn event(&self, event_id: EventId) -> Option<Event> {
            self.events.read().await.get(&event_id).cloned()
        }
    }

    impl Default for MockEventStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EventStorage for MockEventStorage {
        fn claim_pending(
            &self,
            batch_size: usize,
            max_retries: i32,
            now: DateTime<Utc>,
            lease: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>>> + Send + '_>> {
            let events = self.events.clone();
            let claim_error = self.claim_error.clone();
            Box::pin(async move {
                if let Some(error) = claim_error.write().await.take() {
                    return Err(receiver_core::CoreError::Database(error));
                }

                let mut events = events.write().await;
                let mut due: Vec<&Event> = events
                    .values()
                    .filter(|e| {
                        e.status == EventStatus::SnapshotPending
                            && e.retry_count <= max_retries
                            && e.next_retry_at.is_none_or(|at| at <= now)
                    })
                    .collect();
                due.sort_by_key(|e| (e.next_retry_at.is_some(), e.next_retry_at, e.received_at));
                let claimed_ids: Vec<EventId> =
                    due.into_iter().take(batch_size).map(|e| e.id).collect();

                let lease_until = now
                    + chrono::Duration::from_std(lease)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                let mut claimed = Vec::with_capacity(claimed_ids.len());
                for id in claimed_ids {
                    if let Some(event) = events.get_mut(&id) {
                        event.next_retry_at = Some(lease_until);
                        claimed.push(event.clone());
                    }
                }
                Ok(claimed)
            })
        }

        fn mark_processed(
            &self,
            event_id: EventId,
            snapshot: serde_json::Value,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = EventStatus::SnapshotProcessed;
                    event.snapshot = Some(sqlx::types::Json(snapshot));
                    event.processed_at = Some(now);
                }
                Ok(())
            })
        }

        fn schedule_retry(
            &self,
            event_id: EventId,
            retry_count: i32,
            next_retry_at: DateTime<Utc>,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.retry_count = retry_count;
                    event.next_retry_at = Some(next_retry_at);
                    event.last_error = Some(last_error);
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            event_id: EventId,
            retry_count: i32,
            now: DateTime<Utc>,
            last_error: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&event_id) {
                    event.status = EventStatus::SnapshotFailed;
                    event.retry_count = retry_count;
                    event.processed_at = Some(now);
                    event.last_error = Some(last_error);
                }
                Ok(())
            })
        }
    }
}
