//! Snapshot reconciliation processor: claim, fetch, finalize.
//!
//! Mirrors the marketplace outbox processor over ingested event rows. One
//! `run_cycle` call claims a batch of due `snapshot_pending` events, pulls
//! the authoritative order for each through the marketplace gateway, and
//! finalizes: snapshot stored, a retry scheduled, or the event failed.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use ordercast_common::{BackoffPolicy, Clock};
use receiver_core::models::Event;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    error::{Result, SyncError},
    gateway::MarketplaceGateway,
    storage::EventStorage,
};

/// Configuration for the snapshot processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotProcessorConfig {
    /// Maximum rows claimed per cycle.
    pub batch_size: usize,
    /// Retry ceiling before an event is marked failed.
    pub max_retries: i32,
    /// Backoff shape for transient failures.
    pub backoff: BackoffPolicy,
    /// How long a claim hides a row from concurrent claimers.
    pub claim_lease: Duration,
}

impl Default for SnapshotProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            claim_lease: Duration::from_secs(300),
        }
    }
}

/// Counters for one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotCycleStats {
    /// Rows claimed this cycle.
    pub claimed: usize,
    /// Snapshots materialized.
    pub processed: usize,
    /// Rows rescheduled with a retry.
    pub retried: usize,
    /// Rows failed this cycle, permanently or by exhaustion.
    pub failed: usize,
}

/// Polling worker core that reconciles ingested events.
pub struct SnapshotProcessor {
    storage: Arc<dyn EventStorage>,
    gateway: Arc<MarketplaceGateway>,
    config: SnapshotProcessorConfig,
    clock: Arc<dyn Clock>,
}

impl SnapshotProcessor {
    /// Creates a processor over the given storage port and gateway.
    pub fn new(
        storage: Arc<dyn EventStorage>,
        gateway: Arc<MarketplaceGateway>,
        config: SnapshotProcessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, gateway, config, clock }
    }

    /// Runs one claim-fetch-finalize cycle.
    ///
    /// # Errors
    ///
    /// Returns error only if the claim itself fails; per-row failures are
    /// absorbed into retry bookkeeping.
    pub async fn run_cycle(&self) -> Result<SnapshotCycleStats> {
        let now = self.clock.now();
        let mut stats = SnapshotCycleStats::default();

        let events = self
            .storage
            .claim_pending(self.config.batch_size, self.config.max_retries, now, self.config.claim_lease)
            .await
            .map_err(|e| SyncError::database(format!("failed to claim events: {e}")))?;

        stats.claimed = events.len();
        if !events.is_empty() {
            info!(claimed = events.len(), "processing snapshot events");
        }

        for event in events {
            self.process_event(&event, &mut stats).await;
        }

        Ok(stats)
    }

    /// Drives one claimed event to its next state.
    async fn process_event(&self, event: &Event, stats: &mut SnapshotCycleStats) {
        match self.gateway.find_order(&event.order_id).await {
            Ok(snapshot) => {
                let now = self.clock.now();
                if let Err(e) = self.storage.mark_processed(event.id, snapshot, now).await {
                    // The row keeps its claim lease; it re-runs after the
                    // lease expires and the fetch repeats harmlessly.
                    error!(event_id = %event.id, error = %e, "failed to finalize snapshot");
                    return;
                }
                stats.processed += 1;
                info!(
                    event_id = %event.id,
                    idempotency_key = %event.idempotency_key,
                    "snapshot event processed"
                );
            },
            Err(error) if error.is_permanent() => {
                let now = self.clock.now();
                warn!(
                    event_id = %event.id,
                    order_id = %event.order_id,
                    error = %error,
                    "order permanently missing upstream, failing event"
                );
                if let Err(e) = self
                    .storage
                    .mark_failed(event.id, event.retry_count, now, error.to_string())
                    .await
                {
                    error!(event_id = %event.id, error = %e, "failed to finalize missing order");
                    return;
                }
                stats.failed += 1;
            },
            Err(error) => self.handle_transient_failure(event, &error, stats).await,
        }
    }

    /// Applies retry bookkeeping after a transient failure.
    async fn handle_transient_failure(
        &self,
        event: &Event,
        error: &SyncError,
        stats: &mut SnapshotCycleStats,
    ) {
        let now = self.clock.now();
        let retry_count = event.retry_count + 1;
        let detail = error.to_string();

        if event.retry_count >= self.config.max_retries {
            error!(
                event_id = %event.id,
                retry_count = event.retry_count,
                error = %error,
                "snapshot event failed permanently, max retries reached"
            );
            if let Err(e) = self.storage.mark_failed(event.id, retry_count, now, detail).await {
                error!(event_id = %event.id, error = %e, "failed to dead-letter event");
                return;
            }
            stats.failed += 1;
        } else {
            let next_retry_at = self.next_retry_at(now, event.retry_count);
            warn!(
                event_id = %event.id,
                retry_count,
                next_retry_at = %next_retry_at,
                error = %error,
                "snapshot fetch failed, retry scheduled"
            );
            if let Err(e) =
                self.storage.schedule_retry(event.id, retry_count, next_retry_at, detail).await
            {
                error!(event_id = %event.id, error = %e, "failed to schedule retry");
                return;
            }
            stats.retried += 1;
        }
    }

    fn next_retry_at(&self, now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
        self.config.backoff.next_retry_at(now, u32::try_from(retry_count).unwrap_or(0))
    }
}
