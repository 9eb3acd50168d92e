//! Outbox processor: claim, dispatch, finalize.
//!
//! One `run_cycle` call is one unit of scheduled work. The processor holds
//! no timing logic of its own; `OutboxWorker` (or any external scheduler)
//! invokes it on an interval. Multiple processors may run concurrently in
//! one process or across processes; the storage layer's locking claim is
//! the only mutual exclusion they need.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use market_core::models::OutboxEvent;
use ordercast_common::{BackoffPolicy, Clock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    client::DispatchGateway,
    error::{DispatchError, Result},
    storage::OutboxStorage,
};

/// Configuration for the outbox processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum rows claimed per cycle.
    pub batch_size: usize,
    /// Backoff shape for transient failures.
    pub backoff: BackoffPolicy,
    /// Age after which a `processing` claim counts as abandoned.
    pub stale_claim_after: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            backoff: BackoffPolicy::default(),
            stale_claim_after: Duration::from_secs(300),
        }
    }
}

/// Counters for one processor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Rows claimed this cycle.
    pub claimed: usize,
    /// Rows delivered to all subscribers.
    pub sent: usize,
    /// Rows terminal because their store has no subscriber.
    pub unregistered: usize,
    /// Rows returned to pending with a scheduled retry.
    pub retried: usize,
    /// Rows dead-lettered this cycle.
    pub dead_lettered: usize,
    /// Stale processing rows reclaimed before claiming.
    pub reclaimed: u64,
}

/// Polling worker core that drains the outbox table.
pub struct OutboxProcessor {
    storage: Arc<dyn OutboxStorage>,
    gateway: Arc<DispatchGateway>,
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
}

impl OutboxProcessor {
    /// Creates a processor over the given storage port and gateway.
    pub fn new(
        storage: Arc<dyn OutboxStorage>,
        gateway: Arc<DispatchGateway>,
        config: ProcessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, gateway, config, clock }
    }

    /// Runs one claim-dispatch-finalize cycle.
    ///
    /// Stale `processing` claims are reclaimed first, then a batch of due
    /// pending rows is claimed and each row is driven to its next state.
    /// Failures of individual rows never abort the cycle.
    ///
    /// # Errors
    ///
    /// Returns error only if the claim itself fails; per-row failures are
    /// absorbed into retry bookkeeping.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let now = self.clock.now();
        let mut stats = CycleStats::default();

        let stale_before = now
            - chrono::Duration::from_std(self.config.stale_claim_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        match self.storage.reclaim_stuck(stale_before).await {
            Ok(reclaimed) => {
                stats.reclaimed = reclaimed;
                if reclaimed > 0 {
                    warn!(reclaimed, "reclaimed stale processing rows");
                }
            },
            Err(e) => {
                // Claiming can proceed without the reclaim; the stuck rows
                // get another chance next cycle.
                error!(error = %e, "failed to reclaim stale processing rows");
            },
        }

        let events = self
            .storage
            .claim_pending(self.config.batch_size, now)
            .await
            .map_err(|e| DispatchError::database(format!("failed to claim outbox events: {e}")))?;

        stats.claimed = events.len();
        if !events.is_empty() {
            info!(claimed = events.len(), "processing outbox events");
        }

        for event in events {
            self.process_event(&event, &mut stats).await;
        }

        Ok(stats)
    }

    /// Drives one claimed event to its next state.
    async fn process_event(&self, event: &OutboxEvent, stats: &mut CycleStats) {
        match self.dispatch(event).await {
            Ok(()) => {
                let now = self.clock.now();
                if let Err(e) = self.storage.mark_sent(event.id, now).await {
                    // The dispatch went out but the finalize write failed.
                    // Leave the row in processing; the stale-claim reclaim
                    // re-runs it and the receiver deduplicates.
                    error!(event_id = %event.id, error = %e, "failed to finalize sent event");
                    return;
                }
                stats.sent += 1;
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "outbox event dispatched"
                );
            },
            Err(error) if error.is_permanent() => {
                let now = self.clock.now();
                warn!(
                    event_id = %event.id,
                    error = %error,
                    "no active webhook for event, marking terminal"
                );
                if let Err(e) = self.storage.mark_unregistered(event.id, now).await {
                    error!(event_id = %event.id, error = %e, "failed to finalize unregistered event");
                    return;
                }
                stats.unregistered += 1;
            },
            Err(error) => self.handle_transient_failure(event, &error, stats).await,
        }
    }

    /// Resolves subscribers and pushes the payload to each of them.
    async fn dispatch(&self, event: &OutboxEvent) -> Result<()> {
        let webhooks =
            self.storage.find_active_webhooks(event.aggregate_id).await.map_err(|e| {
                DispatchError::database(format!("failed to resolve webhooks: {e}"))
            })?;

        if webhooks.is_empty() {
            return Err(DispatchError::webhook_not_registered(event.aggregate_id.to_string()));
        }

        for webhook in &webhooks {
            self.gateway.send(&webhook.callback_url, &webhook.token, &event.payload.0).await?;
            debug!(
                event_id = %event.id,
                destination = %webhook.callback_url,
                "webhook sent"
            );
        }

        Ok(())
    }

    /// Applies retry bookkeeping after a transient failure.
    ///
    /// Below the retry ceiling the row returns to pending with an
    /// exponential-backoff-with-jitter schedule; at the ceiling it is
    /// dead-lettered with the last error preserved.
    async fn handle_transient_failure(
        &self,
        event: &OutboxEvent,
        error: &DispatchError,
        stats: &mut CycleStats,
    ) {
        let now = self.clock.now();
        let retry_count = event.retry_count + 1;
        let detail = error.to_string();

        if event.retry_count >= event.max_retries {
            error!(
                event_id = %event.id,
                retry_count = event.retry_count,
                error = %error,
                "outbox event failed permanently, max retries reached"
            );
            if let Err(e) = self.storage.mark_failed(event.id, retry_count, now, detail).await {
                error!(event_id = %event.id, error = %e, "failed to dead-letter event");
                return;
            }
            stats.dead_lettered += 1;
        } else {
            let next_retry_at = self.next_retry_at(now, event.retry_count);
            warn!(
                event_id = %event.id,
                retry_count,
                next_retry_at = %next_retry_at,
                error = %error,
                "outbox dispatch failed, retry scheduled"
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
