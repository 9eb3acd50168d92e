//! Polling worker loop driving the outbox processor.
//!
//! The processor exposes no timing of its own; this worker is the external
//! scheduler that invokes `run_cycle` on an interval until cancelled.
//! Multiple workers may run against the same table; the locking claim
//! keeps them from stepping on each other.

use std::{sync::Arc, time::Duration};

use ordercast_common::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::processor::OutboxProcessor;

/// Interval scheduler for an `OutboxProcessor`.
pub struct OutboxWorker {
    id: usize,
    processor: Arc<OutboxProcessor>,
    poll_interval: Duration,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl OutboxWorker {
    /// Creates a worker that cycles the processor every `poll_interval`.
    pub fn new(
        id: usize,
        processor: Arc<OutboxProcessor>,
        poll_interval: Duration,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, processor, poll_interval, cancellation_token, clock }
    }

    /// Runs cycles until the cancellation token fires.
    pub async fn run(&self) {
        info!(worker_id = self.id, "outbox worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.processor.run_cycle().await {
                error!(worker_id = self.id, error = %e, "outbox cycle failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.poll_interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!(worker_id = self.id, "outbox worker stopped");
    }

    /// Spawns `count` workers sharing one processor.
    pub fn spawn(
        count: usize,
        processor: Arc<OutboxProcessor>,
        poll_interval: Duration,
        cancellation_token: &CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|id| {
                let worker = Self::new(
                    id,
                    processor.clone(),
                    poll_interval,
                    cancellation_token.clone(),
                    clock.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }
}
