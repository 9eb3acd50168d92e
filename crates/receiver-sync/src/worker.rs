//! Polling worker loop driving the snapshot processor.

use std::{sync::Arc, time::Duration};

use ordercast_common::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::processor::SnapshotProcessor;

/// Interval scheduler for a `SnapshotProcessor`.
pub struct SnapshotWorker {
    id: usize,
    processor: Arc<SnapshotProcessor>,
    poll_interval: Duration,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl SnapshotWorker {
    /// Creates a worker that cycles the processor every `poll_interval`.
    pub fn new(
        id: usize,
        processor: Arc<SnapshotProcessor>,
        poll_interval: Duration,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, processor, poll_interval, cancellation_token, clock }
    }

    /// Runs cycles until the cancellation token fires.
    pub async fn run(&self) {
        info!(worker_id = self.id, "snapshot worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.processor.run_cycle().await {
                error!(worker_id = self.id, error = %e, "snapshot cycle failed");
            }

            tokio::select! {
                () = self.clock.sleep(self.poll_interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!(worker_id = self.id, "snapshot worker stopped");
    }

    /// Spawns `count` workers sharing one processor.
    pub fn spawn(
        count: usize,
        processor: Arc<SnapshotProcessor>,
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
