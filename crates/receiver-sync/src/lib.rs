//! Snapshot reconciliation engine for the receiver service.
//!
//! Structurally mirrors the marketplace outbox engine over ingested event
//! rows: claim due `snapshot_pending` events with a locking read, pull the
//! authoritative order from the marketplace through a circuit-breaker
//! guarded client, and finalize with the same exponential-backoff retry
//! bookkeeping. The one asymmetry is the permanent not-found: an order the
//! marketplace no longer knows is failed immediately instead of retried.

pub mod error;
pub mod gateway;
pub mod processor;
pub mod storage;
pub mod worker;

pub use error::{Result, SyncError};
pub use gateway::{GatewayConfig, MarketplaceGateway};
pub use processor::{SnapshotCycleStats, SnapshotProcessor, SnapshotProcessorConfig};
pub use worker::SnapshotWorker;
