//! Outbox delivery engine for the marketplace service.
//!
//! Turns committed outbox rows into webhook pushes with at-least-once
//! semantics. Workers claim pending rows from PostgreSQL using `FOR UPDATE
//! SKIP LOCKED` for lock-free distribution, dispatch them through a
//! circuit-breaker-guarded HTTP gateway, and manage the retry, backoff, and
//! terminal-state bookkeeping:
//!
//! 1. **Reclaim** - rows stuck in `processing` past the stale threshold
//!    return to `pending`
//! 2. **Claim** - a batch of due pending rows is checkpointed to
//!    `processing`
//! 3. **Dispatch** - the aggregate snapshot is POSTed to every active
//!    subscriber of the owning store
//! 4. **Finalize** - `sent`, `webhook_not_registered`, a scheduled retry,
//!    or a dead-lettered `failed`

pub mod client;
pub mod error;
pub mod processor;
pub mod storage;
pub mod worker;

pub use client::{DispatchConfig, DispatchGateway};
pub use error::{DispatchError, Result};
pub use processor::{CycleStats, OutboxProcessor, ProcessorConfig};
pub use worker::OutboxWorker;

/// Default rows claimed per processor cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default retry ceiling before a row is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i32 = 3;
