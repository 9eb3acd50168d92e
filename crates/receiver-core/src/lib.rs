//! Core domain layer of the receiver service.
//!
//! The receiver ingests order-event pushes from the marketplace, records
//! them once per idempotency key, and materializes authoritative order
//! snapshots through the reconciliation pipeline. This crate holds the
//! ingested event model and its repository.

pub mod error;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::{Event, EventId, EventStatus};
pub use storage::Repository;
