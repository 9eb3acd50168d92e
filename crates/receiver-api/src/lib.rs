//! HTTP surface of the receiver service.
//!
//! One ingestion endpoint accepting marketplace event pushes. Validation
//! failures are the only synchronous errors this service ever returns;
//! everything downstream is absorbed by the reconciliation pipeline.

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server, AppState};
