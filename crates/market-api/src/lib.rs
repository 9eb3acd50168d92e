//! HTTP surface of the marketplace service.
//!
//! Routes order and webhook CRUD onto the domain layer. The interesting
//! engineering lives below in market-core and market-delivery; this crate
//! is plumbing: validation, error mapping, configuration, and server
//! lifecycle.

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server, AppState};
