//! Core domain layer of the marketplace service.
//!
//! Defines the order aggregate with its status state machine, the outbox
//! event record that makes state changes observable, webhook subscriptions,
//! and the repository layer that persists all three. The outbox invariant
//! lives here: an order mutation and its outbox event are written in one
//! transaction, so the event queue can never diverge from committed state.

pub mod error;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::{
    Order, OrderId, OrderItem, OrderStatus, OutboxEvent, OutboxEventId, OutboxStatus, Webhook,
    WebhookId,
};
pub use storage::Storage;
