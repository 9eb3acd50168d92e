//! Shared reliability primitives for the ordercast services.
//!
//! Both the marketplace outbox pipeline and the receiver snapshot pipeline
//! are built from the same parts: a clock abstraction for testable timing,
//! an exponential backoff policy with bounded jitter, and a per-destination
//! circuit breaker. This crate holds those parts so the two services stay
//! behaviorally identical where the design requires it.

pub mod backoff;
pub mod circuit;
pub mod time;

pub use backoff::BackoffPolicy;
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use time::{Clock, RealClock, TestClock};
