//! Error types for outbox dispatch operations.
//!
//! The outbox processor only needs one distinction out of this taxonomy:
//! `WebhookNotRegistered` is a configuration condition and terminal;
//! everything else (network, timeout, HTTP error, open breaker, storage)
//! is transient and feeds the retry bookkeeping. Callers never need to
//! tell breaker-open apart from a plain timeout.

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions raised while dispatching outbox events.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_secs}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_secs: u64,
    },

    /// Destination answered with a non-2xx status.
    #[error("destination returned HTTP {status}")]
    HttpStatus {
        /// HTTP status code returned.
        status: u16,
    },

    /// Circuit breaker is open for the destination.
    #[error("circuit breaker open for {destination}")]
    CircuitOpen {
        /// Destination whose circuit is open.
        destination: String,
    },

    /// No active webhook subscription covers the owning store.
    #[error("no active webhook registered for store {store_id}")]
    WebhookNotRegistered {
        /// Store that has no subscriber.
        store_id: String,
    },

    /// Payload could not be serialized for dispatch.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Storage operation failed during processing.
    #[error("database error: {message}")]
    Database {
        /// Database error message.
        message: String,
    },

    /// Invalid gateway configuration.
    #[error("invalid dispatch configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl DispatchError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::Timeout { timeout_secs }
    }

    /// Creates an HTTP status error.
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus { status }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(destination: impl Into<String>) -> Self {
        Self::CircuitOpen { destination: destination.into() }
    }

    /// Creates a webhook-not-registered error.
    pub fn webhook_not_registered(store_id: impl Into<String>) -> Self {
        Self::WebhookNotRegistered { store_id: store_id.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the failure is a permanent configuration condition.
    ///
    /// Permanent failures are recorded terminally and never retried;
    /// everything else re-enters the backoff machinery.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::WebhookNotRegistered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_webhook_is_permanent() {
        assert!(DispatchError::webhook_not_registered("store-1").is_permanent());

        assert!(!DispatchError::network("connection refused").is_permanent());
        assert!(!DispatchError::timeout(10).is_permanent());
        assert!(!DispatchError::http_status(500).is_permanent());
        assert!(!DispatchError::http_status(404).is_permanent());
        assert!(!DispatchError::circuit_open("https://example.com").is_permanent());
        assert!(!DispatchError::database("connection lost").is_permanent());
        assert!(!DispatchError::serialization("bad payload").is_permanent());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DispatchError::timeout(10).to_string(), "request timeout after 10s");
        assert_eq!(
            DispatchError::circuit_open("https://example.com/hook").to_string(),
            "circuit breaker open for https://example.com/hook"
        );
    }
}
