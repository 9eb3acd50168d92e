//! Error types for snapshot reconciliation.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error conditions raised while pulling authoritative order state.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The marketplace does not know the order. Permanent.
    #[error("order {order_id} not found on marketplace")]
    OrderNotFound {
        /// Order identity that could not be resolved.
        order_id: String,
    },

    /// The marketplace is unreachable behind an open circuit.
    #[error("marketplace service unavailable: {message}")]
    ServiceUnavailable {
        /// Description of the rejection.
        message: String,
    },

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

    /// Marketplace answered with an unexpected status.
    #[error("marketplace returned HTTP {status}")]
    HttpStatus {
        /// HTTP status code returned.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("failed to decode marketplace response: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },

    /// Storage operation failed during processing.
    #[error("database error: {message}")]
    Database {
        /// Database error message.
        message: String,
    },

    /// Invalid gateway configuration.
    #[error("invalid gateway configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl SyncError {
    /// Creates an order-not-found error.
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound { order_id: order_id.into() }
    }

    /// Creates a service-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }

    /// Creates a network error.
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

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether the failure can never succeed on retry.
    ///
    /// Only the upstream not-found is permanent; the processor fails such
    /// events immediately instead of burning retries on them.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::OrderNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_permanent() {
        assert!(SyncError::order_not_found("order-1").is_permanent());

        assert!(!SyncError::unavailable("circuit open").is_permanent());
        assert!(!SyncError::network("connection refused").is_permanent());
        assert!(!SyncError::timeout(10).is_permanent());
        assert!(!SyncError::http_status(503).is_permanent());
        assert!(!SyncError::decode("bad json").is_permanent());
        assert!(!SyncError::database("connection lost").is_permanent());
    }
}
