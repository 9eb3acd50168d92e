//! Request handlers for the marketplace HTTP API.

pub mod health;
pub mod orders;
pub mod webhooks;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub use health::health_check;
pub use orders::{create_order, get_order, update_order_status};
pub use webhooks::{create_webhook, deactivate_webhook};

/// Error body shape shared by both services.
///
/// The receiver's marketplace gateway keys on `type` to tell a permanent
/// `ORDER_NOT_FOUND` apart from transient failures, so this contract is
/// load-bearing.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable description.
    pub message: String,
}

impl ApiError {
    /// Builds an error response with the given status.
    pub fn response(
        status: StatusCode,
        error_type: &str,
        message: impl Into<String>,
    ) -> axum::response::Response {
        (status, Json(Self { error_type: error_type.to_string(), message: message.into() }))
            .into_response()
    }
}

/// Error type for a missing order. Part of the cross-service contract.
pub const ERROR_ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";

/// Error type for a rejected state-machine transition.
pub const ERROR_INVALID_STATUS_TRANSITION: &str = "INVALID_STATUS_TRANSITION";

/// Error type for malformed request payloads.
pub const ERROR_VALIDATION: &str = "VALIDATION_ERROR";

/// Error type for a missing webhook subscription.
pub const ERROR_WEBHOOK_NOT_FOUND: &str = "WEBHOOK_NOT_FOUND";

/// Error type for unexpected internal failures.
pub const ERROR_INTERNAL: &str = "INTERNAL_ERROR";
