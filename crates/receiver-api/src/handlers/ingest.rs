//! Event ingestion with idempotent consumption.
//!
//! Under at-least-once delivery, duplicate pushes from producer retries
//! are expected and harmless: the first push creates the event, every
//! later push with the same idempotency key is acknowledged without
//! creating or mutating anything. The storage layer enforces this with a
//! unique key, so two racing deliveries still produce exactly one row.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use receiver_core::Event;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::server::AppState;

/// Inbound event push from the marketplace.
#[derive(Debug, Deserialize)]
pub struct EventWebhookRequest {
    /// Caller-supplied duplicate-detection key.
    pub idempotency_key: String,
    /// Event type, e.g. `order.created`.
    pub event_type: String,
    /// Order identity on the marketplace side.
    pub order_id: String,
    /// Store that owns the order.
    pub store_id: String,
    /// When the producer raised the event.
    pub created_at: DateTime<Utc>,
}

impl EventWebhookRequest {
    /// Validates the push and builds the domain event.
    pub fn into_event(self) -> Result<Event, String> {
        for (field, value) in [
            ("idempotency_key", &self.idempotency_key),
            ("event_type", &self.event_type),
            ("order_id", &self.order_id),
            ("store_id", &self.store_id),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} is required"));
            }
        }

        Ok(Event::new(
            self.idempotency_key,
            self.event_type,
            self.order_id,
            self.store_id,
            self.created_at,
        ))
    }
}

/// Error body for rejected pushes.
#[derive(Debug, Serialize)]
struct IngestError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Ingests an event push.
///
/// Missing or blank required fields are rejected with 400 and nothing is
/// persisted or retried. A duplicate idempotency key is acknowledged with
/// the same empty 204 as a fresh event.
#[instrument(
    name = "receive_event",
    skip(state, request),
    fields(idempotency_key = %request.idempotency_key, event_type = %request.event_type)
)]
pub async fn receive_event(
    State(state): State<AppState>,
    Json(request): Json<EventWebhookRequest>,
) -> Response {
    let event = match request.into_event() {
        Ok(event) => event,
        Err(message) => {
            warn!(%message, "rejected event push");
            return (
                StatusCode::BAD_REQUEST,
                Json(IngestError { error_type: "VALIDATION_ERROR".to_string(), message }),
            )
                .into_response();
        },
    };

    match state.events.insert_if_absent(&event).await {
        Ok(true) => {
            info!(
                event_id = %event.id,
                order_id = %event.order_id,
                "event recorded for snapshot reconciliation"
            );
            StatusCode::NO_CONTENT.into_response()
        },
        Ok(false) => {
            warn!(
                idempotency_key = %event.idempotency_key,
                "duplicate event push acknowledged"
            );
            StatusCode::NO_CONTENT.into_response()
        },
        Err(e) => {
            error!(error = %e, "failed to persist event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(IngestError {
                    error_type: "INTERNAL_ERROR".to_string(),
                    message: "failed to persist event".to_string(),
                }),
            )
                .into_response()
        },
    }
}
