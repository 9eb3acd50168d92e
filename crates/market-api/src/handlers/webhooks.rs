//! Webhook subscription registration and deactivation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use market_core::{CoreError, Webhook, WebhookId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{ApiError, ERROR_INTERNAL, ERROR_VALIDATION, ERROR_WEBHOOK_NOT_FOUND};
use crate::server::AppState;

/// Request body for webhook registration.
#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    /// Stores whose events the subscription receives.
    pub store_ids: Vec<String>,
    /// Destination URL for event pushes.
    pub callback_url: String,
    /// Shared secret sent as the `Authorization` header.
    pub token: String,
}

/// Webhook representation returned by the API.
///
/// The shared token is write-only; it never appears in responses.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Subscription identifier.
    pub id: Uuid,
    /// Subscribed stores.
    pub store_ids: Vec<String>,
    /// Destination URL.
    pub callback_url: String,
    /// Whether the subscription receives events.
    pub active: bool,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id.0,
            store_ids: webhook.store_ids,
            callback_url: webhook.callback_url,
            active: webhook.active,
            created_at: webhook.created_at,
        }
    }
}

/// Registers a webhook subscription.
#[instrument(name = "create_webhook", skip(state, request))]
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(request): Json<CreateWebhookRequest>,
) -> Response {
    let webhook = match Webhook::new(
        request.store_ids,
        request.callback_url,
        request.token,
        state.clock.now(),
    ) {
        Ok(webhook) => webhook,
        Err(e) => {
            warn!(error = %e, "rejected webhook registration");
            return ApiError::response(StatusCode::BAD_REQUEST, ERROR_VALIDATION, e.to_string());
        },
    };

    if let Err(e) = state.storage.webhooks.create(&webhook).await {
        error!(error = %e, "failed to persist webhook");
        return ApiError::response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_INTERNAL,
            "failed to persist webhook",
        );
    }

    info!(webhook_id = %webhook.id, stores = ?webhook.store_ids, "webhook registered");
    (StatusCode::CREATED, Json(WebhookResponse::from(webhook))).into_response()
}

/// Deactivates a webhook subscription. The row is kept for audit.
#[instrument(name = "deactivate_webhook", skip(state))]
pub async fn deactivate_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<Uuid>,
) -> Response {
    match state.storage.webhooks.deactivate(WebhookId(webhook_id), state.clock.now()).await {
        Ok(()) => {
            info!(%webhook_id, "webhook deactivated");
            StatusCode::NO_CONTENT.into_response()
        },
        Err(CoreError::NotFound(message)) => {
            ApiError::response(StatusCode::NOT_FOUND, ERROR_WEBHOOK_NOT_FOUND, message)
        },
        Err(e) => {
            error!(error = %e, "failed to deactivate webhook");
            ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to deactivate webhook",
            )
        },
    }
}
