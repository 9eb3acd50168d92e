//! Liveness endpoint.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Reports service liveness.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
