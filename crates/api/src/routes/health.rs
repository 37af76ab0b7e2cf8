//! Health check endpoint.

use axum::Json;
use axum::response::IntoResponse;

/// Returns `{"status": "ok"}` with 200 status.
pub async fn check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
