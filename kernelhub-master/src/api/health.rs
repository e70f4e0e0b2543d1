//! Health Check API Handler
//!
//! Liveness endpoint for monitoring.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::api::AppState;

/// GET /health
/// Reports liveness and how many tasks the registry holds
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.registry.len().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "tasks": tasks })),
    )
}
