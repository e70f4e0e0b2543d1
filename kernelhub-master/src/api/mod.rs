//! API Module
//!
//! HTTP API layer for the master.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod log;
pub mod task;

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequestParts, Path},
    http::request::Parts,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::service::Registry;

/// Room left in a launch body for everything but the context file contents
const LAUNCH_ENVELOPE: usize = 1024 * 1024;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

/// Task id taken from the path; malformed ids are rejected as JSON errors
pub struct TaskId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for TaskId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(TaskId(id))
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // Oversized contexts must reach launch validation instead of the
    // extractor's default limit.
    let body_limit = state
        .registry
        .config()
        .max_context_size
        .saturating_add(LAUNCH_ENVELOPE);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Task endpoints
        .route("/tasks", post(task::launch_task).get(task::list_tasks))
        .route("/tasks/{id}", get(task::get_task).delete(task::purge_task))
        .route("/tasks/{id}/kill", post(task::kill_task))
        // Log endpoints
        .route("/tasks/{id}/logs", get(log::stream_logs))
        // Add state and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
