//! Task API Handlers
//!
//! HTTP endpoints for task lifecycle management.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use kernelhub_core::domain::task::Task;
use kernelhub_core::dto::task::{LaunchTask, ListTasksQuery, TaskPage};

use crate::api::{AppState, TaskId};
use crate::api::error::ApiResult;

/// POST /tasks
/// Launch a new task
pub async fn launch_task(
    State(state): State<AppState>,
    Json(req): Json<LaunchTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    tracing::info!("Launching {} task for {}", req.kind, req.owner);

    let task = state.registry.launch(req).await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /tasks/{id}
/// Get task details by ID
pub async fn get_task(
    State(state): State<AppState>,
    TaskId(id): TaskId,
) -> ApiResult<Json<Task>> {
    tracing::debug!("Getting task: {}", id);

    Ok(Json(state.registry.get(id).await?))
}

/// GET /tasks
/// Filtered, sorted and paginated task listing
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<TaskPage>> {
    tracing::debug!("Listing tasks: {:?}", query);

    Ok(Json(state.registry.list(&query).await))
}

/// POST /tasks/{id}/kill
pub async fn kill_task(
    State(state): State<AppState>,
    TaskId(id): TaskId,
) -> ApiResult<StatusCode> {
    tracing::info!("Killing task: {}", id);

    state.registry.kill(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /tasks/{id}
/// Kill the task if needed and forget it immediately
pub async fn purge_task(
    State(state): State<AppState>,
    TaskId(id): TaskId,
) -> ApiResult<StatusCode> {
    tracing::info!("Purging task: {}", id);

    state.registry.purge(id).await?;

    Ok(StatusCode::NO_CONTENT)
}
