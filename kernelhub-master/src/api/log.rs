//! Log API Handlers
//!
//! Server-sent event stream over a task's log. Each entry is a `log` event
//! whose id is the entry's sequence id; a failed stream ends with one `error`
//! event.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use kernelhub_core::domain::log::LogEntry;
use kernelhub_core::dto::log::{LogQuery, StreamError};
use std::convert::Infallible;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::api::{AppState, TaskId};
use crate::api::error::{ApiError, ApiResult};
use crate::service::{LogStream, ServiceError};

const LAST_EVENT_ID: &str = "last-event-id";

/// GET /tasks/{id}/logs
/// Stream a task's log; `Last-Event-ID` resumes after the given entry
pub async fn stream_logs(
    State(state): State<AppState>,
    TaskId(id): TaskId,
    Query(mut query): Query<LogQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if let Some(last_id) = last_event_id(&headers)? {
        query.offset = last_id
            .checked_add(1)
            .and_then(|next| i64::try_from(next).ok())
            .ok_or_else(|| ApiError::BadRequest(format!("invalid Last-Event-ID {}", last_id)))?;
    }

    tracing::debug!(
        task_id = %id,
        offset = query.offset,
        limit = query.limit,
        follow = query.follow,
        "Opening log stream"
    );

    let config = state.registry.config();
    let handle = state.registry.handle(id).await?;
    let log_stream = LogStream::open(&handle, query, config)?;

    let (batches_tx, batches_rx) = mpsc::channel(config.stream_buffer);
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = log_stream.run(batches_tx).await;
        match &result {
            Ok(end) => tracing::debug!(task_id = %id, "Log stream ended: {:?}", end),
            Err(e) => tracing::warn!(task_id = %id, "Log stream failed: {}", e),
        }
        let _ = done_tx.send(result);
    });

    let entries = ReceiverStream::new(batches_rx)
        .flat_map(|batch| stream::iter(batch.entries.into_iter().map(log_event)));

    let end = stream::once(done_rx).filter_map(|result| async move {
        match result {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(error_event(&e)),
            Err(_) => Some(error_event(&ServiceError::Internal(
                "log stream stopped unexpectedly".to_string(),
            ))),
        }
    });

    let events = entries.chain(end).map(Ok::<Event, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn last_event_id(headers: &HeaderMap) -> ApiResult<Option<u64>> {
    let Some(value) = headers.get(LAST_EVENT_ID) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest("Last-Event-ID must be a log sequence id".to_string()))
}

fn log_event(entry: LogEntry) -> Event {
    let id = entry.id.to_string();
    match Event::default().event("log").id(id).json_data(&entry) {
        Ok(event) => event,
        Err(e) => error_event(&ServiceError::Internal(format!(
            "failed to encode log entry {}: {}",
            entry.id, e
        ))),
    }
}

fn error_event(err: &ServiceError) -> Event {
    let payload = StreamError {
        code: err.code().to_string(),
        message: err.to_string(),
    };
    let data = serde_json::to_string(&payload)
        .unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", payload.code));

    Event::default().event("error").data(data)
}
