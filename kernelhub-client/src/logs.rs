//! Log streaming
//!
//! Consumes the master's server-sent event stream of a task log.

use crate::KernelhubClient;
use crate::error::{ClientError, Result};
use futures::{Stream, StreamExt};
use kernelhub_core::domain::log::LogEntry;
use kernelhub_core::dto::log::{LogQuery, StreamError};
use reqwest_eventsource::{Event, EventSource, retry};
use std::pin::Pin;
use tracing::debug;
use uuid::Uuid;

/// Entries of a task log, in sequence order
pub type LogEntryStream = Pin<Box<dyn Stream<Item = Result<LogEntry>> + Send>>;

impl KernelhubClient {
    /// Stream a task's log
    ///
    /// Without `follow` the stream ends once the entries present have been
    /// delivered; with it, once the task terminated and its whole log was
    /// delivered. A failure is yielded as the last item. The stream does not
    /// reconnect; resume with `offset` set past the last entry received.
    pub fn stream_logs(&self, task_id: Uuid, query: LogQuery) -> LogEntryStream {
        let url = format!("{}/tasks/{}/logs", self.base_url, task_id);
        let request = self.client.get(&url).query(&query);

        Box::pin(async_stream::stream! {
            let mut source = match EventSource::new(request) {
                Ok(source) => source,
                Err(e) => {
                    yield Err(ClientError::InvalidRequest(e.to_string()));
                    return;
                }
            };
            source.set_retry_policy(Box::new(retry::Never));

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => debug!(task_id = %task_id, "Log stream opened"),
                    Ok(Event::Message(message)) => match message.event.as_str() {
                        "log" => match serde_json::from_str::<LogEntry>(&message.data) {
                            Ok(entry) => yield Ok(entry),
                            Err(e) => {
                                yield Err(ClientError::ParseError(format!("Invalid log entry: {}", e)));
                                break;
                            }
                        },
                        "error" => {
                            yield Err(stream_error(&message.data));
                            break;
                        }
                        other => debug!(task_id = %task_id, "Ignoring '{}' event", other),
                    },
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let body = response.text().await.unwrap_or_default();
                        yield Err(ClientError::from_body(status.as_u16(), &body));
                        break;
                    }
                    Err(e) => {
                        yield Err(ClientError::StreamInterrupted(e.to_string()));
                        break;
                    }
                }
            }

            source.close();
        })
    }
}

fn stream_error(data: &str) -> ClientError {
    match serde_json::from_str::<StreamError>(data) {
        Ok(StreamError { code, message }) => ClientError::StreamAborted { code, message },
        Err(_) => ClientError::StreamAborted {
            code: "unknown".to_string(),
            message: data.to_string(),
        },
    }
}
