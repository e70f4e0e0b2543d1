//! Log stream bridge
//!
//! Pumps entries from a task's log buffer into a bounded sink, one batch at
//! a time. A stream either drains what is already there, or follows the task
//! until its log is sealed.
//!
//! The sink's capacity is the flow control: when the consumer falls behind,
//! `send` waits and the stream stops reading from the buffer.

use kernelhub_core::dto::log::{LogBatch, LogQuery};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::service::error::{Result, ServiceError};
use crate::service::log_buffer::LogBuffer;
use crate::service::supervisor::{BridgeLease, TaskHandle};

/// How a log stream ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every entry present was delivered and the stream was not following
    Exhausted,
    /// The task terminated and its whole log was delivered
    Completed,
    /// The consumer went away
    Cancelled,
}

/// Rejects log queries before a stream is opened
pub fn validate_query(query: &LogQuery, max_limit: i64) -> Result<()> {
    if query.offset < 0 {
        return Err(ServiceError::InvalidArgument(format!(
            "offset must be non-negative, got {}",
            query.offset
        )));
    }

    if query.limit < 0 {
        return Err(ServiceError::InvalidArgument(format!(
            "limit must be non-negative, got {}",
            query.limit
        )));
    }

    if query.limit > max_limit {
        return Err(ServiceError::InvalidArgument(format!(
            "limit {} exceeds maximum of {}",
            query.limit, max_limit
        )));
    }

    Ok(())
}

/// A log stream over one task
///
/// Holds a lease on the task for as long as it lives, which keeps the task
/// from being reaped while entries are still being delivered.
pub struct LogStream {
    task_id: Uuid,
    logs: Arc<LogBuffer>,
    offset: u64,
    /// End of the log when a non-follow stream opened; `None` when following
    end: Option<u64>,
    batch_size: usize,
    follow: bool,
    poll_interval: Duration,
    _lease: BridgeLease,
}

impl LogStream {
    /// Opens a stream on `task` starting at `query.offset`
    pub fn open(task: &TaskHandle, query: LogQuery, config: &Config) -> Result<Self> {
        validate_query(&query, config.max_log_limit)?;

        let batch_size = match usize::try_from(query.limit) {
            Ok(0) | Err(_) => config.stream_batch_size,
            Ok(limit) => limit.min(config.stream_batch_size),
        };

        Ok(Self {
            task_id: task.id(),
            logs: Arc::clone(task.logs()),
            offset: query.offset as u64,
            end: (!query.follow).then(|| task.logs().len()),
            batch_size,
            follow: query.follow,
            poll_interval: config.follow_poll_interval,
            _lease: task.lease(),
        })
    }

    /// Delivers batches into `sink` until the stream ends
    ///
    /// Every entry is delivered at most once per stream and in sequence order.
    /// A non-follow stream stops at the end of the log as it was when the
    /// stream opened. A purged task ends the stream with `Aborted`.
    pub async fn run(mut self, sink: mpsc::Sender<LogBatch>) -> Result<StreamEnd> {
        let mut status_rx = self.logs.subscribe();

        loop {
            // Copy the status out: holding the borrow across a read would
            // block the writer.
            let status = *status_rx.borrow_and_update();
            if status.purged {
                return Err(self.aborted());
            }

            let entries = self.logs.read(self.offset, self.read_limit());
            if let Some(last) = entries.last() {
                let next_offset = last.id + 1;
                let batch = LogBatch {
                    task_id: self.task_id,
                    more: self.has_more(next_offset),
                    entries,
                };

                if sink.send(batch).await.is_err() {
                    debug!(task_id = %self.task_id, offset = self.offset, "Log stream consumer went away");
                    return Ok(StreamEnd::Cancelled);
                }
                self.offset = next_offset;
                continue;
            }

            if !self.follow {
                return Ok(StreamEnd::Exhausted);
            }

            if status.sealed {
                return Ok(StreamEnd::Completed);
            }

            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return Err(self.aborted());
                    }
                }
                _ = sink.closed() => {
                    debug!(task_id = %self.task_id, "Log stream consumer went away while idle");
                    return Ok(StreamEnd::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn read_limit(&self) -> usize {
        match self.end {
            Some(end) => {
                let remaining = end.saturating_sub(self.offset);
                usize::try_from(remaining).map_or(self.batch_size, |r| r.min(self.batch_size))
            }
            None => self.batch_size,
        }
    }

    /// Whether entries may follow a batch ending before `next_offset`
    fn has_more(&self, next_offset: u64) -> bool {
        match self.end {
            Some(end) => next_offset < end,
            None => {
                // Read after the batch so a seal racing the read is seen.
                let status = self.logs.status();
                next_offset < status.len || !status.sealed
            }
        }
    }

    fn aborted(&self) -> ServiceError {
        ServiceError::Aborted(format!("log of task {} was purged", self.task_id))
    }
}
