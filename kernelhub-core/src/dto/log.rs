//! Log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// Query for a task's log stream
///
/// Signed fields let the master reject negative values with a
/// descriptive error instead of a generic parse failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Sequence id of the first entry requested
    #[serde(default)]
    pub offset: i64,

    /// Maximum entries per batch; 0 means no cap
    #[serde(default)]
    pub limit: i64,

    /// Keep streaming new entries until the task terminates
    #[serde(default)]
    pub follow: bool,
}

/// Entries read from a task's log in one poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub task_id: Uuid,
    pub entries: Vec<LogEntry>,

    /// Whether further entries may still arrive on this stream
    pub more: bool,
}

/// Terminal error sent to a log stream consumer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamError {
    pub code: String,
    pub message: String,
}
