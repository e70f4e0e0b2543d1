//! Log buffer service
//!
//! Append-only, sequence-numbered log of a single task.
//! The owning supervisor is the only writer; any number of log streams read
//! concurrently and wait for new entries through a watch channel.

use chrono::Utc;
use kernelhub_core::domain::log::{LogEntry, LogLevel};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

/// Observable status of a log buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatus {
    /// Number of visible entries; also the next sequence id
    pub len: u64,

    /// No further entries will be appended
    pub sealed: bool,

    /// The buffer was forcibly removed; readers must stop
    pub purged: bool,
}

/// In-memory log buffer
///
/// Entries are pushed under the write lock and announced afterwards, so a
/// reader woken by the watch channel always finds them fully formed.
#[derive(Debug)]
pub struct LogBuffer {
    entries: RwLock<Vec<LogEntry>>,
    status: watch::Sender<BufferStatus>,
}

impl LogBuffer {
    /// Creates an empty log buffer
    pub fn new() -> Self {
        let (status, _) = watch::channel(BufferStatus::default());
        Self {
            entries: RwLock::new(Vec::new()),
            status,
        }
    }

    /// Appends an entry and returns its sequence id
    ///
    /// Returns `None` once the buffer is sealed or purged.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) -> Option<u64> {
        let closed = {
            let status = self.status.borrow();
            status.sealed || status.purged
        };
        if closed {
            return None;
        }

        let id = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let id = entries.len() as u64;
            entries.push(LogEntry {
                id,
                timestamp: Utc::now(),
                level,
                message: message.into(),
            });
            id
        };

        self.status.send_modify(|status| status.len = status.len.max(id + 1));

        Some(id)
    }

    /// Reads up to `limit` entries starting at sequence id `offset`
    pub fn read(&self, offset: u64, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(entries.len());
        let end = start.saturating_add(limit).min(entries.len());

        entries[start..end].to_vec()
    }

    /// Number of entries appended so far
    pub fn len(&self) -> u64 {
        self.status.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> BufferStatus {
        *self.status.borrow()
    }

    /// Subscribes to status changes
    pub fn subscribe(&self) -> watch::Receiver<BufferStatus> {
        self.status.subscribe()
    }

    /// Marks the log complete; readers finish once they have drained it
    pub fn seal(&self) {
        self.status.send_if_modified(|status| {
            let changed = !status.sealed;
            status.sealed = true;
            changed
        });
    }

    /// Marks the log as removed; readers abort
    pub fn purge(&self) {
        self.status.send_if_modified(|status| {
            let changed = !status.purged;
            status.purged = true;
            status.sealed = true;
            changed
        });
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
