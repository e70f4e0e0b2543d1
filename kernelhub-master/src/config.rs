//! Master configuration
//!
//! Defines all configurable parameters of the master including registry
//! capacity, supervisor timeouts and log streaming flow control.

use std::path::PathBuf;
use std::time::Duration;

/// Master configuration
///
/// All limits and intervals are configurable to allow tuning for different
/// deployment scenarios (single workstation vs shared cluster).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Maximum number of supervisors held by the registry
    pub max_tasks: usize,

    /// Maximum slots a single task may request
    pub max_slots: u32,

    /// How long a control request waits for a supervisor reply
    pub ask_timeout: Duration,

    /// How long a killed task may take to exit before it is forced terminated
    pub kill_grace: Duration,

    /// Upper bound on entries per batch pushed by a log stream
    pub stream_batch_size: usize,

    /// Number of batches a log stream may queue ahead of its consumer
    pub stream_buffer: usize,

    /// Longest a follow stream waits before re-checking its consumer
    pub follow_poll_interval: Duration,

    /// Largest `limit` accepted on a log query
    pub max_log_limit: i64,

    /// Page size used when a listing does not ask for one
    pub list_max_limit: usize,

    /// How often terminated tasks are reaped
    pub reap_interval: Duration,

    /// How long a terminated task stays visible before it may be reaped
    pub retention: Duration,

    /// Largest total size of context files accepted on launch
    pub max_context_size: usize,

    /// Base directory for task working directories
    pub workdir: PathBuf,
}

/// Messages travel base64-encoded inside 128 MiB frames; keep 1 MiB for the envelope.
const DEFAULT_MAX_CONTEXT_SIZE: usize = (128 * 1024 * 1024 / 8) * 6 - 1024 * 1024;

impl Config {
    /// Creates a configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            max_tasks: 1000,
            max_slots: 64,
            ask_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_secs(10),
            stream_batch_size: 500,
            stream_buffer: 4,
            follow_poll_interval: Duration::from_secs(1),
            max_log_limit: 10_000,
            list_max_limit: 100,
            reap_interval: Duration::from_secs(30),
            retention: Duration::from_secs(300),
            max_context_size: DEFAULT_MAX_CONTEXT_SIZE,
            workdir: std::env::temp_dir().join("kernelhub"),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - KERNELHUB_BIND_ADDR (default: 0.0.0.0:8080)
    /// - KERNELHUB_MAX_TASKS (default: 1000)
    /// - KERNELHUB_MAX_SLOTS (default: 64)
    /// - KERNELHUB_ASK_TIMEOUT_MS (default: 5000)
    /// - KERNELHUB_KILL_GRACE_MS (default: 10000)
    /// - KERNELHUB_STREAM_BATCH_SIZE (default: 500)
    /// - KERNELHUB_STREAM_BUFFER (default: 4)
    /// - KERNELHUB_FOLLOW_POLL_MS (default: 1000)
    /// - KERNELHUB_MAX_LOG_LIMIT (default: 10000)
    /// - KERNELHUB_LIST_MAX_LIMIT (default: 100)
    /// - KERNELHUB_REAP_INTERVAL_SECS (default: 30)
    /// - KERNELHUB_RETENTION_SECS (default: 300)
    /// - KERNELHUB_MAX_CONTEXT_SIZE (bytes, default: 95 MiB)
    /// - KERNELHUB_WORKDIR (default: $TMPDIR/kernelhub)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> anyhow::Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| anyhow::anyhow!("{} must be an unsigned integer: {}", key, e)),
                None => Ok(None),
            }
        };

        let mut config = Self::new(
            lookup("KERNELHUB_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        );

        if let Some(v) = parse("KERNELHUB_MAX_TASKS")? {
            config.max_tasks = v as usize;
        }
        if let Some(v) = parse("KERNELHUB_MAX_SLOTS")? {
            config.max_slots = u32::try_from(v)?;
        }
        if let Some(v) = parse("KERNELHUB_ASK_TIMEOUT_MS")? {
            config.ask_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse("KERNELHUB_KILL_GRACE_MS")? {
            config.kill_grace = Duration::from_millis(v);
        }
        if let Some(v) = parse("KERNELHUB_STREAM_BATCH_SIZE")? {
            config.stream_batch_size = v as usize;
        }
        if let Some(v) = parse("KERNELHUB_STREAM_BUFFER")? {
            config.stream_buffer = v as usize;
        }
        if let Some(v) = parse("KERNELHUB_FOLLOW_POLL_MS")? {
            config.follow_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse("KERNELHUB_MAX_LOG_LIMIT")? {
            config.max_log_limit = i64::try_from(v)?;
        }
        if let Some(v) = parse("KERNELHUB_LIST_MAX_LIMIT")? {
            config.list_max_limit = v as usize;
        }
        if let Some(v) = parse("KERNELHUB_REAP_INTERVAL_SECS")? {
            config.reap_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse("KERNELHUB_RETENTION_SECS")? {
            config.retention = Duration::from_secs(v);
        }
        if let Some(v) = parse("KERNELHUB_MAX_CONTEXT_SIZE")? {
            config.max_context_size = v as usize;
        }
        if let Some(dir) = lookup("KERNELHUB_WORKDIR") {
            config.workdir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.max_tasks == 0 {
            anyhow::bail!("max_tasks must be greater than 0");
        }

        if self.ask_timeout.is_zero() {
            anyhow::bail!("ask_timeout must be greater than 0");
        }

        if self.stream_batch_size == 0 {
            anyhow::bail!("stream_batch_size must be greater than 0");
        }

        if self.stream_buffer == 0 {
            anyhow::bail!("stream_buffer must be greater than 0");
        }

        if self.follow_poll_interval.is_zero() {
            anyhow::bail!("follow_poll_interval must be greater than 0");
        }

        if self.max_log_limit <= 0 {
            anyhow::bail!("max_log_limit must be greater than 0");
        }

        if self.list_max_limit == 0 {
            anyhow::bail!("list_max_limit must be greater than 0");
        }

        if self.reap_interval.is_zero() {
            anyhow::bail!("reap_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string())
    }
}
