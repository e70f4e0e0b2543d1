//! Service Module
//!
//! Task supervision and log streaming.
//! The registry owns one supervisor per task; log streams read task logs
//! without going through the supervisors.

pub mod error;
pub mod log_buffer;
pub mod log_stream;
pub mod registry;
pub mod runtime;
pub mod supervisor;

pub use error::ServiceError;
pub use log_stream::{LogStream, StreamEnd};
pub use registry::Registry;
pub use runtime::{ProcessRuntime, TaskRuntime};
