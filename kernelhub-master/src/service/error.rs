//! Service error taxonomy

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the registry, supervisors and log streams
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed input, rejected before any state change
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task {0} not found")]
    NotFound(Uuid),

    /// Registry capacity reached
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The task or its log disappeared mid-operation
    #[error("aborted: {0}")]
    Aborted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine readable code, used on the log stream wire
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::ResourceExhausted(_) => "resource_exhausted",
            ServiceError::Aborted(_) => "aborted",
            ServiceError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
