//! Error types for comic-dl
//!
//! Two families live here:
//! - [`Error`] - returned by manager operations (submit, pause, resume, ...)
//! - [`FetchError`] - returned by a [`Fetcher`](crate::fetcher::Fetcher) for one unit
//!
//! Fetch failures never escape as [`Error`]. Transient ones are retried and permanent
//! ones end the task with a `Failed` event.

use std::time::Duration;
use thiserror::Error;

use crate::types::{FailureKind, TaskKey, TaskState};

/// Result type alias for comic-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for comic-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_tasks")
        key: Option<String>,
    },

    /// A live task already exists for this key
    #[error("task {key} is already in progress")]
    AlreadyActive {
        /// The key that was submitted twice
        key: TaskKey,
    },

    /// The key finished earlier and resubmission is disabled
    #[error("task {key} already finished; remove it before resubmitting")]
    AlreadyFinished {
        /// The key of the finished task
        key: TaskKey,
    },

    /// Operation not allowed in the task's current state
    #[error("cannot {operation} task {key} in state {state}")]
    InvalidTransition {
        /// The task the operation targeted
        key: TaskKey,
        /// The operation that was attempted (e.g. "pause", "resume")
        operation: &'static str,
        /// The state that prevents the operation
        state: TaskState,
    },

    /// No task with this key
    #[error("task not found: {0}")]
    NotFound(TaskKey),

    /// Request rejected before a task was created
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single unit fetch, as reported by a fetcher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Source is throttling us, optionally telling us how long to wait
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait before retrying
        retry_after: Option<Duration>,
    },

    /// Server-side failure (5xx-equivalent)
    #[error("server error (status {0})")]
    ServerError(u16),

    /// Unit does not exist
    #[error("not found")]
    NotFound,

    /// Credentials missing or rejected
    #[error("authentication required")]
    AuthRequired,

    /// Unit explicitly banned by the source
    #[error("banned by source")]
    Banned,

    /// Anything unclassified
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Payload-free classification of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Timeout => FailureKind::Timeout,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::ServerError(_) => FailureKind::ServerError,
            FetchError::NotFound => FailureKind::NotFound,
            FetchError::AuthRequired => FailureKind::AuthRequired,
            FetchError::Banned => FailureKind::Banned,
            FetchError::Other(_) => FailureKind::Other,
        }
    }

    /// Server-suggested wait, only meaningful for rate limiting
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
