//! Core types for comic-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a download task (one chapter of one comic)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(pub String);

impl TaskKey {
    /// Create a new TaskKey
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TaskKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl PartialEq<&str> for TaskKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One sub-fetch of a task, typically a single page image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// Stable key of the unit within its task (e.g. page index)
    pub key: String,
    /// Location handed to the fetcher
    pub url: String,
    /// Expected size in bytes, if the metadata reported one
    #[serde(default)]
    pub expected_size: Option<u64>,
}

impl UnitDescriptor {
    /// Create a unit without a known size
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            expected_size: None,
        }
    }
}

/// Work descriptor for a submitted task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Display name (e.g. "Some Comic - Chapter 12")
    pub title: String,
    /// Ordered page fetches making up the chapter
    pub units: Vec<UnitDescriptor>,
}

impl DownloadRequest {
    /// Create a request from a title and its ordered units
    pub fn new(title: impl Into<String>, units: Vec<UnitDescriptor>) -> Self {
        Self {
            title: title.into(),
            units,
        }
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a concurrency slot
    Queued,
    /// A runner is fetching units
    Running,
    /// Waiting out a backoff before retrying the current unit
    Retrying,
    /// Paused by the user
    Paused,
    /// Every unit fetched
    Succeeded,
    /// Given up (permanent failure or retries exhausted)
    Abandoned,
}

impl TaskState {
    /// Succeeded and Abandoned never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Abandoned)
    }

    /// Lowercase name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Paused => "paused",
            TaskState::Succeeded => "succeeded",
            TaskState::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified fetch failure, without payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request timed out
    Timeout,
    /// Server asked us to slow down
    RateLimited,
    /// 5xx-equivalent server failure
    ServerError,
    /// Unit does not exist
    NotFound,
    /// Credentials missing or rejected
    AuthRequired,
    /// Unit explicitly banned by the source
    Banned,
    /// Anything unclassified
    Other,
}

impl FailureKind {
    /// Transient kinds are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RateLimited | FailureKind::ServerError
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServerError => "server error",
            FailureKind::NotFound => "not found",
            FailureKind::AuthRequired => "authentication required",
            FailureKind::Banned => "banned",
            FailureKind::Other => "other error",
        };
        f.write_str(s)
    }
}

/// Why a task was abandoned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbandonReason {
    /// A unit failed with a non-retryable kind
    Permanent {
        /// The failure kind reported by the fetcher
        kind: FailureKind,
    },
    /// A unit kept failing transiently until the attempt budget ran out
    RetriesExhausted {
        /// Kind of the final transient failure
        last: FailureKind,
    },
}

impl AbandonReason {
    /// The failure kind that ended the task
    pub fn kind(&self) -> FailureKind {
        match self {
            AbandonReason::Permanent { kind } => *kind,
            AbandonReason::RetriesExhausted { last } => *last,
        }
    }
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::Permanent { kind } => write!(f, "{kind}"),
            AbandonReason::RetriesExhausted { last } => {
                write!(f, "retries exhausted (last: {last})")
            }
        }
    }
}

/// Immutable progress view of one task
///
/// Produced on every published state change. A newer snapshot for the same key
/// supersedes the older one; snapshots are never mutated after emission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Task key
    pub key: TaskKey,
    /// Display name
    pub title: String,
    /// Lifecycle state at the time of the snapshot
    pub state: TaskState,
    /// Units fetched so far
    pub completed_units: u32,
    /// Units in the task
    pub total_units: u32,
    /// Bytes fetched so far
    pub downloaded_bytes: u64,
    /// Progress percentage (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable status ("downloading", "retrying in 5s", ...)
    pub indicator: String,
    /// Seconds until the next attempt while retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Consecutive failed attempts on the current unit
    pub attempt: u32,
    /// Most recent failure kind, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
    /// Submission order, increasing across the manager's lifetime
    pub sequence: u64,
    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
}

/// Percentage of `completed` over `total`, 0 when there is nothing to do
pub fn percentage(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(completed) / f64::from(total) * 100.0
}

/// Human-readable indicator for a state
pub fn indicator(
    state: TaskState,
    retry_after_secs: Option<u64>,
    abandon_reason: Option<AbandonReason>,
) -> String {
    match state {
        TaskState::Queued => "queued".to_string(),
        TaskState::Running => "downloading".to_string(),
        TaskState::Retrying => match retry_after_secs {
            Some(secs) => format!("retrying in {secs}s"),
            None => "retrying".to_string(),
        },
        TaskState::Paused => "paused".to_string(),
        TaskState::Succeeded => "completed".to_string(),
        TaskState::Abandoned => match abandon_reason {
            Some(reason) => format!("failed: {reason}"),
            None => "failed".to_string(),
        },
    }
}

/// Event emitted during the task lifecycle
///
/// Events for the same key arrive in emission order. There is no ordering
/// guarantee across keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task submitted and queued
    Created {
        /// Initial snapshot
        snapshot: ProgressSnapshot,
    },

    /// A unit finished and progress moved forward
    Updated {
        /// Snapshot after the unit completed
        snapshot: ProgressSnapshot,
    },

    /// A unit failed transiently and will be retried
    Retrying {
        /// Snapshot in the retrying state
        snapshot: ProgressSnapshot,
        /// Wait before the next attempt, in seconds (rounded up)
        wait_secs: u64,
    },

    /// Task paused
    Paused {
        /// Snapshot in the paused state
        snapshot: ProgressSnapshot,
    },

    /// Paused task re-queued
    Resumed {
        /// Snapshot in the queued state
        snapshot: ProgressSnapshot,
    },

    /// Every unit fetched
    Succeeded {
        /// Final snapshot
        snapshot: ProgressSnapshot,
    },

    /// Task abandoned
    Failed {
        /// Final snapshot
        snapshot: ProgressSnapshot,
        /// Why the task was abandoned
        reason: AbandonReason,
    },

    /// Task cancelled and removed from the manager
    Removed {
        /// Task key
        key: TaskKey,
    },

    /// Aggregate throughput across all running tasks
    Speed {
        /// Bytes fetched during the last reporting interval, per second
        bytes_per_sec: u64,
    },

    /// This subscriber fell behind and older events were dropped
    Gap {
        /// Number of events that were dropped
        missed: u64,
    },

    /// Manager shut down; no more events follow
    Shutdown,
}

impl Event {
    /// Task key this event belongs to, if it is task-scoped
    pub fn key(&self) -> Option<&TaskKey> {
        match self {
            Event::Created { snapshot }
            | Event::Updated { snapshot }
            | Event::Retrying { snapshot, .. }
            | Event::Paused { snapshot }
            | Event::Resumed { snapshot }
            | Event::Succeeded { snapshot }
            | Event::Failed { snapshot, .. } => Some(&snapshot.key),
            Event::Removed { key } => Some(key),
            Event::Speed { .. } | Event::Gap { .. } | Event::Shutdown => None,
        }
    }

    /// Snapshot carried by this event, if any
    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match self {
            Event::Created { snapshot }
            | Event::Updated { snapshot }
            | Event::Retrying { snapshot, .. }
            | Event::Paused { snapshot }
            | Event::Resumed { snapshot }
            | Event::Succeeded { snapshot }
            | Event::Failed { snapshot, .. } => Some(snapshot),
            Event::Removed { .. } | Event::Speed { .. } | Event::Gap { .. } | Event::Shutdown => {
                None
            }
        }
    }

    /// Whether this event ends the task's event sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Succeeded { .. } | Event::Failed { .. } | Event::Removed { .. }
        )
    }
}
