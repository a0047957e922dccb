//! Core download manager split into focused submodules.
//!
//! The `DownloadManager` struct and its methods are organized by domain:
//! - [`table`] - Task records, the FIFO queue and runner report application
//! - [`control`] - Task lifecycle control (submit/pause/resume/cancel/remove, queries)
//! - [`queue_processor`] - Dispatching queued tasks into free concurrency slots
//! - [`runner`] - Per-task state machine driving the fetcher
//! - [`services`] - Background service starters (throughput reporting)
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod queue_processor;
mod runner;
mod services;
mod table;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};

use crate::bus::{EventBus, Subscription};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::retry::RetryPolicy;
use crate::types::Event;

use table::TaskTable;

/// Dispatch and slot management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Semaphore limiting concurrently running tasks (respects max_concurrent_tasks config)
    pub(crate) concurrent_limit: Arc<tokio::sync::Semaphore>,
    /// Wakes the queue processor when a task is queued
    pub(crate) dispatch_notify: Arc<tokio::sync::Notify>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the queue processor and background services
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
    /// Background service handles, joined on shutdown
    pub(crate) background: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

/// Main download manager instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadManager {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Unit fetcher shared by every runner
    pub(crate) fetcher: Arc<dyn Fetcher>,
    /// Retry policy consulted by runners after each failed fetch
    pub(crate) policy: Arc<RetryPolicy>,
    /// Event bus (multiple subscribers supported)
    pub(crate) bus: EventBus,
    /// Task table; every state change and its event happen under this lock
    pub(crate) tasks: Arc<tokio::sync::Mutex<TaskTable>>,
    /// Dispatch and slot management
    pub(crate) queue_state: QueueState,
    /// Bytes fetched since the last throughput report
    pub(crate) bytes_counter: Arc<AtomicU64>,
}

impl DownloadManager {
    /// Create a new DownloadManager instance
    ///
    /// Validates the configuration, sets up the event bus and starts the queue
    /// processor plus the throughput reporter. Must be called from within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is invalid.
    pub async fn new(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.download.event_buffer_size);
        let policy = Arc::new(RetryPolicy::new(config.retry.clone()));
        let concurrent_limit = Arc::new(tokio::sync::Semaphore::new(
            config.download.max_concurrent_tasks,
        ));

        let queue_state = QueueState {
            concurrent_limit,
            dispatch_notify: Arc::new(tokio::sync::Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
            background: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        };

        let manager = Self {
            config: Arc::new(config),
            fetcher,
            policy,
            bus,
            tasks: Arc::new(tokio::sync::Mutex::new(TaskTable::default())),
            queue_state,
            bytes_counter: Arc::new(AtomicU64::new(0)),
        };

        let mut handles = vec![manager.start_queue_processor()];
        if let Some(handle) = manager.start_speed_reporter() {
            handles.push(handle);
        }
        manager.queue_state.background.lock().await.extend(handles);

        tracing::info!(
            max_concurrent_tasks = manager.config.download.max_concurrent_tasks,
            max_attempts = manager.config.retry.max_attempts,
            "Download manager started"
        );

        Ok(manager)
    }

    /// Subscribe to task events
    ///
    /// The subscription sees every event published after this call, in order for
    /// any given task. See [`Subscription`] for overflow behavior.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        self.bus.publish(event);
    }

    /// Configuration this manager was built with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
