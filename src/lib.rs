//! # comic-dl
//!
//! Concurrent chapter download task manager for comic reading applications.
//!
//! ## Design Philosophy
//!
//! comic-dl is designed to be:
//! - **Library-first** - No UI and no HTTP client, the host supplies a [`Fetcher`]
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Bounded** - At most `max_concurrent_tasks` chapters download at once
//!
//! Each submitted chapter becomes a task made of ordered units (page images). Tasks
//! wait in a FIFO queue until a concurrency slot frees up. Transient fetch failures
//! are retried with exponential backoff (or the server's own hint when rate
//! limited); permanent ones end the task. Every state change is published as an
//! [`Event`] carrying an immutable [`ProgressSnapshot`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use comic_dl::{
//!     Config, DownloadManager, DownloadRequest, FetchError, Fetched, Fetcher, ProgressBoard,
//!     TaskKey, UnitDescriptor,
//! };
//! use std::sync::Arc;
//!
//! struct HttpFetcher;
//!
//! #[async_trait::async_trait]
//! impl Fetcher for HttpFetcher {
//!     async fn fetch(&self, _task: &TaskKey, _unit: &UnitDescriptor) -> Result<Fetched, FetchError> {
//!         // Download the page image and write it to disk
//!         Ok(Fetched::new(0))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DownloadManager::new(Config::default(), Arc::new(HttpFetcher)).await?;
//!
//!     // Subscribe to events and keep a progress board up to date
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         let mut board = ProgressBoard::new();
//!         while let Some(event) = events.recv().await {
//!             board.apply(&event);
//!             println!("{} downloading, {} done", board.uncompleted().len(), board.completed().len());
//!         }
//!     });
//!
//!     let request = DownloadRequest::new(
//!         "Some Comic - Chapter 12",
//!         vec![UnitDescriptor::new("001", "https://img.example/12/001.jpg")],
//!     );
//!     manager.submit("some-comic/12", request).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Event bus and subscriptions
pub mod bus;
/// Configuration types
pub mod config;
/// Core download manager implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Unit fetcher abstraction
pub mod fetcher;
/// Presentation-side progress view
pub mod progress_board;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use bus::{EventBus, Subscription};
pub use config::{Config, DownloadConfig, ResubmitPolicy, RetryConfig};
pub use downloader::DownloadManager;
pub use error::{Error, FetchError, Result};
pub use fetcher::{Fetched, Fetcher};
pub use progress_board::ProgressBoard;
pub use retry::{DelaySource, IsRetryable, RetryDecision, RetryPolicy};
pub use types::{
    AbandonReason, DownloadRequest, Event, FailureKind, ProgressSnapshot, TaskKey, TaskState,
    UnitDescriptor,
};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use comic_dl::{Config, DownloadManager, Fetcher, run_with_shutdown};
/// use std::sync::Arc;
///
/// async fn serve(fetcher: Arc<dyn Fetcher>) -> Result<(), Box<dyn std::error::Error>> {
///     let manager = DownloadManager::new(Config::default(), fetcher).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: DownloadManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
