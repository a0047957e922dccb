//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::types::Event;

use super::DownloadManager;
use super::table::StopSignal;

/// Interval between checks for runners that have not yet released their slot
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl DownloadManager {
    /// Gracefully shut down the manager
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new submissions
    /// 2. Stops the queue processor so no further task is dispatched
    /// 3. Signals every running task to pause (the current fetch is allowed to finish)
    /// 4. Waits for runners to release their slots, bounded by `shutdown_timeout`
    /// 5. Emits `Shutdown`, which ends every subscription and closes the event bus
    ///
    /// Queued tasks stay queued and paused tasks stay paused. A runner that outlives
    /// the timeout still updates the task table, but its events are dropped. Calling
    /// this more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.queue_state.accepting_new.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return Ok(());
        }
        tracing::info!("Initiating graceful shutdown");

        // Stop dispatching before signalling, so nothing starts after the pause sweep
        self.queue_state.shutdown_token.cancel();
        let handles: Vec<_> = self.queue_state.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background service ended abnormally");
            }
        }
        tracing::info!("Stopped dispatching new tasks");

        self.pause_graceful_all().await;

        let shutdown_timeout = self.config.download.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_active_runs()).await {
            Ok(()) => {
                tracing::info!("All running tasks stopped gracefully");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Timeout waiting for running tasks to stop, proceeding with shutdown"
                );
            }
        }

        self.queue_state.concurrent_limit.close();
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    /// Signal a graceful pause to every run that owns a slot
    pub(crate) async fn pause_graceful_all(&self) {
        let mut tasks = self.tasks.lock().await;
        let mut signalled = 0;
        for (key, run) in tasks.active_runs_mut() {
            tracing::debug!(task_key = %key, "Signaling graceful pause");
            run.signal(StopSignal::Pause);
            signalled += 1;
        }
        tracing::debug!(active_count = signalled, "Gracefully pausing all running tasks");
    }

    /// Wait until no run owns a slot
    async fn wait_for_active_runs(&self) {
        loop {
            let active_count = self.tasks.lock().await.active_run_count();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for running tasks to stop");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
