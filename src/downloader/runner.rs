//! Task runner - drives one task's units through the fetcher.
//!
//! A runner owns a concurrency slot for as long as it lives, including while it
//! waits out a retry backoff. It never mutates the task table itself; every state
//! change is sent as a [`RunnerReport`] and applied by the manager under the table
//! lock, which is also where the matching event is published.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::fetcher::Fetcher;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{TaskKey, UnitDescriptor};

use super::DownloadManager;
use super::table::{Applied, RunAssignment, RunnerReport, TaskTable};

/// Everything one run needs, detached from the manager handle
pub(crate) struct TaskRunner {
    key: TaskKey,
    run_id: u64,
    cancel_token: CancellationToken,
    pending_units: Vec<(usize, UnitDescriptor)>,
    /// Failed attempts on the unit currently being fetched
    attempt: u32,
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<RetryPolicy>,
    tasks: Arc<tokio::sync::Mutex<TaskTable>>,
    bus: EventBus,
    bytes_counter: Arc<AtomicU64>,
}

impl TaskRunner {
    pub(crate) fn new(manager: &DownloadManager, assignment: RunAssignment) -> Self {
        Self {
            key: assignment.key,
            run_id: assignment.run_id,
            cancel_token: assignment.cancel_token,
            pending_units: assignment.pending_units,
            attempt: assignment.attempt,
            fetcher: Arc::clone(&manager.fetcher),
            policy: Arc::clone(&manager.policy),
            tasks: Arc::clone(&manager.tasks),
            bus: manager.bus.clone(),
            bytes_counter: Arc::clone(&manager.bytes_counter),
        }
    }

    /// Fetch every pending unit in order, then report success
    ///
    /// A pause or cancel raised while a fetch is in flight lets that fetch finish,
    /// then takes precedence over whatever outcome it led to.
    pub(crate) async fn run(mut self) {
        tracing::info!(
            task_key = %self.key,
            run_id = self.run_id,
            pending_units = self.pending_units.len(),
            "Task started"
        );

        let units = std::mem::take(&mut self.pending_units);
        for (index, unit) in &units {
            if self.fetch_unit(*index, unit).await.is_break() {
                return;
            }
        }

        // A signal raised during the last fetch is honored before finishing
        if self.cancel_token.is_cancelled() {
            self.stop().await;
            return;
        }

        if self.report(RunnerReport::Succeeded).await {
            tracing::info!(task_key = %self.key, "Task completed");
        }
    }

    /// Fetch one unit, retrying transient failures as the policy allows
    ///
    /// Breaks when the run is over: stopped by a signal, abandoned, or superseded.
    async fn fetch_unit(&mut self, index: usize, unit: &UnitDescriptor) -> ControlFlow<()> {
        loop {
            if self.cancel_token.is_cancelled() {
                return self.stop().await;
            }

            let error = match self.fetcher.fetch(&self.key, unit).await {
                Ok(fetched) => {
                    self.bytes_counter
                        .fetch_add(fetched.bytes, Ordering::Relaxed);
                    self.attempt = 0;
                    tracing::debug!(
                        task_key = %self.key,
                        unit = %unit.key,
                        bytes = fetched.bytes,
                        "Unit fetched"
                    );
                    let report = RunnerReport::UnitDone {
                        index,
                        bytes: fetched.bytes,
                    };
                    return if self.report(report).await {
                        ControlFlow::Continue(())
                    } else {
                        ControlFlow::Break(())
                    };
                }
                Err(error) => error,
            };

            self.attempt = self.attempt.saturating_add(1);
            match self.policy.decide_for(&error, self.attempt) {
                RetryDecision::Abandon(reason) => {
                    if self.cancel_token.is_cancelled() {
                        return self.stop().await;
                    }

                    tracing::warn!(
                        task_key = %self.key,
                        unit = %unit.key,
                        attempt = self.attempt,
                        error = %error,
                        reason = %reason,
                        "Task abandoned"
                    );
                    let report = RunnerReport::Abandoned {
                        reason,
                        attempt: self.attempt,
                    };
                    self.report(report).await;
                    return ControlFlow::Break(());
                }
                RetryDecision::Retry { after, source } => {
                    if self.cancel_token.is_cancelled() {
                        return self.stop().await;
                    }

                    let wait = self.policy.effective_wait(after, source);
                    tracing::debug!(
                        task_key = %self.key,
                        unit = %unit.key,
                        attempt = self.attempt,
                        error = %error,
                        wait_ms = wait.as_millis() as u64,
                        "Unit failed, retrying"
                    );
                    let report = RunnerReport::Retrying {
                        kind: error.kind(),
                        attempt: self.attempt,
                        wait,
                    };
                    if !self.report(report).await {
                        return ControlFlow::Break(());
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancel_token.cancelled() => return self.stop().await,
                    }

                    if !self.report(RunnerReport::RetryElapsed).await {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Acknowledge a pending pause or cancel
    async fn stop(&self) -> ControlFlow<()> {
        tracing::debug!(task_key = %self.key, run_id = self.run_id, "Run stopped on signal");
        self.report(RunnerReport::Stopped).await;
        ControlFlow::Break(())
    }

    /// Apply a report to the table and publish its event under the same lock
    ///
    /// Returns false when this run has been superseded and must end silently.
    async fn report(&self, report: RunnerReport) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.apply_report(&self.key, self.run_id, report) {
            Applied::Current(event) => {
                if let Some(event) = event {
                    self.bus.publish(event);
                }
                true
            }
            Applied::Stale => {
                tracing::debug!(
                    task_key = %self.key,
                    run_id = self.run_id,
                    "Run superseded, dropping report"
                );
                false
            }
        }
    }
}
