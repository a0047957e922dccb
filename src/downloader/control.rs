//! Task lifecycle control - submit, pause, resume, cancel, remove and queries.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use crate::config::ResubmitPolicy;
use crate::error::{Error, Result};
use crate::types::{DownloadRequest, Event, ProgressSnapshot, TaskKey, TaskState};

use super::DownloadManager;
use super::table::StopSignal;

impl DownloadManager {
    /// Submit a chapter for download
    ///
    /// Creates a Queued task, emits `Created` and wakes the queue processor. The task
    /// starts as soon as a concurrency slot is free and every task submitted before
    /// it has been dispatched.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyActive`] if a non-terminal task exists for `key`
    /// - [`Error::AlreadyFinished`] if a terminal task exists and the resubmit
    ///   policy is [`ResubmitPolicy::Reject`]
    /// - [`Error::InvalidRequest`] if two units share a key
    /// - [`Error::ShuttingDown`] once shutdown has begun
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use comic_dl::*;
    /// # async fn example(manager: DownloadManager) -> Result<()> {
    /// let request = DownloadRequest::new(
    ///     "Some Comic - Chapter 12",
    ///     vec![UnitDescriptor::new("001", "https://img.example/12/001.jpg")],
    /// );
    /// manager.submit("some-comic/12", request).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(
        &self,
        key: impl Into<TaskKey>,
        request: DownloadRequest,
    ) -> Result<ProgressSnapshot> {
        let key = key.into();

        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        validate_request(&request)?;

        let snapshot = {
            let mut tasks = self.tasks.lock().await;

            if let Some(existing) = tasks.get(&key) {
                if !existing.state.is_terminal() {
                    return Err(Error::AlreadyActive { key });
                }
                match self.config.download.resubmit_policy {
                    ResubmitPolicy::Reject => return Err(Error::AlreadyFinished { key }),
                    ResubmitPolicy::Restart => {
                        tracing::debug!(
                            task_key = %key,
                            previous_state = %existing.state,
                            "Replacing finished task"
                        );
                        tasks.remove(&key);
                    }
                }
            }

            let snapshot = tasks.insert(key.clone(), request);
            self.emit_event(Event::Created {
                snapshot: snapshot.clone(),
            });
            snapshot
        };

        self.queue_state.dispatch_notify.notify_one();
        tracing::info!(
            task_key = %key,
            total_units = snapshot.total_units,
            "Task submitted"
        );

        Ok(snapshot)
    }

    /// Pause a task
    ///
    /// A queued task is paused immediately. A running or retrying task is paused
    /// cooperatively: the current fetch is allowed to finish, a retry wait is cut
    /// short, and the `Paused` event follows once the runner has released its slot.
    /// Pausing a task that is already paused, or already has a pause pending, is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task exists for `key`
    /// - [`Error::InvalidTransition`] if the task already finished
    pub async fn pause(&self, key: impl Into<TaskKey>) -> Result<()> {
        let key = key.into();
        let mut tasks = self.tasks.lock().await;
        let record = tasks
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        match record.state {
            TaskState::Queued => {
                record.state = TaskState::Paused;
                let snapshot = record.snapshot();
                tasks.dequeue(&key);
                self.emit_event(Event::Paused { snapshot });
                tracing::info!(task_key = %key, "Queued task paused");
            }
            TaskState::Running | TaskState::Retrying => match record.run.as_mut() {
                Some(run) if run.pending.is_none() => {
                    run.signal(StopSignal::Pause);
                    tracing::info!(task_key = %key, state = %record.state, "Pause requested");
                }
                _ => {
                    tracing::debug!(task_key = %key, "Stop already pending, ignoring pause");
                }
            },
            TaskState::Paused => {
                // Already paused, nothing to do
            }
            state @ (TaskState::Succeeded | TaskState::Abandoned) => {
                return Err(Error::InvalidTransition {
                    key,
                    operation: "pause",
                    state,
                });
            }
        }

        Ok(())
    }

    /// Resume a paused task
    ///
    /// The task goes to the back of the queue and emits `Resumed`. Units that were
    /// already fetched are skipped when it runs again.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task exists for `key`
    /// - [`Error::InvalidTransition`] if the task is not paused
    pub async fn resume(&self, key: impl Into<TaskKey>) -> Result<()> {
        let key = key.into();
        {
            let mut tasks = self.tasks.lock().await;
            let record = tasks
                .get_mut(&key)
                .ok_or_else(|| Error::NotFound(key.clone()))?;

            if record.state != TaskState::Paused {
                return Err(Error::InvalidTransition {
                    key,
                    operation: "resume",
                    state: record.state,
                });
            }

            record.state = TaskState::Queued;
            let snapshot = record.snapshot();
            tasks.enqueue(key.clone());
            self.emit_event(Event::Resumed { snapshot });
        }

        self.queue_state.dispatch_notify.notify_one();
        tracing::info!(task_key = %key, "Task resumed");
        Ok(())
    }

    /// Cancel a task and remove it from the manager
    ///
    /// Queued and paused tasks are removed immediately. Running and retrying tasks
    /// stop cooperatively, like [`pause`](Self::pause). Either way the task's last
    /// event is a single `Removed`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task exists for `key`
    /// - [`Error::InvalidTransition`] if the task already finished (use
    ///   [`remove`](Self::remove) instead)
    pub async fn cancel(&self, key: impl Into<TaskKey>) -> Result<()> {
        let key = key.into();
        let mut tasks = self.tasks.lock().await;
        let record = tasks
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        match record.state {
            TaskState::Queued | TaskState::Paused => {
                tasks.remove(&key);
                self.emit_event(Event::Removed { key: key.clone() });
                tracing::info!(task_key = %key, "Task cancelled");
            }
            TaskState::Running | TaskState::Retrying => {
                if let Some(run) = record.run.as_mut() {
                    run.signal(StopSignal::Cancel);
                }
                tracing::info!(task_key = %key, state = %record.state, "Cancel requested");
            }
            state @ (TaskState::Succeeded | TaskState::Abandoned) => {
                return Err(Error::InvalidTransition {
                    key,
                    operation: "cancel",
                    state,
                });
            }
        }

        Ok(())
    }

    /// Forget a finished task
    ///
    /// Clears it from [`list_completed`](Self::list_completed). No event is emitted.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task exists for `key`
    /// - [`Error::InvalidTransition`] if the task has not finished
    pub async fn remove(&self, key: impl Into<TaskKey>) -> Result<()> {
        let key = key.into();
        let mut tasks = self.tasks.lock().await;
        let state = tasks
            .get(&key)
            .map(|record| record.state)
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        if !state.is_terminal() {
            return Err(Error::InvalidTransition {
                key,
                operation: "remove",
                state,
            });
        }

        tasks.remove(&key);
        tracing::debug!(task_key = %key, "Finished task removed");
        Ok(())
    }

    /// Pause every queued, running or retrying task
    ///
    /// Individual failures are logged and skipped. Returns how many tasks were
    /// paused or had a pause requested.
    pub async fn pause_all(&self) -> usize {
        let keys = self
            .keys_in_states(&[TaskState::Queued, TaskState::Running, TaskState::Retrying])
            .await;

        let mut paused = 0;
        for key in keys {
            match self.pause(key.clone()).await {
                Ok(()) => paused += 1,
                Err(e) => {
                    tracing::warn!(task_key = %key, error = %e, "Failed to pause task");
                }
            }
        }

        tracing::info!(paused, "Paused all tasks");
        paused
    }

    /// Resume every paused task, in submission order
    ///
    /// Individual failures are logged and skipped. Returns how many tasks were
    /// resumed.
    pub async fn resume_all(&self) -> usize {
        let keys = self.keys_in_states(&[TaskState::Paused]).await;

        let mut resumed = 0;
        for key in keys {
            match self.resume(key.clone()).await {
                Ok(()) => resumed += 1,
                Err(e) => {
                    tracing::warn!(task_key = %key, error = %e, "Failed to resume task");
                }
            }
        }

        tracing::info!(resumed, "Resumed all tasks");
        resumed
    }

    /// Snapshots of every task that has not finished, in submission order
    pub async fn list_active(&self) -> Vec<ProgressSnapshot> {
        self.tasks
            .lock()
            .await
            .snapshots(|record| !record.state.is_terminal())
    }

    /// Snapshots of every finished task, in submission order
    pub async fn list_completed(&self) -> Vec<ProgressSnapshot> {
        self.tasks
            .lock()
            .await
            .snapshots(|record| record.state.is_terminal())
    }

    /// Current snapshot of one task
    pub async fn get(&self, key: impl Into<TaskKey>) -> Option<ProgressSnapshot> {
        let key = key.into();
        self.tasks.lock().await.get(&key).map(|record| record.snapshot())
    }

    async fn keys_in_states(&self, states: &[TaskState]) -> Vec<TaskKey> {
        let tasks = self.tasks.lock().await;
        tasks
            .keys_in_order()
            .into_iter()
            .filter(|key| {
                tasks
                    .get(key)
                    .is_some_and(|record| states.contains(&record.state))
            })
            .collect()
    }
}

fn validate_request(request: &DownloadRequest) -> Result<()> {
    let mut seen = HashSet::with_capacity(request.units.len());
    for unit in &request.units {
        if !seen.insert(unit.key.as_str()) {
            return Err(Error::InvalidRequest(format!(
                "duplicate unit key '{}'",
                unit.key
            )));
        }
    }
    Ok(())
}
