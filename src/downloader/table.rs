//! Task table - the manager's single source of truth for task state.
//!
//! Runners never touch a [`TaskRecord`] directly. They send a [`RunnerReport`] tagged
//! with their run id and the manager applies it here under the table lock. A report
//! from a run that is no longer current (the task was cancelled, or restarted under
//! the same key) is discarded.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{
    AbandonReason, DownloadRequest, Event, FailureKind, ProgressSnapshot, TaskKey, TaskState,
    UnitDescriptor, indicator, percentage,
};

/// Fetch progress of one unit
#[derive(Clone, Debug)]
pub(crate) struct UnitProgress {
    pub(crate) descriptor: UnitDescriptor,
    pub(crate) bytes: u64,
    pub(crate) completed: bool,
}

/// Cooperative stop request raised against a running task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StopSignal {
    Pause,
    Cancel,
}

/// The run currently owning a task's concurrency slot
#[derive(Debug)]
pub(crate) struct ActiveRun {
    pub(crate) id: u64,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) pending: Option<StopSignal>,
}

impl ActiveRun {
    /// Raise a stop signal and wake the runner if it is waiting out a backoff
    ///
    /// A pending cancel is never downgraded to a pause.
    pub(crate) fn signal(&mut self, signal: StopSignal) {
        if self.pending != Some(StopSignal::Cancel) {
            self.pending = Some(signal);
        }
        self.cancel_token.cancel();
    }
}

/// Everything the manager knows about one task
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub(crate) key: TaskKey,
    pub(crate) title: String,
    pub(crate) sequence: u64,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) units: Vec<UnitProgress>,
    pub(crate) state: TaskState,
    pub(crate) attempt: u32,
    pub(crate) last_failure: Option<FailureKind>,
    pub(crate) abandon_reason: Option<AbandonReason>,
    pub(crate) retry_at: Option<Instant>,
    pub(crate) run: Option<ActiveRun>,
}

impl TaskRecord {
    fn completed_units(&self) -> u32 {
        saturating_u32(self.units.iter().filter(|u| u.completed).count())
    }

    fn downloaded_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.bytes).sum()
    }

    /// Immutable view of the record as it is right now
    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let retry_after_secs = match (self.state, self.retry_at) {
            (TaskState::Retrying, Some(at)) => {
                Some(ceil_secs(at.saturating_duration_since(Instant::now())))
            }
            _ => None,
        };
        let completed_units = self.completed_units();
        let total_units = saturating_u32(self.units.len());

        ProgressSnapshot {
            key: self.key.clone(),
            title: self.title.clone(),
            state: self.state,
            completed_units,
            total_units,
            downloaded_bytes: self.downloaded_bytes(),
            percentage: percentage(completed_units, total_units),
            indicator: indicator(self.state, retry_after_secs, self.abandon_reason),
            retry_after_secs,
            attempt: self.attempt,
            last_failure: self.last_failure,
            sequence: self.sequence,
            submitted_at: self.submitted_at,
        }
    }
}

/// Report a runner sends about its own run
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunnerReport {
    /// Unit at `index` fetched
    UnitDone { index: usize, bytes: u64 },
    /// Current unit failed transiently, waiting `wait` before the next attempt
    Retrying {
        kind: FailureKind,
        attempt: u32,
        wait: Duration,
    },
    /// Retry wait elapsed, fetching again
    RetryElapsed,
    /// Every unit fetched
    Succeeded,
    /// Gave up on the task
    Abandoned { reason: AbandonReason, attempt: u32 },
    /// Honored a pending stop signal
    Stopped,
}

/// Result of applying a runner report
#[derive(Debug, PartialEq)]
pub(crate) enum Applied {
    /// The report was applied; publish the event if there is one
    Current(Option<Event>),
    /// The run is no longer current and must stop without further reports
    Stale,
}

/// Work handed to a runner when its task is dispatched
#[derive(Debug)]
pub(crate) struct RunAssignment {
    pub(crate) key: TaskKey,
    pub(crate) run_id: u64,
    pub(crate) cancel_token: CancellationToken,
    /// Units still to fetch, with their index in the task
    pub(crate) pending_units: Vec<(usize, UnitDescriptor)>,
    /// Failed attempts already spent on the first pending unit
    pub(crate) attempt: u32,
}

/// All tasks plus the FIFO of queued keys
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    records: HashMap<TaskKey, TaskRecord>,
    queue: VecDeque<TaskKey>,
    next_sequence: u64,
    next_run_id: u64,
}

impl TaskTable {
    pub(crate) fn get(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &TaskKey) -> Option<&mut TaskRecord> {
        self.records.get_mut(key)
    }

    /// Insert a fresh Queued task at the back of the queue
    pub(crate) fn insert(&mut self, key: TaskKey, request: DownloadRequest) -> ProgressSnapshot {
        self.next_sequence += 1;
        let units = request
            .units
            .into_iter()
            .map(|descriptor| UnitProgress {
                descriptor,
                bytes: 0,
                completed: false,
            })
            .collect();

        let record = TaskRecord {
            key: key.clone(),
            title: request.title,
            sequence: self.next_sequence,
            submitted_at: Utc::now(),
            units,
            state: TaskState::Queued,
            attempt: 0,
            last_failure: None,
            abandon_reason: None,
            retry_at: None,
            run: None,
        };
        let snapshot = record.snapshot();
        self.records.insert(key.clone(), record);
        self.queue.push_back(key);
        snapshot
    }

    /// Drop a task entirely, including its queue entry
    pub(crate) fn remove(&mut self, key: &TaskKey) -> Option<TaskRecord> {
        self.dequeue(key);
        self.records.remove(key)
    }

    pub(crate) fn enqueue(&mut self, key: TaskKey) {
        self.queue.push_back(key);
    }

    pub(crate) fn dequeue(&mut self, key: &TaskKey) {
        self.queue.retain(|queued| queued != key);
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Pop the oldest queued task and mark it Running under a new run
    pub(crate) fn start_next(&mut self) -> Option<RunAssignment> {
        while let Some(key) = self.queue.pop_front() {
            let Some(record) = self.records.get_mut(&key) else {
                continue;
            };
            if record.state != TaskState::Queued {
                continue;
            }

            self.next_run_id += 1;
            let cancel_token = CancellationToken::new();
            record.state = TaskState::Running;
            record.retry_at = None;
            record.run = Some(ActiveRun {
                id: self.next_run_id,
                cancel_token: cancel_token.clone(),
                pending: None,
            });

            let pending_units = record
                .units
                .iter()
                .enumerate()
                .filter(|(_, unit)| !unit.completed)
                .map(|(index, unit)| (index, unit.descriptor.clone()))
                .collect();

            return Some(RunAssignment {
                key,
                run_id: self.next_run_id,
                cancel_token,
                pending_units,
                attempt: record.attempt,
            });
        }
        None
    }

    /// Apply a runner report, returning the event to publish
    pub(crate) fn apply_report(
        &mut self,
        key: &TaskKey,
        run_id: u64,
        report: RunnerReport,
    ) -> Applied {
        let Some(record) = self
            .records
            .get_mut(key)
            .filter(|record| record.run.as_ref().is_some_and(|run| run.id == run_id))
        else {
            return Applied::Stale;
        };

        let mut remove = false;
        let event = match report {
            RunnerReport::UnitDone { index, bytes } => {
                if let Some(unit) = record.units.get_mut(index) {
                    unit.completed = true;
                    unit.bytes = bytes;
                }
                record.attempt = 0;
                record.last_failure = None;
                Some(Event::Updated {
                    snapshot: record.snapshot(),
                })
            }
            RunnerReport::Retrying {
                kind,
                attempt,
                wait,
            } => {
                record.state = TaskState::Retrying;
                record.attempt = attempt;
                record.last_failure = Some(kind);
                record.retry_at = Instant::now().checked_add(wait);
                Some(Event::Retrying {
                    snapshot: record.snapshot(),
                    wait_secs: ceil_secs(wait),
                })
            }
            RunnerReport::RetryElapsed => {
                record.state = TaskState::Running;
                record.retry_at = None;
                None
            }
            RunnerReport::Succeeded => {
                record.state = TaskState::Succeeded;
                record.retry_at = None;
                record.run = None;
                Some(Event::Succeeded {
                    snapshot: record.snapshot(),
                })
            }
            RunnerReport::Abandoned { reason, attempt } => {
                record.state = TaskState::Abandoned;
                record.attempt = attempt;
                record.last_failure = Some(reason.kind());
                record.abandon_reason = Some(reason);
                record.retry_at = None;
                record.run = None;
                Some(Event::Failed {
                    snapshot: record.snapshot(),
                    reason,
                })
            }
            RunnerReport::Stopped => {
                let pending = record.run.take().and_then(|run| run.pending);
                record.retry_at = None;
                if pending == Some(StopSignal::Cancel) {
                    remove = true;
                    Some(Event::Removed { key: key.clone() })
                } else {
                    record.state = TaskState::Paused;
                    Some(Event::Paused {
                        snapshot: record.snapshot(),
                    })
                }
            }
        };

        if remove {
            self.remove(key);
        }
        Applied::Current(event)
    }

    /// Snapshots of records matching `filter`, in submission order
    pub(crate) fn snapshots(&self, filter: impl Fn(&TaskRecord) -> bool) -> Vec<ProgressSnapshot> {
        let mut records: Vec<&TaskRecord> = self.records.values().filter(|r| filter(r)).collect();
        records.sort_by_key(|record| record.sequence);
        records.into_iter().map(TaskRecord::snapshot).collect()
    }

    /// Keys of all tasks, in submission order
    pub(crate) fn keys_in_order(&self) -> Vec<TaskKey> {
        let mut records: Vec<&TaskRecord> = self.records.values().collect();
        records.sort_by_key(|record| record.sequence);
        records.into_iter().map(|record| record.key.clone()).collect()
    }

    /// Runs that currently own a concurrency slot
    pub(crate) fn active_runs_mut(&mut self) -> impl Iterator<Item = (&TaskKey, &mut ActiveRun)> {
        self.records
            .iter_mut()
            .filter_map(|(key, record)| record.run.as_mut().map(|run| (key, run)))
    }

    pub(crate) fn active_run_count(&self) -> usize {
        self.records.values().filter(|r| r.run.is_some()).count()
    }
}

/// Whole seconds, rounded up
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0))
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
