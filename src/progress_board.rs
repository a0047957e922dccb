//! Progress board - the presentation-side view of every task.
//!
//! A [`ProgressBoard`] is fed from a [`Subscription`](crate::Subscription) and keeps
//! the newest snapshot per task. The "downloading" and "completed" tabs are derived
//! on each query by filtering on terminal state; nothing else is stored.
//!
//! When the feed reports a [`Event::Gap`] some updates were lost. The board keeps
//! what it has and counts the loss; call [`ProgressBoard::resync`] with the
//! manager's current lists to get back in step.

use std::collections::HashMap;

use crate::types::{Event, ProgressSnapshot, TaskKey};

/// Key to latest-snapshot map maintained from task events
#[derive(Clone, Debug, Default)]
pub struct ProgressBoard {
    snapshots: HashMap<TaskKey, ProgressSnapshot>,
    bytes_per_sec: u64,
    missed_events: u64,
}

impl ProgressBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event into the board
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Created { snapshot }
            | Event::Updated { snapshot }
            | Event::Retrying { snapshot, .. }
            | Event::Paused { snapshot }
            | Event::Resumed { snapshot }
            | Event::Succeeded { snapshot }
            | Event::Failed { snapshot, .. } => {
                self.snapshots
                    .insert(snapshot.key.clone(), snapshot.clone());
            }
            Event::Removed { key } => {
                self.snapshots.remove(key);
            }
            Event::Speed { bytes_per_sec } => {
                self.bytes_per_sec = *bytes_per_sec;
            }
            Event::Gap { missed } => {
                self.missed_events += missed;
            }
            Event::Shutdown => {
                self.bytes_per_sec = 0;
            }
        }
    }

    /// Replace the board's contents with authoritative snapshots
    ///
    /// Typically fed with `list_active()` followed by `list_completed()`.
    pub fn resync(&mut self, snapshots: impl IntoIterator<Item = ProgressSnapshot>) {
        self.snapshots = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.key.clone(), snapshot))
            .collect();
        self.missed_events = 0;
    }

    /// Tasks still in progress, in submission order
    pub fn uncompleted(&self) -> Vec<&ProgressSnapshot> {
        self.filtered(|snapshot| !snapshot.state.is_terminal())
    }

    /// Finished tasks, in submission order
    pub fn completed(&self) -> Vec<&ProgressSnapshot> {
        self.filtered(|snapshot| snapshot.state.is_terminal())
    }

    /// Latest snapshot for one task
    pub fn get(&self, key: &TaskKey) -> Option<&ProgressSnapshot> {
        self.snapshots.get(key)
    }

    /// Drop a task from the board (e.g. after removing it from the manager)
    pub fn forget(&mut self, key: &TaskKey) -> Option<ProgressSnapshot> {
        self.snapshots.remove(key)
    }

    /// Most recently reported aggregate throughput
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Events lost to lag since the last resync
    pub fn missed_events(&self) -> u64 {
        self.missed_events
    }

    /// Whether a resync is advisable
    pub fn is_stale(&self) -> bool {
        self.missed_events > 0
    }

    /// Number of tasks on the board
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the board has no tasks
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn filtered(&self, keep: impl Fn(&ProgressSnapshot) -> bool) -> Vec<&ProgressSnapshot> {
        let mut snapshots: Vec<&ProgressSnapshot> =
            self.snapshots.values().filter(|s| keep(s)).collect();
        snapshots.sort_by_key(|snapshot| snapshot.sequence);
        snapshots
    }
}
