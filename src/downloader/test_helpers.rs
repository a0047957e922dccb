//! Shared test helpers for creating DownloadManager instances in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::bus::Subscription;
use crate::config::Config;
use crate::downloader::DownloadManager;
use crate::error::FetchError;
use crate::fetcher::{Fetched, Fetcher};
use crate::types::{DownloadRequest, Event, ProgressSnapshot, TaskKey, TaskState, UnitDescriptor};

/// Bytes reported for a unit that has no scripted result
pub(crate) const UNIT_BYTES: u64 = 1024;

/// Upper bound on how long a test waits for an event (virtual time under a paused clock)
const EVENT_TIMEOUT: Duration = Duration::from_secs(600);

type FetchResult = std::result::Result<Fetched, FetchError>;

/// Scripted fetcher: per (task, unit) result queues, then a per-task fallback,
/// then success with [`UNIT_BYTES`].
#[derive(Default)]
pub(crate) struct MockFetcher {
    scripts: std::sync::Mutex<HashMap<(String, String), VecDeque<FetchResult>>>,
    fallbacks: std::sync::Mutex<HashMap<String, FetchError>>,
    calls: std::sync::Mutex<Vec<(TaskKey, String)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` before returning
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Results returned, in order, for the next fetches of one unit
    pub(crate) fn script(&self, task: &str, unit: &str, results: Vec<FetchResult>) {
        self.scripts
            .lock()
            .unwrap()
            .entry((task.to_string(), unit.to_string()))
            .or_default()
            .extend(results);
    }

    /// Every unscripted fetch of `task` fails with `error`
    pub(crate) fn always_fail(&self, task: &str, error: FetchError) {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(task.to_string(), error);
    }

    pub(crate) fn calls_for(&self, task: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == &task)
            .count()
    }

    pub(crate) fn unit_calls(&self, task: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == &task)
            .map(|(_, unit)| unit.clone())
            .collect()
    }

    /// Task keys in the order their fetches started
    pub(crate) fn task_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for (key, _) in self.calls.lock().unwrap().iter() {
            if order.last().map(String::as_str) != Some(key.as_str()) {
                order.push(key.to_string());
            }
        }
        order
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self, task: &TaskKey, unit: &UnitDescriptor) -> FetchResult {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(task.to_string(), unit.key.clone()))
            .and_then(VecDeque::pop_front);
        if let Some(result) = scripted {
            return result;
        }
        if let Some(error) = self.fallbacks.lock().unwrap().get(task.as_str()) {
            return Err(error.clone());
        }
        Ok(Fetched::new(UNIT_BYTES))
    }
}

#[async_trait::async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, task: &TaskKey, unit: &UnitDescriptor) -> FetchResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((task.clone(), unit.key.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = self.next_result(task, unit);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Fast, deterministic configuration: no jitter, no speed reports, short backoff
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.download.max_concurrent_tasks = 2;
    config.download.speed_report_interval = None;
    config.download.shutdown_timeout = Duration::from_secs(5);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_secs(1);
    config.retry.max_delay = Duration::from_secs(8);
    config.retry.jitter = false;
    config.retry.rate_limit_delay = Duration::from_secs(4);
    config
}

/// Helper to create a test DownloadManager around a mock fetcher
pub(crate) async fn create_test_manager(fetcher: Arc<MockFetcher>) -> DownloadManager {
    create_test_manager_with(test_config(), fetcher).await
}

pub(crate) async fn create_test_manager_with(
    config: Config,
    fetcher: Arc<MockFetcher>,
) -> DownloadManager {
    DownloadManager::new(config, fetcher).await.unwrap()
}

/// Request with `units` pages keyed p0, p1, ...
pub(crate) fn request(units: usize) -> DownloadRequest {
    DownloadRequest::new(
        "Test Comic - Chapter",
        (0..units)
            .map(|i| UnitDescriptor::new(format!("p{i}"), format!("https://img.test/{i}.jpg")))
            .collect(),
    )
}

/// Next event belonging to `key`, skipping everything else
pub(crate) async fn next_event_for(sub: &mut Subscription, key: &str) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match sub.recv().await {
                Some(event) if event.key().is_some_and(|k| k == &key) => return event,
                Some(_) => continue,
                None => panic!("subscription ended while waiting for {key}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for an event for {key}"))
}

/// Events for `key` up to and including its terminal event
pub(crate) async fn collect_task_events(sub: &mut Subscription, key: &str) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event_for(sub, key).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Events for `key` up to and including the first one matching `pred`
pub(crate) async fn collect_until(
    sub: &mut Subscription,
    key: &str,
    pred: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event_for(sub, key).await;
        let done = pred(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Poll the manager until `key` reaches `state`
pub(crate) async fn wait_for_state(
    manager: &DownloadManager,
    key: &str,
    state: TaskState,
) -> ProgressSnapshot {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if let Some(snapshot) = manager.get(key).await
                && snapshot.state == state
            {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {key} to reach {state}"))
}

/// Short name for an event, used in sequence assertions
pub(crate) fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Created { .. } => "created",
        Event::Updated { .. } => "updated",
        Event::Retrying { .. } => "retrying",
        Event::Paused { .. } => "paused",
        Event::Resumed { .. } => "resumed",
        Event::Succeeded { .. } => "succeeded",
        Event::Failed { .. } => "failed",
        Event::Removed { .. } => "removed",
        Event::Speed { .. } => "speed",
        Event::Gap { .. } => "gap",
        Event::Shutdown => "shutdown",
    }
}

pub(crate) fn event_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(event_name).collect()
}
