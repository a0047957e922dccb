//! Scripted fetcher and request builders

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use comic_dl::{
    Config, DownloadRequest, FetchError, Fetched, Fetcher, TaskKey, UnitDescriptor,
};

/// Bytes reported for every successful page fetch
pub const PAGE_BYTES: u64 = 2048;

type FetchResult = Result<Fetched, FetchError>;

/// Fetcher whose failures are scripted per (task, page)
///
/// Unscripted fetches succeed with [`PAGE_BYTES`] after the configured latency.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<(String, String), VecDeque<FetchResult>>>,
    log: Mutex<Vec<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queue results for the next fetches of one page
    pub fn script(&self, task: &str, page: &str, results: Vec<FetchResult>) {
        self.scripts
            .lock()
            .unwrap()
            .entry((task.to_string(), page.to_string()))
            .or_default()
            .extend(results);
    }

    /// Number of fetches issued for `task`
    pub fn fetches(&self, task: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|t| *t == task).count()
    }

    /// Highest number of fetches that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, task: &TaskKey, unit: &UnitDescriptor) -> FetchResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(task.to_string());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(task.to_string(), unit.key.clone()))
            .and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or(Ok(Fetched::new(PAGE_BYTES)))
    }
}

/// A chapter of `pages` pages keyed 001, 002, ...
pub fn chapter(title: &str, pages: usize) -> DownloadRequest {
    DownloadRequest::new(
        title,
        (1..=pages)
            .map(|n| {
                UnitDescriptor::new(
                    format!("{n:03}"),
                    format!("https://img.example/{title}/{n:03}.jpg"),
                )
            })
            .collect(),
    )
}

/// Deterministic configuration for scenario tests
pub fn scenario_config(max_concurrent_tasks: usize) -> Config {
    let mut config = Config::default();
    config.download.max_concurrent_tasks = max_concurrent_tasks;
    config.download.speed_report_interval = None;
    config.retry.jitter = false;
    config
}
