//! Configuration types for comic-dl

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Task scheduling configuration (concurrency, event delivery, shutdown)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum chapters downloading at the same time (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Per-subscriber event backlog before the oldest events are dropped (default: 1000)
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// How often aggregate throughput is published (None = never, default: 1 second)
    #[serde(
        default = "default_speed_report_interval",
        with = "optional_duration_serde"
    )]
    pub speed_report_interval: Option<Duration>,

    /// How long shutdown waits for running tasks to stop (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// What happens when a finished task's key is submitted again
    #[serde(default)]
    pub resubmit_policy: ResubmitPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            event_buffer_size: default_event_buffer_size(),
            speed_report_interval: default_speed_report_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            resubmit_policy: ResubmitPolicy::default(),
        }
    }
}

/// Policy for submitting a key whose previous task already finished
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmitPolicy {
    /// Replace the finished task with a fresh one starting from zero (default)
    #[default]
    Restart,
    /// Reject until the finished task is removed
    Reject,
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total fetch attempts per unit, including the first one (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to computed backoff delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Wait after a rate limit response that carried no hint (default: 60 seconds)
    #[serde(default = "default_rate_limit_delay", with = "duration_serde")]
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            rate_limit_delay: default_rate_limit_delay(),
        }
    }
}

/// Main configuration for DownloadManager
///
/// Scheduling settings are flattened so the serialized form stays a flat object,
/// retry settings live under `retry`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling settings (concurrency, event delivery, shutdown)
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Retry behavior for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_tasks == 0 {
            return Err(config_error(
                "max_concurrent_tasks must be at least 1",
                "max_concurrent_tasks",
            ));
        }
        if self.download.event_buffer_size == 0 {
            return Err(config_error(
                "event_buffer_size must be at least 1",
                "event_buffer_size",
            ));
        }
        if self.download.speed_report_interval == Some(Duration::ZERO) {
            return Err(config_error(
                "speed_report_interval must be positive (omit it to disable)",
                "speed_report_interval",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be >= 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "initial_delay must not exceed max_delay",
                "retry.initial_delay",
            ));
        }
        Ok(())
    }

    /// Maximum concurrent tasks
    pub fn max_concurrent_tasks(&self) -> usize {
        self.download.max_concurrent_tasks
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_max_concurrent() -> usize {
    3
}

fn default_event_buffer_size() -> usize {
    1000
}

fn default_speed_report_interval() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_delay() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
