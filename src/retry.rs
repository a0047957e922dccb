//! Retry policy with exponential backoff
//!
//! [`RetryPolicy::decide`] is a pure function of the failure and the attempt number.
//! It never sleeps and keeps no state, so the same inputs always give the same
//! decision. Jitter is layered on top by the caller through [`add_jitter`], and only
//! for computed backoff delays; a server-suggested wait is honored as-is, up to
//! [`MAX_SERVER_HINT`].
//!
//! # Example
//!
//! ```
//! use comic_dl::config::RetryConfig;
//! use comic_dl::retry::{RetryDecision, RetryPolicy};
//! use comic_dl::FailureKind;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(RetryConfig::default());
//! match policy.decide(FailureKind::Timeout, 1, None) {
//!     RetryDecision::Retry { after, .. } => assert_eq!(after, Duration::from_secs(1)),
//!     RetryDecision::Abandon(reason) => panic!("unexpected abandon: {reason}"),
//! }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::types::{AbandonReason, FailureKind};
use rand::Rng;
use std::time::Duration;

/// Longest server-suggested wait honored; larger hints are clamped to this
pub const MAX_SERVER_HINT: Duration = Duration::from_secs(60 * 60);

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, rate limiting, server errors) should return `true`.
/// Permanent failures (not found, authentication, banned) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

impl IsRetryable for FailureKind {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Where a retry delay came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelaySource {
    /// Computed exponential backoff (jitter may be applied)
    Backoff,
    /// Wait suggested by the server (honored exactly, up to [`MAX_SERVER_HINT`])
    ServerHint,
}

/// Outcome of consulting the retry policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the same unit after waiting
    Retry {
        /// How long to wait before the next attempt
        after: Duration,
        /// Where the delay came from
        source: DelaySource,
    },
    /// Give up on the task
    Abandon(AbandonReason),
}

/// Bounded exponential backoff with failure-kind overrides
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from retry configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configuration this policy was built from
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what to do after a failed attempt
    ///
    /// `attempt` is the 1-based count of failed attempts on the current unit,
    /// including the one being classified. `hint` is a server-suggested wait and is
    /// only consulted for rate limiting.
    pub fn decide(
        &self,
        kind: FailureKind,
        attempt: u32,
        hint: Option<Duration>,
    ) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::Abandon(AbandonReason::Permanent { kind });
        }

        if attempt >= self.config.max_attempts {
            return RetryDecision::Abandon(AbandonReason::RetriesExhausted { last: kind });
        }

        match (kind, hint) {
            (FailureKind::RateLimited, Some(wait)) => RetryDecision::Retry {
                after: wait.min(MAX_SERVER_HINT),
                source: DelaySource::ServerHint,
            },
            (FailureKind::RateLimited, None) => RetryDecision::Retry {
                after: self.config.rate_limit_delay.min(self.config.max_delay),
                source: DelaySource::Backoff,
            },
            _ => RetryDecision::Retry {
                after: self.backoff_delay(attempt),
                source: DelaySource::Backoff,
            },
        }
    }

    /// Convenience wrapper for a fetch error
    pub fn decide_for(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        self.decide(error.kind(), attempt, error.retry_after_hint())
    }

    /// Computed backoff for the given 1-based attempt, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);
        let max = self.config.max_delay;
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs).min(max)
    }

    /// Final wait for a decision, applying jitter to computed backoff when enabled
    pub fn effective_wait(&self, after: Duration, source: DelaySource) -> Duration {
        match source {
            DelaySource::Backoff if self.config.jitter => {
                add_jitter(after).min(self.config.max_delay)
            }
            _ => after,
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
pub fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
