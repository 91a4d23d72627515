//! Retry policy with exponential backoff for transient fetch failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use microsync_common::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive transient failures retried before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check that the configuration describes a bounded, growing backoff.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidInput(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::InvalidInput(format!(
                "initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%, still within the cap
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            (capped_delay * jitter_factor).min(self.max_delay.as_millis() as f64)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(6)
    }
}

/// Classification of a failed loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble or timeout; worth retrying.
    Transient,
    /// Unknown service or malformed response.
    Permanent,
    /// Store failure unrelated to concurrency.
    Merge,
    /// Lost an optimistic-concurrency race.
    Conflict,
}

impl FailureKind {
    /// Classify an error from the fetch or merge step.
    pub fn of(err: &Error) -> Self {
        match err {
            e if e.is_transient() => FailureKind::Transient,
            Error::Merge(_) | Error::Storage(_) | Error::Io(_) => FailureKind::Merge,
            _ => FailureKind::Permanent,
        }
    }
}

/// What the session should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry once the delay has elapsed.
    RetryAfter(Duration),
    /// Stop retrying; the session fails.
    GiveUp,
}

/// Decides whether and when a failed step is retried.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Decide the next step after a failure.
    ///
    /// `attempt` is the number of consecutive counted failures including
    /// this one. Conflicts are never counted and always retry immediately.
    pub fn next_delay(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        match kind {
            FailureKind::Conflict => RetryDecision::RetryAfter(Duration::ZERO),
            FailureKind::Permanent | FailureKind::Merge => RetryDecision::GiveUp,
            FailureKind::Transient => {
                let attempt = attempt.max(1);
                if attempt > self.config.max_attempts {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::RetryAfter(self.config.delay_for_attempt(attempt - 1))
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
