//! Retry policy with exponential backoff for failed uploads.
//!
//! Unlike an in-call retry loop, the policy here spaces out attempts across
//! sync passes: a failed entry records when it may next be attempted and,
//! optionally, is dead-lettered after a maximum number of attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::serde_secs;

/// Configuration for retry behavior between sync passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(with = "serde_secs")]
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    #[serde(with = "serde_secs")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
    /// Attempts after which an entry is dead-lettered. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Create a backoff policy with the given attempt cap.
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            jitter: true,
            max_attempts,
        }
    }

    /// Retry on every pass with no cap.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            max_attempts: None,
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

    /// Set the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Calculate delay after the given number of failed attempts.
    ///
    /// `failed_attempts` is 1 after the first failure.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Whether an entry with this many failures should stop being retried.
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts
            .is_some_and(|max| failed_attempts >= max)
    }

    /// Earliest time of the next attempt, or `None` to retry on the next pass.
    pub fn next_attempt_at(&self, failed_attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay_for_attempt(failed_attempts);
        if delay.is_zero() {
            return None;
        }
        chrono::Duration::from_std(delay).ok().map(|d| now + d)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}
