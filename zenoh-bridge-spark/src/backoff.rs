//! Exponential backoff for the retry loops.
//!
//! The delay doubles after each consecutive failure and is capped at the
//! configured maximum. There is no attempt limit: callers retry until they
//! succeed or shutdown is requested.
//!
//! ```text
//! min=1s, max=8s:  1s, 2s, 4s, 8s, 8s, 8s, ...
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff bounds as they appear in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,

    /// Upper bound of the delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    /// Create backoff bounds from whole seconds.
    pub const fn from_secs(min: u64, max: u64) -> Self {
        Self {
            min_delay_ms: min * 1000,
            max_delay_ms: max * 1000,
        }
    }

    /// Check the bounds are usable.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.min_delay_ms == 0 {
            return Err(format!("{}: min_delay_ms must be greater than 0", name));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "{}: min_delay_ms ({}) must not exceed max_delay_ms ({})",
                name, self.min_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Doubling backoff state. One instance per retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_delay: Duration,
    max_delay: Duration,
    current_delay: Duration,
    /// Consecutive failures since the last reset.
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `min` and capped at `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min_delay: min,
            max_delay: max,
            current_delay: min,
            attempt: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.current_delay;
        self.current_delay = self.current_delay.saturating_mul(2).min(self.max_delay);
        delay
    }

    /// Record a success: the next failure waits `min_delay` again.
    pub fn reset(&mut self) {
        self.current_delay = self.min_delay;
        self.attempt = 0;
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl From<BackoffConfig> for Backoff {
    fn from(config: BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}
