//! Reopen schedule for properties whose file cannot be opened.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Retry delays that double, then grow linearly, then stay at a maximum.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    current_ms: u64,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current_ms = config.initial_ms.min(config.max_ms);
        Self { config, current_ms }
    }

    /// Delay the next retry would use.
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Returns the delay for this retry and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        let next = if self.current_ms < self.config.doubling_limit_ms {
            self.current_ms.saturating_mul(2).max(1)
        } else {
            self.current_ms.saturating_add(self.config.step_ms)
        };
        self.current_ms = next.min(self.config.max_ms);
        delay
    }

    /// Back to the initial delay after a successful open.
    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms.min(self.config.max_ms);
    }
}
