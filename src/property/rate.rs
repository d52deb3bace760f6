//! Readiness rate limiting.
//!
//! Some sources report "readable" continuously, for real updates and for
//! error conditions alike. Events are counted per wall-clock second; crossing
//! the threshold asks the caller to probe the descriptor.

use crate::config::RateConfig;
use std::time::{SystemTime, UNIX_EPOCH};

/// What happened to the limiter after the threshold was crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tolerance {
    /// Threshold raised to the contained value.
    Raised(u32),
    /// Rate was extreme; counter cleared instead.
    Reset,
}

pub(crate) struct RateLimiter {
    config: RateConfig,
    max_rate: u32,
    count: u32,
    second: u64,
}

impl RateLimiter {
    pub fn new(config: RateConfig) -> Self {
        Self {
            max_rate: config.initial_max,
            config,
            count: 0,
            second: wall_clock_second(),
        }
    }

    pub fn max_rate(&self) -> u32 {
        self.max_rate
    }

    /// Counts one event seen at wall-clock `second`.
    ///
    /// Returns true when the count is above the threshold.
    pub fn record(&mut self, second: u64) -> bool {
        if second != self.second {
            self.second = second;
            self.count = 0;
        }
        self.count += 1;
        self.count > self.max_rate
    }

    /// Accepts a high rate from a source that proved healthy.
    pub fn tolerate(&mut self) -> Tolerance {
        if self.count < self.config.extreme {
            let cap = self.config.cap.max(self.config.initial_max);
            self.max_rate = self.max_rate.saturating_mul(2).min(cap);
            Tolerance::Raised(self.max_rate)
        } else {
            self.count = 0;
            Tolerance::Reset
        }
    }
}

pub(crate) fn wall_clock_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        let mut limiter = RateLimiter::new(RateConfig::default());
        limiter.second = 1_000;
        limiter
    }

    #[test]
    fn test_threshold_within_one_second() {
        let mut limiter = limiter();
        for _ in 0..20 {
            assert!(!limiter.record(1_000));
        }
        assert!(limiter.record(1_000));
    }

    #[test]
    fn test_counter_resets_on_new_second() {
        let mut limiter = limiter();
        for _ in 0..20 {
            limiter.record(1_000);
        }
        assert!(!limiter.record(1_001));
    }

    #[test]
    fn test_doubling_is_capped() {
        let mut limiter = limiter();
        limiter.record(1_000);
        assert_eq!(limiter.tolerate(), Tolerance::Raised(40));
        assert_eq!(limiter.tolerate(), Tolerance::Raised(80));
        assert_eq!(limiter.tolerate(), Tolerance::Raised(160));
        assert_eq!(limiter.tolerate(), Tolerance::Raised(320));
        assert_eq!(limiter.tolerate(), Tolerance::Raised(320));
        assert_eq!(limiter.max_rate(), 320);
    }

    #[test]
    fn test_extreme_rate_resets_counter() {
        let mut limiter = limiter();
        let mut exceeded = 0;
        for _ in 0..200 {
            if limiter.record(1_000) {
                exceeded += 1;
                if limiter.tolerate() == Tolerance::Reset {
                    break;
                }
            }
        }
        // 20 -> 40 -> 80 -> 160, then 161 < 200 raises to 320
        assert_eq!(limiter.max_rate(), 320);
        assert_eq!(exceeded, 4);

        limiter.count = 200;
        assert_eq!(limiter.tolerate(), Tolerance::Reset);
        assert!(!limiter.record(1_000));
    }
}
