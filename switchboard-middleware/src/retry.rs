//! Budgeted retry policy for transient upstream failures.
//!
//! The dispatch loop owns the control flow; this module only answers two
//! questions per attempt: may it start ([`RetryConfig::allows`]), and how
//! long to sleep first ([`RetryConfig::delay_before`]). Attempt numbering
//! is 1-based and counts every upstream call for a request, so `3` means
//! the initial try plus at most two retries — across fallback candidates,
//! not per candidate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry limits and backoff shape, sourced from `RETRY_*` options.
///
/// Sleeps double per retry from `base_delay_ms` and never exceed
/// `max_delay_ms`. Each sleep gains up to `jitter_percent` of random
/// spread so a burst of callers knocked back by the same upstream outage
/// does not re-arrive in lockstep. Both the attempt count and the elapsed
/// wall clock bind: whichever runs out first ends the loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upstream calls allowed per request, counting the first.
    pub max_attempts: u32,
    /// Wall-clock ceiling over the whole retry loop, milliseconds.
    pub budget_ms: u64,
    /// Sleep before the first retry, milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling any single sleep may reach, milliseconds.
    pub max_delay_ms: u64,
    /// Random spread added to each sleep, as a percentage of it.
    pub jitter_percent: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            budget_ms: 10_000,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_percent: 20,
        }
    }
}

impl RetryConfig {
    /// Whether attempt `attempt` (1-based) may start, given time already
    /// spent in the request's retry loop.
    #[must_use]
    pub fn allows(&self, attempt: u32, elapsed: Duration) -> bool {
        attempt <= self.max_attempts && elapsed < Duration::from_millis(self.budget_ms)
    }

    /// Jittered sleep ahead of attempt `attempt`. Attempt 1 is the initial
    /// try and sleeps nothing; attempt N sleeps `base * 2^(N-2)` capped at
    /// `max_delay_ms`, jitter included.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = attempt.saturating_sub(2);
        let base = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(doublings))
            .min(self.max_delay_ms);
        let jitter_span = base * u64::from(self.jitter_percent) / 100;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_span)
        };
        Duration::from_millis((base + jitter).min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_cap_and_budget_both_bind() {
        let cfg = RetryConfig {
            max_attempts: 3,
            budget_ms: 1_000,
            ..RetryConfig::default()
        };
        assert!(cfg.allows(1, Duration::ZERO));
        assert!(cfg.allows(3, Duration::from_millis(999)));
        assert!(!cfg.allows(4, Duration::ZERO));
        assert!(!cfg.allows(2, Duration::from_millis(1_000)));
    }

    #[test]
    fn delays_double_and_stay_bounded() {
        let cfg = RetryConfig {
            max_attempts: 10,
            budget_ms: 60_000,
            base_delay_ms: 100,
            max_delay_ms: 800,
            jitter_percent: 0,
        };
        assert_eq!(cfg.delay_before(1), Duration::ZERO);
        assert_eq!(cfg.delay_before(2), Duration::from_millis(100));
        assert_eq!(cfg.delay_before(3), Duration::from_millis(200));
        assert_eq!(cfg.delay_before(4), Duration::from_millis(400));
        assert_eq!(cfg.delay_before(5), Duration::from_millis(800));
        assert_eq!(cfg.delay_before(6), Duration::from_millis(800));
    }

    #[test]
    fn jitter_never_exceeds_the_ceiling() {
        let cfg = RetryConfig {
            max_attempts: 5,
            budget_ms: 60_000,
            base_delay_ms: 500,
            max_delay_ms: 600,
            jitter_percent: 50,
        };
        for _ in 0..100 {
            assert!(cfg.delay_before(3) <= Duration::from_millis(600));
        }
    }
}
