//! Backoff level bookkeeping.
//!
//! The level indexes the delay ladder in `SchedulerConfig`. Rate-limit hits
//! jump it up sharply, piled-up ordinary failures nudge it up by one, and
//! sustained success walks it back down toward zero.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Backoff state owned by one scheduler instance.
#[derive(Debug, Clone)]
pub struct BackoffState {
    level: usize,
    max_level: usize,
    consecutive_successes: u32,
    consecutive_failures: u32,
    rate_limit_hits: u64,
    last_rate_limit_at: Option<DateTime<Utc>>,
    last_rate_limit: Option<Instant>,
}

impl BackoffState {
    /// Create state for a ladder whose top rung is `max_level`.
    pub fn new(max_level: usize) -> Self {
        Self {
            level: 0,
            max_level,
            consecutive_successes: 0,
            consecutive_failures: 0,
            rate_limit_hits: 0,
            last_rate_limit_at: None,
            last_rate_limit: None,
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits
    }

    pub fn last_rate_limit_at(&self) -> Option<DateTime<Utc>> {
        self.last_rate_limit_at
    }

    /// Time since the last rate-limit hit.
    pub fn since_rate_limit(&self) -> Option<std::time::Duration> {
        self.last_rate_limit.map(|t| t.elapsed())
    }

    /// Record a successful call.
    ///
    /// Once the streak exceeds `deescalate_streak`, every further success
    /// drops one level.
    pub fn record_success(&mut self, deescalate_streak: u32) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;

        if self.consecutive_successes > deescalate_streak && self.level > 0 {
            self.level -= 1;
            tracing::debug!(level = self.level, "Backoff level decreased");
        }
    }

    /// Record a failure that is not rate-limit specific.
    ///
    /// Returns true if the level was raised.
    pub fn record_failure(&mut self, escalate_failure_streak: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;

        if self.consecutive_failures > escalate_failure_streak && self.level < self.max_level {
            self.level += 1;
            tracing::warn!(
                level = self.level,
                consecutive_failures = self.consecutive_failures,
                "Failures piling up, backoff level increased"
            );
            return true;
        }
        false
    }

    /// Record a rate-limit hit: jump `jump` levels, clamped to the ladder.
    pub fn record_rate_limit(&mut self, jump: usize) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.rate_limit_hits += 1;
        self.level = (self.level + jump).min(self.max_level);
        self.last_rate_limit_at = Some(Utc::now());
        self.last_rate_limit = Some(Instant::now());

        tracing::warn!(
            level = self.level,
            rate_limit_hits = self.rate_limit_hits,
            "Rate limited, backing off"
        );
    }

    /// Clear level, streaks and rate-limit history.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = BackoffState::new(5);
        assert_eq!(state.level(), 0);
        assert_eq!(state.rate_limit_hits(), 0);
        assert!(state.last_rate_limit_at().is_none());
    }

    #[test]
    fn test_rate_limit_jumps_two_levels() {
        let mut state = BackoffState::new(5);
        state.record_rate_limit(2);
        assert_eq!(state.level(), 2);
        state.record_rate_limit(2);
        assert_eq!(state.level(), 4);
        assert_eq!(state.rate_limit_hits(), 2);
        assert!(state.last_rate_limit_at().is_some());
    }

    #[test]
    fn test_rate_limit_clamped_to_ladder() {
        let mut state = BackoffState::new(5);
        for _ in 0..10 {
            state.record_rate_limit(2);
        }
        assert_eq!(state.level(), 5);
    }

    #[test]
    fn test_failures_escalate_after_streak() {
        let mut state = BackoffState::new(5);
        assert!(!state.record_failure(3));
        assert!(!state.record_failure(3));
        assert!(!state.record_failure(3));
        assert_eq!(state.level(), 0);

        assert!(state.record_failure(3));
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut state = BackoffState::new(5);
        state.record_failure(3);
        state.record_failure(3);
        state.record_success(5);
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.consecutive_successes(), 1);
    }

    #[test]
    fn test_sustained_success_returns_to_zero() {
        let mut state = BackoffState::new(5);
        state.record_rate_limit(2);
        state.record_rate_limit(2);
        assert_eq!(state.level(), 4);

        let mut previous = state.level();
        for _ in 0..20 {
            state.record_success(5);
            assert!(state.level() <= previous);
            previous = state.level();
        }
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_level_holds_until_streak_exceeded() {
        let mut state = BackoffState::new(5);
        state.record_rate_limit(2);
        for _ in 0..5 {
            state.record_success(5);
        }
        assert_eq!(state.level(), 2);
        state.record_success(5);
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut state = BackoffState::new(5);
        state.record_rate_limit(2);
        state.reset();
        assert_eq!(state.level(), 0);
        assert_eq!(state.rate_limit_hits(), 0);
        assert!(state.last_rate_limit_at().is_none());
        assert!(state.since_rate_limit().is_none());

        for _ in 0..10 {
            state.record_rate_limit(2);
        }
        assert_eq!(state.level(), 5);
    }
}
