//! Tunable constants for adaptive pacing.
//!
//! Every threshold the scheduler uses lives here with its default, so a
//! deployment can retune pacing from config instead of code.

use serde::{Deserialize, Serialize};

use crate::error::{LmsflowError, Result};

/// Inter-request delay ladder in milliseconds, indexed by backoff level.
pub const DEFAULT_DELAY_LADDER_MS: [u64; 6] = [0, 100, 300, 1000, 2000, 5000];

/// Consecutive successes before the delay is halved.
pub const SPEEDUP_STREAK: u32 = 10;
/// Success rate (percent) that must be exceeded before the delay is halved.
pub const SPEEDUP_SUCCESS_RATE: f64 = 95.0;

/// Consecutive successes above which backoff drops one level per success.
pub const DEESCALATE_STREAK: u32 = 5;
/// Consecutive non-rate-limit failures above which backoff rises one level.
pub const ESCALATE_FAILURE_STREAK: u32 = 3;
/// Levels added on a rate-limit hit.
pub const RATE_LIMIT_JUMP: usize = 2;

/// Minimum spacing per backoff level: spacing = MIN_SPACING_MS * (level + 1).
pub const MIN_SPACING_MS: u64 = 50;

/// Average response time above which a penalty is added.
pub const SLOW_RESPONSE_MS: u64 = 2000;
pub const SLOW_RESPONSE_PENALTY_MS: u64 = 500;

/// Weight of each new sample in the success-rate moving average.
pub const SUCCESS_EMA_WEIGHT: f64 = 0.1;
/// Response-time samples kept for the rolling average.
pub const RESPONSE_WINDOW: usize = 100;

/// Dispatches per call, counting rate-limit requeues.
pub const MAX_ATTEMPTS_PER_CALL: u32 = 3;
/// Calls in flight at once.
pub const MAX_CONCURRENT: usize = 3;

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub delay_ladder_ms: Vec<u64>,
    pub speedup_streak: u32,
    pub speedup_success_rate: f64,
    pub deescalate_streak: u32,
    pub escalate_failure_streak: u32,
    pub rate_limit_jump: usize,
    pub min_spacing_ms: u64,
    pub slow_response_ms: u64,
    pub slow_response_penalty_ms: u64,
    pub success_ema_weight: f64,
    pub response_window: usize,
    pub max_attempts: u32,
    pub max_concurrent: usize,
    /// Lowercase substrings that mark an error as rate limiting.
    pub rate_limit_patterns: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay_ladder_ms: DEFAULT_DELAY_LADDER_MS.to_vec(),
            speedup_streak: SPEEDUP_STREAK,
            speedup_success_rate: SPEEDUP_SUCCESS_RATE,
            deescalate_streak: DEESCALATE_STREAK,
            escalate_failure_streak: ESCALATE_FAILURE_STREAK,
            rate_limit_jump: RATE_LIMIT_JUMP,
            min_spacing_ms: MIN_SPACING_MS,
            slow_response_ms: SLOW_RESPONSE_MS,
            slow_response_penalty_ms: SLOW_RESPONSE_PENALTY_MS,
            success_ema_weight: SUCCESS_EMA_WEIGHT,
            response_window: RESPONSE_WINDOW,
            max_attempts: MAX_ATTEMPTS_PER_CALL,
            max_concurrent: MAX_CONCURRENT,
            rate_limit_patterns: vec![
                "rate limit".to_string(),
                "too many requests".to_string(),
                "throttled".to_string(),
            ],
        }
    }
}

impl SchedulerConfig {
    /// Highest valid backoff level.
    pub fn max_level(&self) -> usize {
        self.delay_ladder_ms.len().saturating_sub(1)
    }

    /// Ladder delay for a level, clamped to the top rung.
    pub fn ladder_delay_ms(&self, level: usize) -> u64 {
        self.delay_ladder_ms
            .get(level.min(self.max_level()))
            .copied()
            .unwrap_or(0)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_min_spacing_ms(mut self, ms: u64) -> Self {
        self.min_spacing_ms = ms;
        self
    }

    /// Reject settings that would stall or invert pacing.
    pub fn validate(&self) -> Result<()> {
        if self.delay_ladder_ms.is_empty() {
            return Err(LmsflowError::Config("scheduler.delay_ladder_ms must not be empty".to_string()));
        }
        if self.delay_ladder_ms.windows(2).any(|w| w[0] > w[1]) {
            return Err(LmsflowError::Config(
                "scheduler.delay_ladder_ms must be non-decreasing".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.success_ema_weight) || self.success_ema_weight == 0.0 {
            return Err(LmsflowError::Config(
                "scheduler.success_ema_weight must be in (0, 1]".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(LmsflowError::Config("scheduler.max_attempts must be at least 1".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(LmsflowError::Config("scheduler.max_concurrent must be at least 1".to_string()));
        }
        if self.response_window == 0 {
            return Err(LmsflowError::Config("scheduler.response_window must be at least 1".to_string()));
        }
        Ok(())
    }
}
