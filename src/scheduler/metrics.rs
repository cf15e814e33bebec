//! Success-rate and latency tracking.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of scheduler health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Exponential moving average, 0-100.
    pub success_rate: f64,
    /// Mean of the last `response_window` samples.
    pub average_response_time_ms: f64,
    pub backoff_level: usize,
    pub rate_limit_hits: u64,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

/// Mutable counters behind `SchedulerMetrics`.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    total: u64,
    successes: u64,
    failures: u64,
    success_rate: f64,
    weight: f64,
    samples: VecDeque<u64>,
    window: usize,
}

impl MetricsTracker {
    pub fn new(weight: f64, window: usize) -> Self {
        let window = window.max(1);
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            success_rate: 100.0,
            weight: weight.clamp(f64::EPSILON, 1.0),
            samples: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record one dispatch outcome.
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        self.total += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }

        let sample = if success { 100.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (1.0 - self.weight) + sample * self.weight).clamp(0.0, 100.0);

        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_millis() as u64);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    pub fn average_response_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.weight, self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_optimistic() {
        let tracker = MetricsTracker::new(0.1, 100);
        assert_eq!(tracker.success_rate(), 100.0);
        assert_eq!(tracker.average_response_ms(), 0.0);
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn test_ema_moves_by_weight() {
        let mut tracker = MetricsTracker::new(0.1, 100);
        tracker.record(false, Duration::from_millis(10));
        assert!((tracker.success_rate() - 90.0).abs() < 1e-9);
        tracker.record(true, Duration::from_millis(10));
        assert!((tracker.success_rate() - 91.0).abs() < 1e-9);
        assert_eq!(tracker.successes(), 1);
        assert_eq!(tracker.failures(), 1);
    }

    #[test]
    fn test_success_rate_bounded() {
        let mut tracker = MetricsTracker::new(1.0, 10);
        for _ in 0..50 {
            tracker.record(false, Duration::ZERO);
        }
        assert_eq!(tracker.success_rate(), 0.0);
        for _ in 0..50 {
            tracker.record(true, Duration::ZERO);
        }
        assert_eq!(tracker.success_rate(), 100.0);
    }

    #[test]
    fn test_response_window_slides() {
        let mut tracker = MetricsTracker::new(0.1, 3);
        for ms in [1000, 1000, 1000, 10, 10, 10] {
            tracker.record(true, Duration::from_millis(ms));
        }
        assert_eq!(tracker.average_response_ms(), 10.0);
        assert_eq!(tracker.total(), 6);
    }

    #[test]
    fn test_reset() {
        let mut tracker = MetricsTracker::new(0.1, 3);
        tracker.record(false, Duration::from_millis(5));
        tracker.reset();
        assert_eq!(tracker.total(), 0);
        assert_eq!(tracker.success_rate(), 100.0);
    }
}
