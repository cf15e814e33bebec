//! Scheduler module for pacing outbound API calls.
//!
//! This module provides:
//! - **Priority queue**: high > medium > low, FIFO within a tier.
//! - **Adaptive pacing**: inter-request delay derived from a backoff ladder,
//!   the recent success streak, and observed response times.
//! - **Rate-limit handling**: rate-limited calls jump the backoff level and
//!   are requeued at the front of the queue until their attempt budget runs out.
//! - **Metrics**: moving-average success rate, rolling response time, hit counts.
//!
//! # Example
//!
//! ```ignore
//! use lmsflow::api::{ApiRequest, HttpCaller, RateGate, RetryPolicy};
//! use lmsflow::scheduler::{AdaptiveScheduler, Priority, SchedulerConfig};
//!
//! let caller = HttpCaller::new(transport, Arc::new(RateGate::hourly(3000)), RetryPolicy::default());
//! let scheduler = AdaptiveScheduler::new(caller, SchedulerConfig::default());
//!
//! let handle = scheduler.submit(ApiRequest::new("/courses/42"), Priority::High);
//! let result = handle.wait().await;
//! ```

mod adaptive;
mod backoff;
mod call;
mod metrics;
mod queue;
mod tuning;

pub use adaptive::{AdaptiveScheduler, SchedulerStatus, adaptive_delay};
pub use backoff::BackoffState;
pub use call::{ApiCall, CallHandle, CallResult, Priority};
pub use metrics::{MetricsTracker, SchedulerMetrics};
pub use queue::{CallQueue, QueueDepth};
pub use tuning::{
    DEFAULT_DELAY_LADDER_MS, DEESCALATE_STREAK, ESCALATE_FAILURE_STREAK, MAX_ATTEMPTS_PER_CALL, MAX_CONCURRENT,
    MIN_SPACING_MS, RATE_LIMIT_JUMP, RESPONSE_WINDOW, SLOW_RESPONSE_MS, SLOW_RESPONSE_PENALTY_MS, SPEEDUP_STREAK,
    SPEEDUP_SUCCESS_RATE, SUCCESS_EMA_WEIGHT, SchedulerConfig,
};
