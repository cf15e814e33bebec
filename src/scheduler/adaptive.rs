//! Adaptive request scheduler.
//!
//! Callers `submit` a request with a priority and get a `CallHandle` back.
//! A dispatch task drains the queue highest-priority-first, waiting an
//! adaptive delay between dispatches that reacts to the live success and
//! failure stream of the remote API:
//!
//! 1. Start from the ladder delay for the current backoff level.
//! 2. Halve it on a long success streak with a high success rate.
//! 3. Enforce a minimum spacing that widens with the backoff level.
//! 4. Add a penalty while the average response time is slow.
//!
//! Rate-limited calls are requeued at the front of the queue at high
//! priority until their attempt budget runs out. The dispatch task exits
//! when the queue drains and is respawned by the next submit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::api::{ApiError, ApiRequest, GateSnapshot, HttpCaller};
use crate::scheduler::backoff::BackoffState;
use crate::scheduler::call::{ApiCall, CallHandle, CallResult, Priority};
use crate::scheduler::metrics::{MetricsTracker, SchedulerMetrics};
use crate::scheduler::queue::{CallQueue, QueueDepth};
use crate::scheduler::tuning::SchedulerConfig;

/// Current pacing state, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub queued: QueueDepth,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub dispatcher_active: bool,
    pub backoff_level: usize,
    pub current_delay_ms: u64,
    /// `None` while a reservation holds the gate.
    pub gate: Option<GateSnapshot>,
}

struct SchedulerState {
    queue: CallQueue,
    backoff: BackoffState,
    metrics: MetricsTracker,
    dispatcher_active: bool,
    in_flight: usize,
    last_dispatch: Option<Instant>,
}

struct Shared {
    caller: HttpCaller,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    permits: Arc<Semaphore>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Priority scheduler with adaptive pacing. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct AdaptiveScheduler {
    shared: Arc<Shared>,
}

impl AdaptiveScheduler {
    /// The caller picks up the scheduler's rate-limit patterns.
    pub fn new(caller: HttpCaller, config: SchedulerConfig) -> Self {
        let caller = caller.with_rate_limit_patterns(config.rate_limit_patterns.clone());
        let state = SchedulerState {
            queue: CallQueue::new(),
            backoff: BackoffState::new(config.max_level()),
            metrics: MetricsTracker::new(config.success_ema_weight, config.response_window),
            dispatcher_active: false,
            in_flight: 0,
            last_dispatch: None,
        };
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Self {
            shared: Arc::new(Shared {
                caller,
                config,
                state: Mutex::new(state),
                permits,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Enqueue a request and return a handle to its eventual result.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: ApiRequest, priority: Priority) -> CallHandle {
        let (call, handle) = ApiCall::new(request, priority);
        tracing::debug!(call_id = %call.id, endpoint = %call.request.endpoint, priority = %priority, "Call queued");

        let mut state = self.shared.lock();
        state.queue.push(call);
        ensure_dispatcher(&self.shared, &mut state);
        handle
    }

    /// Submit and wait.
    pub async fn execute(&self, request: ApiRequest, priority: Priority) -> CallResult {
        self.submit(request, priority).wait().await
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let state = self.shared.lock();
        SchedulerMetrics {
            total_requests: state.metrics.total(),
            successful_requests: state.metrics.successes(),
            failed_requests: state.metrics.failures(),
            success_rate: state.metrics.success_rate(),
            average_response_time_ms: state.metrics.average_response_ms(),
            backoff_level: state.backoff.level(),
            rate_limit_hits: state.backoff.rate_limit_hits(),
            last_rate_limit_at: state.backoff.last_rate_limit_at(),
            consecutive_successes: state.backoff.consecutive_successes(),
            consecutive_failures: state.backoff.consecutive_failures(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let gate = self.shared.caller.gate().snapshot();
        let state = self.shared.lock();
        SchedulerStatus {
            queued: state.queue.depth(),
            in_flight: state.in_flight,
            max_concurrent: self.shared.config.max_concurrent.max(1),
            dispatcher_active: state.dispatcher_active,
            backoff_level: state.backoff.level(),
            current_delay_ms: adaptive_delay(&self.shared.config, &state.backoff, &state.metrics).as_millis() as u64,
            gate,
        }
    }

    /// Delay the dispatcher would wait between the next two dispatches.
    pub fn current_delay(&self) -> Duration {
        let state = self.shared.lock();
        adaptive_delay(&self.shared.config, &state.backoff, &state.metrics)
    }

    /// Clear metrics, backoff and rate-limit history. Queued and in-flight
    /// calls are untouched.
    pub fn reset_metrics(&self) {
        let mut state = self.shared.lock();
        state.metrics.reset();
        state.backoff.reset();
    }
}

impl std::fmt::Debug for AdaptiveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveScheduler")
            .field("caller", &self.shared.caller)
            .field("max_concurrent", &self.shared.config.max_concurrent)
            .finish()
    }
}

/// Compute the pause between dispatches.
pub fn adaptive_delay(config: &SchedulerConfig, backoff: &BackoffState, metrics: &MetricsTracker) -> Duration {
    let level = backoff.level();
    let mut delay_ms = config.ladder_delay_ms(level);

    if backoff.consecutive_successes() >= config.speedup_streak && metrics.success_rate() > config.speedup_success_rate {
        delay_ms /= 2;
    }

    let min_spacing = config.min_spacing_ms.saturating_mul(level as u64 + 1);
    delay_ms = delay_ms.max(min_spacing);

    if metrics.average_response_ms() > config.slow_response_ms as f64 {
        delay_ms = delay_ms.saturating_add(config.slow_response_penalty_ms);
    }

    Duration::from_millis(delay_ms)
}

fn ensure_dispatcher(shared: &Arc<Shared>, state: &mut SchedulerState) {
    if !state.dispatcher_active {
        state.dispatcher_active = true;
        tokio::spawn(dispatch_loop(shared.clone()));
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        {
            let mut state = shared.lock();
            if state.queue.is_empty() {
                state.dispatcher_active = false;
                return;
            }
        }

        let permit = match shared.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                shared.lock().dispatcher_active = false;
                return;
            }
        };

        // Outcomes that land while we sleep can raise the delay; re-check until it has elapsed.
        loop {
            let wait = {
                let state = shared.lock();
                let delay = adaptive_delay(&shared.config, &state.backoff, &state.metrics);
                state
                    .last_dispatch
                    .map(|last| (last + delay).saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::ZERO)
            };
            if wait.is_zero() {
                break;
            }
            tokio::time::sleep(wait).await;
        }

        // Pop only after pacing, so a call that arrived during the wait can preempt.
        let call = {
            let mut state = shared.lock();
            match state.queue.pop() {
                Some(call) => {
                    state.in_flight += 1;
                    state.last_dispatch = Some(Instant::now());
                    call
                }
                None => {
                    state.dispatcher_active = false;
                    return;
                }
            }
        };

        tracing::debug!(
            call_id = %call.id,
            endpoint = %call.request.endpoint,
            priority = %call.priority,
            waited_ms = call.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching call"
        );

        let task_shared = shared.clone();
        tokio::spawn(async move {
            run_call(&task_shared, call).await;
            drop(permit);
        });
    }
}

async fn run_call(shared: &Arc<Shared>, mut call: ApiCall) {
    call.attempts += 1;
    let started = Instant::now();
    let outcome = shared.caller.call(&call.request).await;
    let elapsed = started.elapsed();
    let config = &shared.config;

    let mut state = shared.lock();
    state.in_flight = state.in_flight.saturating_sub(1);

    match outcome {
        Ok(response) => {
            state.backoff.record_success(config.deescalate_streak);
            state.metrics.record(true, elapsed);
            drop(state);
            call.resolve(Ok(response));
        }
        Err(error) if error.is_rate_limit(&config.rate_limit_patterns) => {
            state.backoff.record_rate_limit(config.rate_limit_jump);
            state.metrics.record(false, elapsed);

            if call.attempts < config.max_attempts {
                tracing::info!(
                    call_id = %call.id,
                    attempts = call.attempts,
                    backoff_level = state.backoff.level(),
                    "Requeueing rate-limited call"
                );
                call.priority = Priority::High;
                state.queue.push_front(call);
                ensure_dispatcher(shared, &mut state);
            } else {
                drop(state);
                tracing::error!(call_id = %call.id, attempts = call.attempts, "Rate-limited call out of attempts");
                let attempts = call.attempts;
                call.resolve(Err(ApiError::Exhausted {
                    attempts,
                    last_error: error.to_string(),
                }));
            }
        }
        Err(error) => {
            state.backoff.record_failure(config.escalate_failure_streak);
            state.metrics.record(false, elapsed);
            drop(state);
            tracing::warn!(call_id = %call.id, code = error.code(), error = %error, "Call failed");
            call.resolve(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, MockTransport, RateGate, RetryPolicy};
    use serde_json::json;

    fn scheduler(transport: Arc<MockTransport>, config: SchedulerConfig) -> AdaptiveScheduler {
        let caller = HttpCaller::new(transport, Arc::new(RateGate::hourly(10_000)), RetryPolicy::new(3, 10, 5_000));
        AdaptiveScheduler::new(caller, config)
    }

    #[test]
    fn test_delay_at_level_zero_is_min_spacing() {
        let config = SchedulerConfig::default();
        let backoff = BackoffState::new(config.max_level());
        let metrics = MetricsTracker::new(0.1, 100);
        assert_eq!(adaptive_delay(&config, &backoff, &metrics), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_follows_ladder() {
        let config = SchedulerConfig::default();
        let mut backoff = BackoffState::new(config.max_level());
        let metrics = MetricsTracker::new(0.1, 100);

        backoff.record_rate_limit(2);
        assert_eq!(adaptive_delay(&config, &backoff, &metrics), Duration::from_millis(300));
        backoff.record_rate_limit(2);
        assert_eq!(adaptive_delay(&config, &backoff, &metrics), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_halved_on_long_streak() {
        let config = SchedulerConfig {
            deescalate_streak: 100,
            ..Default::default()
        };
        let mut backoff = BackoffState::new(config.max_level());
        let mut metrics = MetricsTracker::new(0.1, 100);
        backoff.record_rate_limit(3);
        for _ in 0..10 {
            backoff.record_success(config.deescalate_streak);
            metrics.record(true, Duration::from_millis(5));
        }
        // level 3 -> 1000ms halved to 500, above the 200ms spacing floor
        assert_eq!(backoff.level(), 3);
        assert_eq!(adaptive_delay(&config, &backoff, &metrics), Duration::from_millis(500));
    }

    #[test]
    fn test_slow_responses_add_penalty() {
        let config = SchedulerConfig::default();
        let backoff = BackoffState::new(config.max_level());
        let mut metrics = MetricsTracker::new(0.1, 100);
        metrics.record(true, Duration::from_millis(3000));
        assert_eq!(adaptive_delay(&config, &backoff, &metrics), Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_dispatch_order() {
        let transport = Arc::new(MockTransport::new());
        let sched = scheduler(transport.clone(), SchedulerConfig::default().with_max_concurrent(1));

        let a = sched.submit(ApiRequest::new("A"), Priority::Low);
        let b = sched.submit(ApiRequest::new("B"), Priority::High);
        let c = sched.submit(ApiRequest::new("C"), Priority::Medium);

        for handle in [a, b, c] {
            assert!(handle.wait().await.is_success());
        }
        assert_eq!(transport.sent_endpoints(), vec!["B", "C", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_requeued_then_succeeds() {
        let transport = Arc::new(
            MockTransport::new()
                .route("/courses/1", ApiResponse::ok(json!({"id": 1})))
                .fail_first(1, Ok(ApiResponse::new(429, json!("Rate Limit Exceeded")))),
        );
        let sched = scheduler(transport.clone(), SchedulerConfig::default());

        let result = sched.execute(ApiRequest::new("/courses/1"), Priority::Low).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 2);

        let metrics = sched.metrics();
        assert_eq!(metrics.rate_limit_hits, 1);
        assert_eq!(metrics.backoff_level, 2);
        assert_eq!(metrics.total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_budget_exhausted() {
        let transport = Arc::new(MockTransport::new().route("/x", ApiResponse::new(429, json!("too many requests"))));
        let sched = scheduler(transport.clone(), SchedulerConfig::default().with_max_attempts(3));

        let result = sched.execute(ApiRequest::new("/x"), Priority::Medium).await;
        let err = result.outcome.unwrap_err();
        assert_eq!(err.code(), "REQUEST_FAILED");
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.sent_count(), 3);
        assert_eq!(sched.metrics().rate_limit_hits, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_resolves_without_requeue() {
        let transport = Arc::new(MockTransport::new().route("/missing", ApiResponse::new(404, json!("not found"))));
        let sched = scheduler(transport.clone(), SchedulerConfig::default());

        let result = sched.execute(ApiRequest::new("/missing"), Priority::High).await;
        assert!(matches!(result.outcome, Err(ApiError::ClientError { status: 404, .. })));
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(sched.metrics().rate_limit_hits, 0);
        assert_eq!(sched.metrics().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_escalate_backoff() {
        let transport = Arc::new(MockTransport::new().with_default(ApiResponse::new(400, json!("bad request"))));
        let sched = scheduler(transport, SchedulerConfig::default());

        for i in 0..4 {
            let _ = sched.execute(ApiRequest::new(format!("/bad/{}", i)), Priority::Medium).await;
        }
        assert_eq!(sched.metrics().backoff_level, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_spacing_respected() {
        let transport = Arc::new(MockTransport::new());
        let sched = scheduler(transport.clone(), SchedulerConfig::default().with_min_spacing_ms(100));

        let handles: Vec<_> = (0..4)
            .map(|i| sched.submit(ApiRequest::new(format!("/c/{}", i)), Priority::Medium))
            .collect();
        for handle in handles {
            handle.wait().await;
        }

        let sent = transport.sent();
        for pair in sent.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_reset() {
        let transport = Arc::new(MockTransport::new().route("/x", ApiResponse::new(429, json!("limit"))));
        let sched = scheduler(transport, SchedulerConfig::default().with_max_attempts(1));
        let _ = sched.execute(ApiRequest::new("/x"), Priority::Low).await;

        let status = sched.status();
        assert_eq!(status.backoff_level, 2);
        assert_eq!(status.queued.total(), 0);
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.current_delay_ms, 300);

        sched.reset_metrics();
        let metrics = sched.metrics();
        assert_eq!(metrics.backoff_level, 0);
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 100.0);
        assert_eq!(metrics.rate_limit_hits, 0);
        assert!(metrics.last_rate_limit_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_server_error_uses_one_budget() {
        let transport = Arc::new(MockTransport::new().route("/x", ApiResponse::new(503, json!("throttled"))));
        let sched = scheduler(transport.clone(), SchedulerConfig::default());

        let result = sched.execute(ApiRequest::new("/x"), Priority::Medium).await;
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.sent_count(), 3);
        assert_eq!(sched.metrics().rate_limit_hits, 3);
        match result.outcome {
            Err(ApiError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("throttled"));
                assert!(!last_error.contains("REQUEST_FAILED"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_takes_scheduler_patterns() {
        let transport = Arc::new(MockTransport::new());
        let config = SchedulerConfig {
            rate_limit_patterns: vec!["quota".to_string()],
            ..Default::default()
        };
        let sched = scheduler(transport, config);
        assert_eq!(sched.shared.caller.rate_limit_patterns(), ["quota".to_string()]);
    }
}
