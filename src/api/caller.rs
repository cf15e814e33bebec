//! Single-request executor with rate gating and bounded retry.
//!
//! `HttpCaller::call` takes one gate reservation, then tries the request up
//! to `RetryPolicy::attempts` times with `base_delay * 2^(attempt-1)` between
//! tries. A 4xx on the first attempt returns immediately; 5xx, timeouts and
//! network failures are retried until the budget runs out. Anything that
//! looks like rate limiting, by status or by message, is returned at once as
//! `RateLimited`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::gate::RateGate;
use crate::api::transport::{Transport, TransportError};
use crate::api::types::{ApiError, ApiRequest, ApiResponse};

/// Retry and timeout policy for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries per call, including the first.
    pub attempts: u32,
    /// Delay before the second try; doubles each time after.
    pub base_delay_ms: u64,
    /// Per-try timeout.
    pub request_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
            request_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay_ms: u64, request_timeout_ms: u64) -> Self {
        Self {
            attempts,
            base_delay_ms,
            request_timeout_ms,
        }
    }

    /// Delay after a failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

/// Executes requests through a transport, one gate reservation per call.
#[derive(Clone)]
pub struct HttpCaller {
    transport: Arc<dyn Transport>,
    gate: Arc<RateGate>,
    policy: RetryPolicy,
    rate_limit_patterns: Vec<String>,
}

impl HttpCaller {
    pub fn new(transport: Arc<dyn Transport>, gate: Arc<RateGate>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            gate,
            policy,
            rate_limit_patterns: Vec::new(),
        }
    }

    /// Message substrings that mark a failure as rate limiting.
    pub fn with_rate_limit_patterns(mut self, patterns: Vec<String>) -> Self {
        self.rate_limit_patterns = patterns;
        self
    }

    pub fn rate_limit_patterns(&self) -> &[String] {
        &self.rate_limit_patterns
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a request.
    ///
    /// Rate-limit responses (429 or a pattern match) are returned immediately
    /// so the scheduler can back off and requeue; they are not retried here.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.gate.reserve().await;

        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(self.policy.timeout(), self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.timeout())),
            };

            let error = match outcome {
                Ok(response) => match response.classify() {
                    None => return Ok(response),
                    Some(err) if err.is_rate_limit(&self.rate_limit_patterns) => {
                        tracing::debug!(endpoint = %request.endpoint, attempt = attempt, error = %err, "Rate limited");
                        return Err(err.into_rate_limited());
                    }
                    Some(err @ ApiError::ClientError { .. }) if attempt == 1 => {
                        tracing::debug!(endpoint = %request.endpoint, error = %err, "Client error, not retrying");
                        return Err(err);
                    }
                    Some(err) => err,
                },
                Err(transport_err) => ApiError::Transient {
                    status: None,
                    message: transport_err.to_string(),
                },
            };

            last_error = error.to_string();

            if attempt < attempts {
                let delay = self.policy.delay_after(attempt);
                tracing::warn!(
                    endpoint = %request.endpoint,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(endpoint = %request.endpoint, attempts = attempts, "Retry budget exhausted");
        Err(ApiError::Exhausted { attempts, last_error })
    }
}

impl std::fmt::Debug for HttpCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCaller")
            .field("policy", &self.policy)
            .field("gate_limit", &self.gate.limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use serde_json::json;
    use tokio::time::Instant;

    fn caller(transport: Arc<MockTransport>, attempts: u32) -> HttpCaller {
        HttpCaller::new(transport, Arc::new(RateGate::hourly(1000)), RetryPolicy::new(attempts, 100, 5000))
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, 100, 1000);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let transport = Arc::new(MockTransport::new().route("/courses/1", ApiResponse::ok(json!({"id": 1}))));
        let result = caller(transport.clone(), 3).call(&ApiRequest::new("/courses/1")).await;
        assert_eq!(result.unwrap().body, json!({"id": 1}));
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_until_exhausted() {
        let transport = Arc::new(MockTransport::new().route("/courses/1", ApiResponse::new(503, json!("down"))));
        let start = Instant::now();
        let result = caller(transport.clone(), 3).call(&ApiRequest::new("/courses/1")).await;

        assert_eq!(transport.sent_count(), 3);
        match result {
            Err(ApiError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("down"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        // 100ms + 200ms of backoff between the three tries
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let transport = Arc::new(MockTransport::new().route("/courses/9", ApiResponse::new(404, json!({"message": "nope"}))));
        let result = caller(transport.clone(), 3).call(&ApiRequest::new("/courses/9")).await;

        assert_eq!(transport.sent_count(), 1);
        assert!(matches!(result, Err(ApiError::ClientError { status: 404, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_returned_without_retry() {
        let transport = Arc::new(MockTransport::new().route("/courses", ApiResponse::new(429, json!("slow down"))));
        let result = caller(transport.clone(), 3).call(&ApiRequest::new("/courses")).await;

        assert_eq!(transport.sent_count(), 1);
        assert!(matches!(result, Err(ApiError::RateLimited { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_server_error_returned_as_rate_limit() {
        let transport = Arc::new(MockTransport::new().route("/courses", ApiResponse::new(503, json!("throttled"))));
        let caller = caller(transport.clone(), 3).with_rate_limit_patterns(vec!["throttled".to_string()]);
        let result = caller.call(&ApiRequest::new("/courses")).await;

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(
            result,
            Err(ApiError::RateLimited {
                status: Some(503),
                message: "throttled".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_with_rate_limit_message() {
        let transport = Arc::new(
            MockTransport::new().route("/courses", ApiResponse::new(403, json!("403 Forbidden (Rate Limit Exceeded)"))),
        );
        let caller = caller(transport.clone(), 3).with_rate_limit_patterns(vec!["rate limit".to_string()]);
        let result = caller.call(&ApiRequest::new("/courses")).await;

        assert_eq!(transport.sent_count(), 1);
        assert!(matches!(result, Err(ApiError::RateLimited { status: Some(403), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let transport = Arc::new(MockTransport::new().route_sequence(
            "/courses/1",
            vec![
                Err(TransportError::Network("connection reset".to_string())),
                Ok(ApiResponse::new(500, json!("oops"))),
                Ok(ApiResponse::ok(json!({"id": 1}))),
            ],
        ));
        let result = caller(transport.clone(), 3).call(&ApiRequest::new("/courses/1")).await;

        assert!(result.is_ok());
        assert_eq!(transport.sent_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        let transport = Arc::new(MockTransport::new().with_latency(Duration::from_secs(10)));
        let caller = HttpCaller::new(transport.clone(), Arc::new(RateGate::hourly(10)), RetryPolicy::new(2, 10, 1000));
        let result = caller.call(&ApiRequest::new("/courses/1")).await;

        match result {
            Err(ApiError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_gate_reservation_per_call() {
        let transport = Arc::new(MockTransport::new().route("/x", ApiResponse::new(500, json!("e"))));
        let gate = Arc::new(RateGate::hourly(100));
        let caller = HttpCaller::new(transport, gate.clone(), RetryPolicy::new(3, 1, 1000));
        let _ = caller.call(&ApiRequest::new("/x")).await;
        assert_eq!(gate.snapshot().unwrap().used, 1);
    }
}
