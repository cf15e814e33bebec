//! Queued API calls and the handles callers await on.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::api::{ApiError, ApiRequest, ApiResponse};
use crate::id::generate_call_id;

/// Dispatch priority. Higher tiers always preempt lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// All tiers, highest first.
    pub const DESCENDING: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a scheduled call, delivered through its `CallHandle`.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub call_id: String,
    /// Dispatches made, counting rate-limit requeues.
    pub attempts: u32,
    pub outcome: Result<ApiResponse, ApiError>,
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A request owned by the scheduler queue until it resolves.
#[derive(Debug)]
pub struct ApiCall {
    pub id: String,
    pub request: ApiRequest,
    pub priority: Priority,
    pub attempts: u32,
    pub enqueued_at: Instant,
    reply: oneshot::Sender<CallResult>,
}

impl ApiCall {
    /// Create a call together with the handle that will receive its result.
    pub fn new(request: ApiRequest, priority: Priority) -> (Self, CallHandle) {
        let (tx, rx) = oneshot::channel();
        let id = generate_call_id();
        let call = Self {
            id: id.clone(),
            request,
            priority,
            attempts: 0,
            enqueued_at: Instant::now(),
            reply: tx,
        };
        (call, CallHandle { id, rx })
    }

    /// Deliver the terminal outcome. A dropped handle means the caller gave up; the result is discarded.
    pub fn resolve(self, outcome: Result<ApiResponse, ApiError>) {
        let result = CallResult {
            call_id: self.id,
            attempts: self.attempts,
            outcome,
        };
        if self.reply.send(result).is_err() {
            tracing::debug!("Call handle dropped before result arrived, discarding");
        }
    }
}

/// Awaitable handle returned at enqueue time.
#[derive(Debug)]
pub struct CallHandle {
    id: String,
    rx: oneshot::Receiver<CallResult>,
}

impl CallHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the call to resolve.
    pub async fn wait(self) -> CallResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => CallResult {
                call_id: self.id,
                attempts: 0,
                outcome: Err(ApiError::Exhausted {
                    attempts: 0,
                    last_error: "scheduler dropped the call before dispatch".to_string(),
                }),
            },
        }
    }
}
