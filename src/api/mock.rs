//! Scripted transport for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::api::transport::{Transport, TransportError};
use crate::api::types::{ApiRequest, ApiResponse};

/// Reply produced by the mock for one send.
pub type Reply = Result<ApiResponse, TransportError>;

/// A request the mock has seen, with the (tokio) time it arrived.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub request: ApiRequest,
    pub at: Instant,
}

#[derive(Debug)]
struct Route {
    script: VecDeque<Reply>,
    last: Reply,
}

impl Route {
    fn next(&mut self) -> Reply {
        match self.script.pop_front() {
            Some(reply) => {
                if self.script.is_empty() {
                    self.last = reply.clone();
                }
                reply
            }
            None => self.last.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    routes: HashMap<String, Route>,
    prelude: VecDeque<Reply>,
    sent: Vec<SentRequest>,
}

/// Transport that answers from per-endpoint scripts.
///
/// Endpoints match exactly (query parameters are ignored). A route's
/// script is consumed in order and its final reply repeats. Unrouted
/// endpoints get the default reply (`200 []`).
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    default_reply: Reply,
    latency: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            default_reply: Ok(ApiResponse::ok(Value::Array(Vec::new()))),
            latency: Duration::ZERO,
        }
    }

    /// Simulated server time per request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reply for endpoints with no route.
    pub fn with_default(mut self, response: ApiResponse) -> Self {
        self.default_reply = Ok(response);
        self
    }

    /// Always answer `endpoint` with `response`.
    pub fn route(self, endpoint: impl Into<String>, response: ApiResponse) -> Self {
        self.route_sequence(endpoint, vec![Ok(response)])
    }

    /// Answer `endpoint` with `replies` in order; the last one repeats.
    pub fn route_sequence(self, endpoint: impl Into<String>, replies: Vec<Reply>) -> Self {
        {
            let mut state = self.lock();
            let mut script: VecDeque<Reply> = replies.into();
            let last = script.back().cloned().unwrap_or_else(|| self.default_reply.clone());
            if script.len() == 1 {
                script.clear();
            }
            state.routes.insert(endpoint.into(), Route { script, last });
        }
        self
    }

    /// The first `count` sends, whatever their endpoint, get `reply`.
    pub fn fail_first(self, count: usize, reply: Reply) -> Self {
        {
            let mut state = self.lock();
            for _ in 0..count {
                state.prelude.push_back(reply.clone());
            }
        }
        self
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Endpoints in the order they were sent.
    pub fn sent_endpoints(&self) -> Vec<String> {
        self.lock().sent.iter().map(|s| s.request.endpoint.clone()).collect()
    }

    pub fn count_for(&self, endpoint: &str) -> usize {
        self.lock().sent.iter().filter(|s| s.request.endpoint == endpoint).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let reply = {
            let mut state = self.lock();
            state.sent.push(SentRequest {
                request: request.clone(),
                at: Instant::now(),
            });
            match state.prelude.pop_front() {
                Some(reply) => reply,
                None => match state.routes.get_mut(&request.endpoint) {
                    Some(route) => route.next(),
                    None => self.default_reply.clone(),
                },
            }
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        reply
    }
}
