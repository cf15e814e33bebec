//! Transport seam between the caller and the network.
//!
//! `ReqwestTransport` talks to the real LMS; tests plug in scripted
//! implementations of `Transport`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::api::types::{ApiRequest, ApiResponse};
use crate::error::{LmsflowError, Result};

/// Default API base path.
pub const DEFAULT_API_PATH: &str = "/api/v1";

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

/// Sends one request and returns whatever the server answered.
///
/// Implementations must not retry; the caller owns retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// HTTPS transport with bearer-token auth and a fixed base path.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport for `base_url` + `api_path`, e.g. `https://lms.example.edu` + `/api/v1`.
    pub fn new(base_url: &str, api_path: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(LmsflowError::Config("API token is empty".to_string()));
        }
        if base_url.trim().is_empty() {
            return Err(LmsflowError::Config("API base_url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LmsflowError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: join_url(base_url, api_path),
            token,
            timeout,
        })
    }

    /// Full URL for an endpoint.
    pub fn url_for(&self, endpoint: &str) -> String {
        join_url(&self.base_url, endpoint)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.endpoint);
        tracing::debug!(url = %url, params = request.query.len(), "Sending request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .query(&request.query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("Failed to read body: {}", e)))?;

        let body = decode_body(status, &text)?;
        Ok(ApiResponse::new(status, body))
    }
}

/// Decode a body. Success responses must be JSON; error bodies fall back to plain text.
fn decode_body(status: u16, text: &str) -> std::result::Result<Value, TransportError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(e) if (200..300).contains(&status) => Err(TransportError::InvalidBody(e.to_string())),
        Err(_) => Ok(Value::String(text.to_string())),
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
