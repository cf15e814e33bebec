//! Request, response and error types for the remote LMS API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single GET request against the LMS API.
///
/// `endpoint` is relative to the configured base path, e.g. `/courses/42/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub endpoint: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Create a request with no query parameters.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter. Repeated keys are allowed (`include[]=a&include[]=b`).
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Look up the first value for a query key.
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// A decoded response. `body` is `Value::Null` for empty bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify a non-success response into a typed error.
    ///
    /// Returns `None` for 2xx responses.
    pub fn classify(&self) -> Option<ApiError> {
        if self.is_success() {
            return None;
        }
        let message = error_message(&self.body);
        Some(match self.status {
            429 => ApiError::RateLimited {
                status: Some(self.status),
                message,
            },
            400..=499 => ApiError::ClientError {
                status: self.status,
                message,
            },
            _ => ApiError::Transient {
                status: Some(self.status),
                message,
            },
        })
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"errors": [{"message": ..}]}`, `{"message": ..}`,
/// `{"error": ..}` and plain string bodies.
pub fn error_message(body: &Value) -> String {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
            .collect();
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return message.to_string();
    }
    match body {
        Value::String(s) => s.clone(),
        Value::Null => "empty response body".to_string(),
        other => other.to_string(),
    }
}

/// Typed outcome of a failed API call.
///
/// Network-level problems never cross into the orchestrator as anything
/// other than one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiError {
    /// Remote signalled quota exhaustion.
    #[error("Rate limited (status {status:?}): {message}")]
    RateLimited { status: Option<u16>, message: String },

    /// Network failure, timeout or 5xx.
    #[error("Transient failure (status {status:?}): {message}")]
    Transient { status: Option<u16>, message: String },

    /// Non-retryable 4xx.
    #[error("Client error {status}: {message}")]
    ClientError { status: u16, message: String },

    /// Retry budget spent.
    #[error("REQUEST_FAILED after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl ApiError {
    /// Stable error code surfaced in results and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Transient { .. } => "TRANSIENT",
            ApiError::ClientError { .. } => "CLIENT_ERROR",
            ApiError::Exhausted { .. } => "REQUEST_FAILED",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { status, .. } | ApiError::Transient { status, .. } => *status,
            ApiError::ClientError { status, .. } => Some(*status),
            ApiError::Exhausted { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient { .. })
    }

    /// Check whether this error means the remote quota is exhausted.
    ///
    /// The API does not reliably send quota headers, so exhaustion is
    /// inferred from a 429 status or from a message containing one of
    /// `patterns` (case-insensitive). `Exhausted` never counts: its message
    /// only echoes the last attempt.
    pub fn is_rate_limit(&self, patterns: &[String]) -> bool {
        match self {
            ApiError::RateLimited { .. } => true,
            ApiError::Exhausted { .. } => false,
            ApiError::Transient { status, message } => {
                *status == Some(429) || matches_pattern(message, patterns)
            }
            ApiError::ClientError { status, message } => *status == 429 || matches_pattern(message, patterns),
        }
    }

    /// Reclassify as `RateLimited`, keeping status and message.
    pub fn into_rate_limited(self) -> ApiError {
        match self {
            ApiError::Transient { status, message } => ApiError::RateLimited { status, message },
            ApiError::ClientError { status, message } => ApiError::RateLimited {
                status: Some(status),
                message,
            },
            other => other,
        }
    }
}

fn matches_pattern(message: &str, patterns: &[String]) -> bool {
    let text = message.to_lowercase();
    patterns.iter().any(|p| !p.is_empty() && text.contains(&p.to_lowercase()))
}
