//! Error types for lmsflow
//!
//! Centralized error handling using thiserror. Network and transformer
//! failures keep their own typed enums and convert into `LmsflowError`
//! where they cross into crate-level APIs.

use thiserror::Error;

use crate::api::ApiError;
use crate::pipeline::TransformError;

/// All error types that can occur in lmsflow
#[derive(Debug, Error)]
pub enum LmsflowError {
    /// Invalid configuration or collection profile
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote API call failed after classification
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// External transformer failed
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// A pipeline stage failed
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LmsflowError {
    /// Build a stage failure.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for lmsflow operations
pub type Result<T> = std::result::Result<T, LmsflowError>;
