//! External transformer boundary.
//!
//! The orchestrator hands a collected document and a small configuration
//! document to a [`Transformer`] and gets one JSON document back. The
//! production implementation runs an external program:
//!
//! ```text
//! <program> [args...] <input.json> <config.json> [--bulk]
//! ```
//!
//! stdout must be a single JSON document. A non-zero exit, or stdout that
//! does not parse, is a failure carrying the program's stderr.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;

/// Whether the transformer sees one unit or a concatenation of many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    Single,
    Bulk,
}

impl TransformMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformMode::Single => "single",
            TransformMode::Bulk => "bulk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("failed to start transformer '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("transformer exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("transformer produced malformed output: {0}")]
    Malformed(String),

    #[error("transformer timed out after {0:?}")]
    Timeout(Duration),

    #[error("transformer I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        TransformError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::Io(err.to_string())
    }
}

/// Converts a collected document into the downstream shape.
///
/// Implementations must be cancel-safe: the orchestrator drops the future
/// when its timeout fires.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, document: &Value, config: &Value, mode: TransformMode) -> Result<Value, TransformError>;

    fn description(&self) -> &str;
}

/// Program and fixed leading arguments for the external transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            program: "lmsflow-transform".to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}

impl TransformerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Runs the transformer as a child process.
///
/// Both temporary documents are deleted when `transform` returns or its
/// future is dropped, and the child is killed if it is still running.
#[derive(Debug, Clone)]
pub struct ProcessTransformer {
    config: TransformerConfig,
}

impl ProcessTransformer {
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// `sh -c <script>`; the script sees the input and config paths as `$1` and `$2`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(TransformerConfig::new("sh").arg("-c").arg(script).arg("lmsflow-transform"))
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }
}

fn write_temp_json(value: &Value, prefix: &str) -> Result<NamedTempFile, TransformError> {
    let mut file = tempfile::Builder::new().prefix(prefix).suffix(".json").tempfile()?;
    serde_json::to_writer(&mut file, value)?;
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl Transformer for ProcessTransformer {
    async fn transform(&self, document: &Value, config: &Value, mode: TransformMode) -> Result<Value, TransformError> {
        let input = write_temp_json(document, "lmsflow-input-")?;
        let config_file = write_temp_json(config, "lmsflow-config-")?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args).arg(input.path()).arg(config_file.path());
        if mode == TransformMode::Bulk {
            cmd.arg("--bulk");
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.config.program, mode = mode.as_str(), input = %input.path().display(), "Starting transformer");

        let child = cmd.spawn().map_err(|e| TransformError::Spawn {
            program: self.config.program.clone(),
            message: e.to_string(),
        })?;
        let output = child.wait_with_output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(TransformError::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            if stderr.is_empty() {
                TransformError::Malformed(e.to_string())
            } else {
                TransformError::Malformed(format!("{} (stderr: {})", e, stderr))
            }
        })
    }

    fn description(&self) -> &str {
        &self.config.program
    }
}
