//! Stage records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Finalized records are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

/// Counters and notes attached to a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Free-form stage-specific values.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl StageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_calls(mut self, api_calls: u64) -> Self {
        self.api_calls = Some(api_calls);
        self
    }

    pub fn with_record_count(mut self, record_count: u64) -> Self {
        self.record_count = Some(record_count);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Fold `other` into self. Counters are replaced when present; lists are appended.
    pub fn merge(&mut self, other: StageMetadata) {
        if other.api_calls.is_some() {
            self.api_calls = other.api_calls;
        }
        if other.record_count.is_some() {
            self.record_count = other.record_count;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.extra.extend(other.extra);
    }
}

/// One stage of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub metadata: StageMetadata,
}

impl StageRecord {
    /// A stage that is expected to run but has not started.
    pub fn pending(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            metadata: StageMetadata::default(),
        }
    }

    /// A stage that starts now.
    pub fn running(stage: impl Into<String>, metadata: StageMetadata) -> Self {
        let mut record = Self::pending(stage);
        record.begin(metadata);
        record
    }

    /// A stage that was skipped; zero duration, reason kept as a warning.
    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut record = Self::pending(stage);
        record.status = StageStatus::Skipped;
        record.started_at = Some(now);
        record.ended_at = Some(now);
        record.duration_ms = Some(0);
        record.metadata.warnings.push(reason.into());
        record
    }

    pub(crate) fn begin(&mut self, metadata: StageMetadata) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
        self.metadata.merge(metadata);
    }

    /// Finalize with a terminal status. `ended_at` never precedes `started_at`.
    pub(crate) fn finish(&mut self, status: StageStatus, metadata: StageMetadata) {
        let now = Utc::now();
        let started = self.started_at.unwrap_or(now);
        let ended = now.max(started);

        self.status = status;
        self.started_at = Some(started);
        self.ended_at = Some(ended);
        self.duration_ms = Some((ended - started).num_milliseconds().max(0) as u64);
        self.metadata.merge(metadata);
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms.unwrap_or(0)
    }
}
