//! Per-run stage monitor.
//!
//! One `StageMonitor` belongs to exactly one run; concurrent runs each get
//! their own. Misuse (completing a stage that never started, finishing a
//! stage twice) is logged and recorded as a run warning, never a panic.

use chrono::{DateTime, Utc};

use crate::id::generate_run_id;
use crate::monitor::report::{EfficiencyThresholds, RunReport};
use crate::monitor::stage::{StageMetadata, StageRecord, StageStatus};

#[derive(Debug, Clone)]
pub struct StageMonitor {
    run_id: String,
    created_at: DateTime<Utc>,
    records: Vec<StageRecord>,
    warnings: Vec<String>,
    thresholds: EfficiencyThresholds,
}

impl Default for StageMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMonitor {
    pub fn new() -> Self {
        Self::with_thresholds(EfficiencyThresholds::default())
    }

    pub fn with_thresholds(thresholds: EfficiencyThresholds) -> Self {
        Self {
            run_id: generate_run_id(),
            created_at: Utc::now(),
            records: Vec::new(),
            warnings: Vec::new(),
            thresholds,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage == stage)
    }

    fn record_mut(&mut self, stage: &str) -> Option<&mut StageRecord> {
        self.records.iter_mut().find(|r| r.stage == stage)
    }

    /// Register stages that are expected to run, in order, as pending.
    pub fn plan(&mut self, stages: &[&str]) {
        for stage in stages {
            if self.record(stage).is_none() {
                self.records.push(StageRecord::pending(*stage));
            }
        }
    }

    /// Start a stage. Starting a stage that already ran is ignored with a warning.
    pub fn start(&mut self, stage: &str, metadata: Option<StageMetadata>) {
        let metadata = metadata.unwrap_or_default();
        match self.record_mut(stage) {
            Some(record) if record.status == StageStatus::Pending => {
                record.begin(metadata);
            }
            Some(record) => {
                let status = record.status;
                self.note(format!("stage '{}' already {}, start ignored", stage, status.as_str()));
                return;
            }
            None => self.records.push(StageRecord::running(stage, metadata)),
        }
        tracing::info!(run_id = %self.run_id, stage = stage, "Stage started");
    }

    /// Mark a running stage completed.
    pub fn complete(&mut self, stage: &str, metadata: Option<StageMetadata>) {
        if let Some(record) = self.running_record(stage, "complete") {
            record.finish(StageStatus::Completed, metadata.unwrap_or_default());
            let duration_ms = record.duration_ms();
            tracing::info!(run_id = %self.run_id, stage = stage, duration_ms = duration_ms, "Stage completed");
        }
    }

    /// Mark a running stage failed. The error is added to the stage's metadata.
    pub fn fail(&mut self, stage: &str, error: &str, metadata: Option<StageMetadata>) {
        if let Some(record) = self.running_record(stage, "fail") {
            let mut metadata = metadata.unwrap_or_default();
            metadata.errors.insert(0, error.to_string());
            record.finish(StageStatus::Failed, metadata);
            let duration_ms = record.duration_ms();
            tracing::error!(run_id = %self.run_id, stage = stage, duration_ms = duration_ms, error = error, "Stage failed");
        }
    }

    /// Skip a stage that has not started.
    pub fn skip(&mut self, stage: &str, reason: &str) {
        match self.record_mut(stage) {
            Some(record) if record.status == StageStatus::Pending => {
                *record = StageRecord::skipped(stage, reason);
            }
            Some(record) => {
                let status = record.status;
                self.note(format!("stage '{}' already {}, skip ignored", stage, status.as_str()));
                return;
            }
            None => self.records.push(StageRecord::skipped(stage, reason)),
        }
        tracing::info!(run_id = %self.run_id, stage = stage, reason = reason, "Stage skipped");
    }

    /// Skip every stage still pending.
    pub fn skip_pending(&mut self, reason: &str) {
        let pending: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.status == StageStatus::Pending)
            .map(|r| r.stage.clone())
            .collect();
        for stage in pending {
            self.skip(&stage, reason);
        }
    }

    /// Attach a warning to a pending or running stage.
    ///
    /// Finalized records are never touched: a warning for a finished stage
    /// goes to the run, prefixed with the stage name. So does one with no
    /// stage or an unknown stage.
    pub fn warn(&mut self, message: impl Into<String>, stage: Option<&str>) {
        let message = message.into();
        tracing::warn!(run_id = %self.run_id, stage = ?stage, "{}", message);
        let Some(stage) = stage else {
            self.warnings.push(message);
            return;
        };
        match self.record_mut(stage) {
            Some(record) if matches!(record.status, StageStatus::Pending | StageStatus::Running) => {
                record.metadata.warnings.push(message);
            }
            Some(_) => self.warnings.push(format!("{}: {}", stage, message)),
            None => self.warnings.push(message),
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn report(&self) -> RunReport {
        RunReport::from_records(&self.run_id, &self.records, &self.warnings, &self.thresholds)
    }

    /// Clear all records and start a fresh run under a new ID.
    pub fn reset(&mut self) {
        self.run_id = generate_run_id();
        self.created_at = Utc::now();
        self.records.clear();
        self.warnings.clear();
    }

    fn running_record(&mut self, stage: &str, action: &str) -> Option<&mut StageRecord> {
        let status = self.record(stage).map(|r| r.status);
        match status {
            Some(StageStatus::Running) => self.record_mut(stage),
            Some(other) => {
                self.note(format!("stage '{}' is {}, {} ignored", stage, other.as_str(), action));
                None
            }
            None => {
                self.note(format!("stage '{}' was never started, {} ignored", stage, action));
                None
            }
        }
    }

    fn note(&mut self, message: String) {
        tracing::warn!(run_id = %self.run_id, "{}", message);
        self.warnings.push(message);
    }
}
