//! Run-level report derived from stage records.

use serde::{Deserialize, Serialize};

use crate::monitor::stage::{StageRecord, StageStatus};

/// Qualitative rating of a run's total duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Efficiency {
    Excellent,
    Good,
    Fair,
    NeedsOptimization,
}

impl Efficiency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Efficiency::Excellent => "excellent",
            Efficiency::Good => "good",
            Efficiency::Fair => "fair",
            Efficiency::NeedsOptimization => "needs-optimization",
        }
    }
}

/// Upper bounds (exclusive, milliseconds) for each rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyThresholds {
    pub excellent_ms: u64,
    pub good_ms: u64,
    pub fair_ms: u64,
}

impl Default for EfficiencyThresholds {
    fn default() -> Self {
        Self {
            excellent_ms: 5_000,
            good_ms: 15_000,
            fair_ms: 30_000,
        }
    }
}

impl EfficiencyThresholds {
    pub fn rate(&self, total_ms: u64) -> Efficiency {
        if total_ms < self.excellent_ms {
            Efficiency::Excellent
        } else if total_ms < self.good_ms {
            Efficiency::Good
        } else if total_ms < self.fair_ms {
            Efficiency::Fair
        } else {
            Efficiency::NeedsOptimization
        }
    }
}

/// Duration of one stage as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub status: StageStatus,
    pub duration_ms: u64,
}

/// Summary of a run. Never stored; recomputed from the records on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    /// True when no stage failed.
    pub success: bool,
    pub total_duration_ms: u64,
    pub stages: Vec<StageTiming>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub api_calls: u64,
    pub record_count: u64,
    pub efficiency: Efficiency,
    pub slowest_stage: Option<String>,
    pub fastest_stage: Option<String>,
    pub failed_stage: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn from_records(
        run_id: &str,
        records: &[StageRecord],
        run_warnings: &[String],
        thresholds: &EfficiencyThresholds,
    ) -> Self {
        let count = |status: StageStatus| records.iter().filter(|r| r.status == status).count();

        let total_duration_ms = records.iter().map(StageRecord::duration_ms).sum();

        // Only stages that actually ran compete for slowest/fastest.
        let timed: Vec<&StageRecord> = records
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Completed | StageStatus::Failed))
            .collect();
        let slowest_stage = timed.iter().max_by_key(|r| r.duration_ms()).map(|r| r.stage.clone());
        let fastest_stage = timed.iter().min_by_key(|r| r.duration_ms()).map(|r| r.stage.clone());

        let mut errors = Vec::new();
        let mut warnings: Vec<String> = run_warnings.to_vec();
        for record in records {
            errors.extend(record.metadata.errors.iter().map(|e| format!("{}: {}", record.stage, e)));
            warnings.extend(record.metadata.warnings.iter().map(|w| format!("{}: {}", record.stage, w)));
        }

        let failed_stage = records
            .iter()
            .find(|r| r.status == StageStatus::Failed)
            .map(|r| r.stage.clone());

        Self {
            run_id: run_id.to_string(),
            success: failed_stage.is_none(),
            total_duration_ms,
            stages: records
                .iter()
                .map(|r| StageTiming {
                    stage: r.stage.clone(),
                    status: r.status,
                    duration_ms: r.duration_ms(),
                })
                .collect(),
            completed: count(StageStatus::Completed),
            failed: count(StageStatus::Failed),
            skipped: count(StageStatus::Skipped),
            pending: count(StageStatus::Pending) + count(StageStatus::Running),
            api_calls: records.iter().filter_map(|r| r.metadata.api_calls).sum(),
            record_count: records.iter().filter_map(|r| r.metadata.record_count).sum(),
            efficiency: thresholds.rate(total_duration_ms),
            slowest_stage,
            fastest_stage,
            failed_stage,
            errors,
            warnings,
        }
    }
}
