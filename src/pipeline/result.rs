//! Results returned to pipeline callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::monitor::{RunReport, StageRecord};
use crate::pipeline::collect::CollectedDocument;

/// Timing and stage detail shared by single and bulk results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub run_id: String,
    pub processing_time_ms: u64,
    pub stages: Vec<StageRecord>,
    pub api_calls_used: u64,
    pub report: RunReport,
}

/// Outcome of one single-unit run.
///
/// On failure, `failed_stage` names the stage and `collected_data` keeps
/// whatever was gathered before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub unit_id: u64,
    pub collected_data: Option<CollectedDocument>,
    pub transformed_data: Option<Value>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub metadata: ResultMetadata,
}

/// A unit excluded from a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_id: u64,
    pub stage: String,
    pub error: String,
}

/// Outcome of one bulk run. Per-unit failures do not fail the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkPipelineResult {
    pub success: bool,
    pub units_discovered: usize,
    pub units_processed: usize,
    pub collected_data: Vec<CollectedDocument>,
    pub transformed_data: Option<Value>,
    pub errors: Vec<UnitFailure>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub metadata: ResultMetadata,
}

impl BulkPipelineResult {
    pub fn processed_unit_ids(&self) -> Vec<u64> {
        self.collected_data.iter().map(|doc| doc.unit_id).collect()
    }

    pub fn failed_unit_ids(&self) -> Vec<u64> {
        self.errors.iter().map(|f| f.unit_id).collect()
    }
}
