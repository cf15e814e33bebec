//! Stage tracking for pipeline runs.
//!
//! A [`StageMonitor`] records when each stage of one run started and ended,
//! what it produced, and what went wrong. [`RunReport`] is the derived summary.

mod report;
mod stage;
mod tracker;

pub use report::{Efficiency, EfficiencyThresholds, RunReport, StageTiming};
pub use stage::{StageMetadata, StageRecord, StageStatus};
pub use tracker::StageMonitor;
