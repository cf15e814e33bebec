//! Staged data pipeline.
//!
//! This module provides:
//! - **CollectionProfile**: declarative toggles selecting what to collect per unit.
//! - **Collector**: turns a profile into scheduled, paginated API calls.
//! - **Transformer**: the external transformation step (`ProcessTransformer` runs a program).
//! - **PipelineOrchestrator**: single-unit and bulk runs, stage tracking, results.

mod collect;
mod orchestrator;
mod profile;
mod result;
mod transformer;

pub use collect::{BulkFilters, CollectedDocument, CollectionOutcome, Collector};
pub use orchestrator::{
    OrchestratorStatus, PipelineConfig, PipelineOrchestrator, STAGE_ASSEMBLE, STAGE_COLLECT, STAGE_DISCOVER,
    STAGE_TRANSFORM,
};
pub use profile::{
    CollectionProfile, SECTION_ANNOUNCEMENTS, SECTION_ASSIGNMENTS, SECTION_DETAILS, SECTION_ENROLLMENTS,
    SECTION_MODULES, SECTION_STUDENTS, SECTION_SUBMISSIONS, Section,
};
pub use result::{BulkPipelineResult, PipelineResult, ResultMetadata, UnitFailure};
pub use transformer::{ProcessTransformer, TransformError, TransformMode, Transformer, TransformerConfig};
