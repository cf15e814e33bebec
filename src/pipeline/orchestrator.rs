//! Staged pipeline orchestrator.
//!
//! Sequences the stages of a run and drives a fresh [`StageMonitor`] for each:
//!
//! - single unit: collect, transform, assemble
//! - bulk: discover, collect (every unit, concurrently), transform, assemble
//!
//! Any stage failure halts the stages after it. Whatever was collected
//! before the failure stays in the result.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::error::{LmsflowError, Result};
use crate::monitor::{RunReport, StageMetadata, StageMonitor};
use crate::pipeline::collect::{BulkFilters, CollectedDocument, Collector};
use crate::pipeline::profile::CollectionProfile;
use crate::pipeline::result::{BulkPipelineResult, PipelineResult, ResultMetadata, UnitFailure};
use crate::pipeline::transformer::{TransformError, TransformMode, Transformer};
use crate::scheduler::{AdaptiveScheduler, SchedulerMetrics, SchedulerStatus};

pub const STAGE_DISCOVER: &str = "discover";
pub const STAGE_COLLECT: &str = "collect";
pub const STAGE_TRANSFORM: &str = "transform";
pub const STAGE_ASSEMBLE: &str = "assemble";

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub single_transform_timeout_ms: u64,
    pub bulk_transform_timeout_ms: u64,
    /// Units collected at once in bulk mode. The scheduler still paces every call.
    pub bulk_concurrency: usize,
    pub per_page: u32,
    pub max_pages: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            single_transform_timeout_ms: 30_000,
            bulk_transform_timeout_ms: 300_000,
            bulk_concurrency: 4,
            per_page: 100,
            max_pages: 10,
        }
    }
}

impl PipelineConfig {
    pub fn transform_timeout(&self, mode: TransformMode) -> Duration {
        match mode {
            TransformMode::Single => Duration::from_millis(self.single_transform_timeout_ms),
            TransformMode::Bulk => Duration::from_millis(self.bulk_transform_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.single_transform_timeout_ms == 0 || self.bulk_transform_timeout_ms == 0 {
            return Err(LmsflowError::Config("pipeline: transform timeouts must be positive".to_string()));
        }
        if self.bulk_concurrency == 0 {
            return Err(LmsflowError::Config("pipeline: bulk_concurrency must be at least 1".to_string()));
        }
        if self.per_page == 0 || self.max_pages == 0 {
            return Err(LmsflowError::Config("pipeline: per_page and max_pages must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Snapshot of the orchestrator for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub scheduler: SchedulerStatus,
    pub metrics: SchedulerMetrics,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub active_runs: u64,
    pub last_report: Option<RunReport>,
}

#[derive(Debug, Default)]
struct RunCounters {
    started: u64,
    succeeded: u64,
    failed: u64,
    active: u64,
    last_report: Option<RunReport>,
}

/// Where a run stopped, if it did.
struct Halt {
    stage: &'static str,
    error: String,
}

pub struct PipelineOrchestrator {
    scheduler: AdaptiveScheduler,
    collector: Collector,
    transformer: Arc<dyn Transformer>,
    profile: CollectionProfile,
    config: PipelineConfig,
    counters: Mutex<RunCounters>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator. The profile and config are validated here,
    /// before any request can be issued.
    pub fn new(
        scheduler: AdaptiveScheduler,
        transformer: Arc<dyn Transformer>,
        profile: CollectionProfile,
        config: PipelineConfig,
    ) -> Result<Self> {
        profile.validate()?;
        config.validate()?;
        scheduler.config().validate()?;

        let collector = Collector::new(scheduler.clone(), config.per_page, config.max_pages);
        Ok(Self {
            scheduler,
            collector,
            transformer,
            profile,
            config,
            counters: Mutex::new(RunCounters::default()),
        })
    }

    pub fn scheduler(&self) -> &AdaptiveScheduler {
        &self.scheduler
    }

    pub fn profile(&self) -> &CollectionProfile {
        &self.profile
    }

    /// Collect, transform and assemble one unit.
    pub async fn process_unit(&self, unit_id: u64) -> PipelineResult {
        let started = Instant::now();
        let mut monitor = StageMonitor::new();
        monitor.plan(&[STAGE_COLLECT, STAGE_TRANSFORM, STAGE_ASSEMBLE]);
        self.run_started();
        tracing::info!(run_id = %monitor.run_id(), unit_id = unit_id, "Processing unit");

        let mut api_calls = 0;
        let mut transformed = None;

        monitor.start(STAGE_COLLECT, Some(StageMetadata::new().with_extra("unit_id", unit_id)));
        let outcome = self.collector.collect_unit(unit_id, &self.profile).await;
        api_calls += outcome.api_calls;
        let collect_meta = StageMetadata::new()
            .with_api_calls(outcome.api_calls)
            .with_record_count(outcome.document.record_count());

        let halt = match outcome.error_summary() {
            Some(error) => {
                monitor.fail(STAGE_COLLECT, &error, Some(collect_meta));
                Some(Halt {
                    stage: STAGE_COLLECT,
                    error,
                })
            }
            None => {
                monitor.complete(STAGE_COLLECT, Some(collect_meta));
                let config = self.transform_config(&monitor, TransformMode::Single, &[unit_id]);
                match self.run_transform(&mut monitor, &outcome.document, &config, TransformMode::Single).await {
                    Ok(value) => {
                        transformed = Some(value);
                        None
                    }
                    Err(halt) => Some(halt),
                }
            }
        };

        let (error, failed_stage) = self.conclude(&mut monitor, halt, outcome.document.record_count());
        let metadata = self.finish_run(&monitor, started, api_calls);

        PipelineResult {
            success: failed_stage.is_none(),
            unit_id,
            collected_data: Some(outcome.document),
            transformed_data: transformed,
            error,
            failed_stage,
            metadata,
        }
    }

    /// Discover units matching `filters`, collect each, and transform them together.
    ///
    /// Units that fail collection are excluded and listed in `errors`; the
    /// run only fails when discovery or the bulk transform fails.
    pub async fn process_bulk(&self, filters: &BulkFilters) -> BulkPipelineResult {
        let started = Instant::now();
        let mut monitor = StageMonitor::new();
        monitor.plan(&[STAGE_DISCOVER, STAGE_COLLECT, STAGE_TRANSFORM, STAGE_ASSEMBLE]);
        self.run_started();
        tracing::info!(run_id = %monitor.run_id(), filters = ?filters, "Processing bulk run");

        let mut api_calls = 0;
        let mut units_discovered = 0;
        let mut collected: Vec<CollectedDocument> = Vec::new();
        let mut failures: Vec<UnitFailure> = Vec::new();
        let mut transformed = None;

        monitor.start(STAGE_DISCOVER, None);
        let (calls, discovery) = self.collector.discover_units(filters).await;
        api_calls += calls;

        let halt = match discovery {
            Err(err) => {
                let error = err.to_string();
                monitor.fail(STAGE_DISCOVER, &error, Some(StageMetadata::new().with_api_calls(calls)));
                Some(Halt {
                    stage: STAGE_DISCOVER,
                    error,
                })
            }
            Ok(unit_ids) => {
                units_discovered = unit_ids.len();
                monitor.complete(
                    STAGE_DISCOVER,
                    Some(
                        StageMetadata::new()
                            .with_api_calls(calls)
                            .with_record_count(unit_ids.len() as u64),
                    ),
                );

                monitor.start(STAGE_COLLECT, Some(StageMetadata::new().with_extra("units", unit_ids.len())));
                let outcomes: Vec<_> = stream::iter(unit_ids.iter().copied())
                    .map(|unit_id| self.collector.collect_unit(unit_id, &self.profile))
                    .buffered(self.config.bulk_concurrency)
                    .collect()
                    .await;

                let mut collect_calls = 0;
                for outcome in outcomes {
                    collect_calls += outcome.api_calls;
                    match outcome.error_summary() {
                        Some(error) => {
                            let unit_id = outcome.document.unit_id;
                            monitor.warn(format!("unit {} excluded: {}", unit_id, error), Some(STAGE_COLLECT));
                            failures.push(UnitFailure {
                                unit_id,
                                stage: STAGE_COLLECT.to_string(),
                                error,
                            });
                        }
                        None => collected.push(outcome.document),
                    }
                }
                api_calls += collect_calls;

                let records: u64 = collected.iter().map(CollectedDocument::record_count).sum();
                monitor.complete(
                    STAGE_COLLECT,
                    Some(
                        StageMetadata::new()
                            .with_api_calls(collect_calls)
                            .with_record_count(records)
                            .with_extra("units_collected", collected.len())
                            .with_extra("units_failed", failures.len()),
                    ),
                );

                if collected.is_empty() {
                    monitor.skip(STAGE_TRANSFORM, "no units collected");
                    None
                } else {
                    let ids: Vec<u64> = collected.iter().map(|doc| doc.unit_id).collect();
                    let config = self.transform_config(&monitor, TransformMode::Bulk, &ids);
                    let document = json!({ "units": collected });
                    match self.run_transform(&mut monitor, &document, &config, TransformMode::Bulk).await {
                        Ok(value) => {
                            transformed = Some(value);
                            None
                        }
                        Err(halt) => Some(halt),
                    }
                }
            }
        };

        let records = collected.iter().map(CollectedDocument::record_count).sum();
        let (error, failed_stage) = self.conclude(&mut monitor, halt, records);
        let metadata = self.finish_run(&monitor, started, api_calls);

        BulkPipelineResult {
            success: failed_stage.is_none(),
            units_discovered,
            units_processed: collected.len(),
            collected_data: collected,
            transformed_data: transformed,
            errors: failures,
            error,
            failed_stage,
            metadata,
        }
    }

    /// Current scheduler state, run counters and the last finished run's report.
    pub fn status(&self) -> OrchestratorStatus {
        let counters = self.counters();
        OrchestratorStatus {
            scheduler: self.scheduler.status(),
            metrics: self.scheduler.metrics(),
            runs_started: counters.started,
            runs_succeeded: counters.succeeded,
            runs_failed: counters.failed,
            active_runs: counters.active,
            last_report: counters.last_report.clone(),
        }
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    async fn run_transform(
        &self,
        monitor: &mut StageMonitor,
        document: &impl Serialize,
        config: &Value,
        mode: TransformMode,
    ) -> std::result::Result<Value, Halt> {
        let timeout = self.config.transform_timeout(mode);
        monitor.start(
            STAGE_TRANSFORM,
            Some(
                StageMetadata::new()
                    .with_extra("mode", mode.as_str())
                    .with_extra("transformer", self.transformer.description()),
            ),
        );

        let result = match serde_json::to_value(document) {
            Ok(document) => match tokio::time::timeout(timeout, self.transformer.transform(&document, config, mode)).await {
                Ok(result) => result,
                Err(_) => Err(TransformError::Timeout(timeout)),
            },
            Err(err) => Err(TransformError::from(err)),
        };

        match result {
            Ok(value) => {
                monitor.complete(STAGE_TRANSFORM, None);
                Ok(value)
            }
            Err(err) => {
                let error = err.to_string();
                monitor.fail(STAGE_TRANSFORM, &error, None);
                Err(Halt {
                    stage: STAGE_TRANSFORM,
                    error,
                })
            }
        }
    }

    /// Run assemble, or skip what is left after a halt.
    fn conclude(&self, monitor: &mut StageMonitor, halt: Option<Halt>, records: u64) -> (Option<String>, Option<String>) {
        match halt {
            Some(halt) => {
                monitor.skip_pending(&format!("halted after {} failed", halt.stage));
                (Some(halt.error), Some(halt.stage.to_string()))
            }
            None => {
                monitor.start(STAGE_ASSEMBLE, None);
                monitor.complete(STAGE_ASSEMBLE, Some(StageMetadata::new().with_extra("records", records)));
                (None, None)
            }
        }
    }

    fn transform_config(&self, monitor: &StageMonitor, mode: TransformMode, unit_ids: &[u64]) -> Value {
        json!({
            "run_id": monitor.run_id(),
            "mode": mode,
            "unit_ids": unit_ids,
            "sections": self.profile.section_names(),
            "profile": self.profile,
        })
    }

    fn run_started(&self) {
        let mut counters = self.counters();
        counters.started += 1;
        counters.active += 1;
    }

    fn finish_run(&self, monitor: &StageMonitor, started: Instant, api_calls: u64) -> ResultMetadata {
        let report = monitor.report();
        let processing_time_ms = started.elapsed().as_millis() as u64;

        if report.success {
            tracing::info!(
                run_id = %report.run_id,
                duration_ms = processing_time_ms,
                api_calls = api_calls,
                efficiency = report.efficiency.as_str(),
                "Run succeeded"
            );
        } else {
            tracing::error!(
                run_id = %report.run_id,
                failed_stage = ?report.failed_stage,
                duration_ms = processing_time_ms,
                "Run failed"
            );
        }

        {
            let mut counters = self.counters();
            counters.active = counters.active.saturating_sub(1);
            if report.success {
                counters.succeeded += 1;
            } else {
                counters.failed += 1;
            }
            counters.last_report = Some(report.clone());
        }

        ResultMetadata {
            run_id: monitor.run_id().to_string(),
            processing_time_ms,
            stages: monitor.records().to_vec(),
            api_calls_used: api_calls,
            report,
        }
    }

    fn counters(&self) -> MutexGuard<'_, RunCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("scheduler", &self.scheduler)
            .field("transformer", &self.transformer.description())
            .field("profile", &self.profile)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, HttpCaller, MockTransport, RateGate, RetryPolicy};
    use crate::monitor::StageStatus;
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the document it receives, or fails / hangs on request.
    struct StubTransformer {
        fail: Option<TransformError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubTransformer {
        fn ok() -> Self {
            Self {
                fail: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(err: TransformError) -> Self {
            Self {
                fail: Some(err),
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::ok() }
        }
    }

    #[async_trait]
    impl Transformer for StubTransformer {
        async fn transform(&self, document: &Value, config: &Value, mode: TransformMode) -> std::result::Result<Value, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail {
                Some(err) => Err(err.clone()),
                None => Ok(json!({"mode": mode, "config": config, "input": document})),
            }
        }

        fn description(&self) -> &str {
            "stub"
        }
    }

    fn orchestrator(transport: Arc<MockTransport>, transformer: Arc<dyn Transformer>) -> PipelineOrchestrator {
        let caller = HttpCaller::new(transport, Arc::new(RateGate::hourly(10_000)), RetryPolicy::new(2, 10, 5_000));
        let scheduler = AdaptiveScheduler::new(caller, SchedulerConfig::default());
        PipelineOrchestrator::new(scheduler, transformer, CollectionProfile::minimal(), PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_profile_rejected_before_network() {
        let transport = Arc::new(MockTransport::new());
        let caller = HttpCaller::new(transport.clone(), Arc::new(RateGate::hourly(10)), RetryPolicy::default());
        let profile = CollectionProfile {
            modules: None,
            ..CollectionProfile::standard()
        };
        let err = PipelineOrchestrator::new(
            AdaptiveScheduler::new(caller, SchedulerConfig::default()),
            Arc::new(StubTransformer::ok()),
            profile,
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LmsflowError::Config(_)));
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_invalid_pipeline_config() {
        let config = PipelineConfig {
            bulk_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            PipelineConfig::default().transform_timeout(TransformMode::Bulk),
            Duration::from_secs(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_unit_success() {
        let transport = Arc::new(MockTransport::new().route("/courses/42", ApiResponse::ok(json!({"id": 42}))));
        let orch = orchestrator(transport, Arc::new(StubTransformer::ok()));

        let result = orch.process_unit(42).await;
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.metadata.api_calls_used, 1);

        let transformed = result.transformed_data.unwrap();
        assert_eq!(transformed["mode"], "single");
        assert_eq!(transformed["input"]["sections"]["details"]["id"], 42);
        assert_eq!(transformed["config"]["unit_ids"], json!([42]));

        let stages: Vec<_> = result.metadata.stages.iter().map(|s| (s.stage.as_str(), s.status)).collect();
        assert_eq!(
            stages,
            vec![
                (STAGE_COLLECT, StageStatus::Completed),
                (STAGE_TRANSFORM, StageStatus::Completed),
                (STAGE_ASSEMBLE, StageStatus::Completed)
            ]
        );
        assert_eq!(result.metadata.report.api_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_failure_halts_run() {
        let transport = Arc::new(MockTransport::new().route("/courses/7", ApiResponse::new(404, json!({"error": "not found"}))));
        let transformer = Arc::new(StubTransformer::ok());
        let orch = orchestrator(transport, transformer.clone());

        let result = orch.process_unit(7).await;
        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some(STAGE_COLLECT));
        assert!(result.error.unwrap().contains("404"));
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 0);

        let transform = result.metadata.stages.iter().find(|s| s.stage == STAGE_TRANSFORM).unwrap();
        assert_eq!(transform.status, StageStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_timeout_fails_stage() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport, Arc::new(StubTransformer::slow(Duration::from_secs(60))));

        let result = orch.process_unit(1).await;
        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some(STAGE_TRANSFORM));
        assert!(result.error.unwrap().contains("timed out"));
        assert!(result.collected_data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_discovery_failure() {
        let transport = Arc::new(MockTransport::new().route("/courses", ApiResponse::new(401, json!({"error": "unauthorized"}))));
        let orch = orchestrator(transport, Arc::new(StubTransformer::ok()));

        let result = orch.process_bulk(&BulkFilters::default()).await;
        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some(STAGE_DISCOVER));
        assert_eq!(result.units_discovered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_with_no_units_skips_transform() {
        let transport = Arc::new(MockTransport::new().route("/courses", ApiResponse::ok(json!([]))));
        let transformer = Arc::new(StubTransformer::ok());
        let orch = orchestrator(transport, transformer.clone());

        let result = orch.process_bulk(&BulkFilters::default()).await;
        assert!(result.success);
        assert_eq!(result.units_processed, 0);
        assert!(result.transformed_data.is_none());
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.metadata.report.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_transform_failure_keeps_collected_units() {
        let transport = Arc::new(MockTransport::new().route("/courses", ApiResponse::ok(json!([{"id": 1}, {"id": 2}]))));
        let orch = orchestrator(
            transport,
            Arc::new(StubTransformer::failing(TransformError::Exit {
                code: Some(2),
                stderr: "bad input".to_string(),
            })),
        );

        let result = orch.process_bulk(&BulkFilters::default()).await;
        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some(STAGE_TRANSFORM));
        assert_eq!(result.processed_unit_ids(), vec![1, 2]);
        assert!(result.error.unwrap().contains("bad input"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_tracks_runs() {
        let transport = Arc::new(MockTransport::new().route("/courses/2", ApiResponse::new(404, json!("missing"))));
        let orch = orchestrator(transport, Arc::new(StubTransformer::ok()));

        orch.process_unit(1).await;
        orch.process_unit(2).await;

        let status = orch.status();
        assert_eq!(status.runs_started, 2);
        assert_eq!(status.runs_succeeded, 1);
        assert_eq!(status.runs_failed, 1);
        assert_eq!(status.active_runs, 0);
        assert_eq!(status.last_report.unwrap().failed_stage.as_deref(), Some(STAGE_COLLECT));
        assert_eq!(status.metrics.total_requests, 2);
    }
}
