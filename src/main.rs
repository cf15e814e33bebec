use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use lmsflow::api::{HttpCaller, RateGate, ReqwestTransport};
use lmsflow::monitor::RunReport;
use lmsflow::pipeline::{BulkFilters, PipelineOrchestrator, ProcessTransformer};
use lmsflow::scheduler::{AdaptiveScheduler, SchedulerMetrics};

/// `RUST_LOG` directives override `log_level` from the config file.
fn setup_logging(log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lmsflow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("lmsflow.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::new();
    if let Some(level) = log_level {
        builder.parse_filters(level);
    }
    builder.parse_default_env().target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<PipelineOrchestrator> {
    config.validate().context("Invalid configuration")?;
    let token = config.api.token()?;

    let transport = ReqwestTransport::new(&config.api.base_url, &config.api.api_path, token, config.api.timeout())
        .context("Failed to build HTTP transport")?;
    let gate = Arc::new(RateGate::hourly(config.api.hourly_limit));
    let caller = HttpCaller::new(Arc::new(transport), gate, config.api.retry_policy());
    let scheduler = AdaptiveScheduler::new(caller, config.scheduler.clone());
    let transformer = ProcessTransformer::new(config.transformer.clone());

    PipelineOrchestrator::new(
        scheduler,
        Arc::new(transformer),
        config.profile.clone(),
        config.pipeline.clone(),
    )
    .context("Failed to build pipeline")
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Unit { id } => handle_unit_command(*id, cli, config).await,
        Commands::Bulk { .. } => {
            let filters = cli.command.bulk_filters().unwrap_or_default();
            handle_bulk_command(&filters, cli, config).await
        }
        Commands::Validate => handle_validate_command(config),
    }
}

async fn handle_unit_command(id: u64, cli: &Cli, config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    println!("{} {}", "Processing unit:".cyan(), id);

    let result = orchestrator.process_unit(id).await;
    print_report(&result.metadata.report, cli.is_verbose());
    if let Some(error) = &result.error {
        println!("{} {}", "Error:".red(), error);
    }

    finish(cli, &orchestrator.metrics(), &result)?;
    if !result.success {
        eyre::bail!(
            "Unit {} failed at stage '{}'",
            id,
            result.failed_stage.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn handle_bulk_command(filters: &BulkFilters, cli: &Cli, config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    println!("{}", "Starting bulk run...".cyan());

    let result = orchestrator.process_bulk(filters).await;
    print_report(&result.metadata.report, cli.is_verbose());
    println!(
        "{} {} of {} unit(s)",
        "Processed:".green(),
        result.units_processed,
        result.units_discovered
    );
    for failure in &result.errors {
        println!("  {} unit {}: {}", "excluded".yellow(), failure.unit_id, failure.error);
    }
    if let Some(error) = &result.error {
        println!("{} {}", "Error:".red(), error);
    }

    finish(cli, &orchestrator.metrics(), &result)?;
    if !result.success {
        eyre::bail!(
            "Bulk run failed at stage '{}'",
            result.failed_stage.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

fn handle_validate_command(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!("{}", "Configuration OK".green());
    println!("  {} {}{}", "API:".cyan(), config.api.base_url, config.api.api_path);
    println!("  {} {}/hour", "Limit:".cyan(), config.api.hourly_limit);
    println!("  {} {}", "Sections:".cyan(), config.profile.section_names().join(", "));
    println!("  {} {}", "Transformer:".cyan(), config.transformer.program);
    if config.api.token().is_err() {
        println!("  {} ${} is not set", "Warning:".yellow(), config.api.token_env);
    }
    Ok(())
}

fn print_report(report: &RunReport, verbose: bool) {
    let status = if report.success {
        "succeeded".green()
    } else {
        "failed".red()
    };
    println!(
        "{} {} in {}ms ({}), {} API call(s), {} record(s)",
        report.run_id,
        status,
        report.total_duration_ms,
        report.efficiency.as_str(),
        report.api_calls,
        report.record_count
    );
    if verbose {
        for stage in &report.stages {
            println!("  {:<10} {:<10} {}ms", stage.stage, stage.status.as_str(), stage.duration_ms);
        }
        for warning in &report.warnings {
            println!("  {} {}", "warning:".yellow(), warning);
        }
    }
}

fn finish(cli: &Cli, metrics: &SchedulerMetrics, result: &impl Serialize) -> Result<()> {
    if cli.metrics {
        println!("{}", "Scheduler metrics:".cyan());
        println!("{}", serde_json::to_string_pretty(metrics).context("Failed to encode metrics")?);
    }
    if let Some(path) = &cli.output {
        write_output(path, result)?;
        println!("{} {}", "Result written to".green(), path.display());
    }
    Ok(())
}

fn write_output(path: &Path, result: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to encode result")?;
    fs::write(path, json).context(format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Logging filter comes from the config, so set it up once that is loaded
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
