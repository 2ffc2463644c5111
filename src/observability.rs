//! Observability module for logging setup, stage reporting and metrics.
//!
//! This module provides:
//! - Structured logging with configurable levels and formats
//! - Tracing span helpers for page processing
//! - The [`StageObserver`] hook through which the pipeline reports every stage outcome
//! - Metrics collection and a Prometheus text snapshot for batch runs

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;
use crate::preprocessing::{StageOutcomeRecord, StagePath};

/// Log target of the per-stage preprocessing events.
pub const STAGE_LOG_TARGET: &str = "sheet_preprocessing";

/// Builds the log filter: `RUST_LOG` plus the configured level for the crate and its
/// stage events.
pub fn log_filter(config: &LoggingConfig) -> Result<tracing_subscriber::EnvFilter> {
    Ok(tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("sheetclean={}", config.log_level).parse()?)
        .add_directive(format!("{}={}", STAGE_LOG_TARGET, config.log_level).parse()?))
}

/// Initialize structured logging with tracing and configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = log_filter(config)?;

    // Pretty for development, JSON for everything else
    if config.use_pretty_format() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Initialize metrics collection
///
/// Installs the global Prometheus recorder. The returned handle renders the
/// collected metrics in the Prometheus text format.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Metrics collection initialized");
    Ok(handle)
}

/// Create a span for processing one page
pub fn page_span(page: &str) -> tracing::Span {
    tracing::info_span!("page_processing", page = page, component = "pipeline")
}

/// Record the outcome of a finished page
pub fn record_page_metrics(success: bool, duration: std::time::Duration) {
    metrics::counter!("sheet_pages_total", "result" => if success { "success" } else { "failure" })
        .increment(1);
    metrics::histogram!("sheet_page_duration_seconds").record(duration.as_secs_f64());
}

/// Receives the outcome of every stage the pipeline runs.
///
/// Observers are shared between worker threads, so implementations must be
/// `Send + Sync`.
pub trait StageObserver: Send + Sync {
    fn on_stage(&self, record: &StageOutcomeRecord);
}

/// Default observer: logs each stage and feeds the stage metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_stage(&self, record: &StageOutcomeRecord) {
        let stage = record.stage.as_str();
        let path = record.path.as_str();

        if record.path.is_degraded() {
            tracing::warn!(
                stage = %stage,
                path = %path,
                reason = ?record.reason,
                processing_time_ms = record.processing_time_ms,
                "Stage degraded"
            );
        } else {
            tracing::debug!(
                stage = %stage,
                path = %path,
                processing_time_ms = record.processing_time_ms,
                "Stage completed"
            );
        }

        metrics::counter!("sheet_stage_outcomes_total", "stage" => stage, "path" => path)
            .increment(1);
        if record.path != StagePath::Skipped {
            metrics::histogram!("sheet_stage_duration_seconds", "stage" => stage)
                .record(record.processing_time_ms as f64 / 1000.0);
        }
    }
}

/// Observer that keeps every record it sees, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<StageOutcomeRecord>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the records collected so far.
    pub fn records(&self) -> Vec<StageOutcomeRecord> {
        self.records.lock().clone()
    }
}

impl StageObserver for RecordingObserver {
    fn on_stage(&self, record: &StageOutcomeRecord) {
        self.records.lock().push(record.clone());
    }
}
