//! # Batch Runner
//!
//! Reads page images from disk, runs them through the enhancement pipeline in
//! parallel and writes the results into a fresh, timestamped run directory together
//! with a `manifest.json` describing every page.
//!
//! This is the only part of the crate that touches the filesystem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{AppConfig, PipelineConfig};
use crate::errors::error_logging;
use crate::errors::{AppError, AppResult};
use crate::observability::{page_span, record_page_metrics};
use crate::pipeline::{PageReport, Pipeline};

/// Raster formats accepted as input.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Result of one input page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// Input file
    pub source: PathBuf,
    /// Written output file, absent when the page failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run produced, written as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub run_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub pages: Vec<PageOutcome>,
    pub processing_time_ms: u64,
}

impl RunManifest {
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.pages.len() - self.succeeded()
    }
}

/// Whether a path has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Expands files and directories into the list of pages to process.
///
/// Directories contribute their supported images, sorted by name, without recursing.
/// Unsupported files are skipped with a warning; a missing path is an error.
pub fn collect_inputs(paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| {
                    AppError::FileSystem(format!("Cannot read directory {}: {}", path.display(), e))
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_supported_image(p))
                .collect();
            entries.sort();
            for entry in entries {
                if seen.insert(entry.clone()) {
                    inputs.push(entry);
                }
            }
        } else if path.is_file() {
            if !is_supported_image(path) {
                warn!(path = %path.display(), "Skipping unsupported input file");
                continue;
            }
            if seen.insert(path.clone()) {
                inputs.push(path.clone());
            }
        } else {
            return Err(AppError::FileSystem(format!(
                "Input path does not exist: {}",
                path.display()
            )));
        }
    }

    Ok(inputs)
}

/// Output file names, `<stem>_processed.png`, made unique within the run.
fn output_names(inputs: &[PathBuf]) -> Vec<String> {
    let mut used = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "page".to_string());
            let mut name = format!("{}_processed.png", stem);
            let mut counter = 1;
            while !used.insert(name.clone()) {
                name = format!("{}_{}_processed.png", stem, counter);
                counter += 1;
            }
            name
        })
        .collect()
}

/// Creates `run_YYYYmmdd_HHMMSS` under `output_dir`, suffixed when that name is taken.
fn create_run_dir(output_dir: &Path, started_at: &DateTime<Local>) -> AppResult<(String, PathBuf)> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        AppError::FileSystem(format!(
            "Cannot create output directory {}: {}",
            output_dir.display(),
            e
        ))
    })?;

    let base = format!("run_{}", started_at.format("%Y%m%d_%H%M%S"));
    let mut run_id = base.clone();
    let mut counter = 1;
    loop {
        let run_dir = output_dir.join(&run_id);
        match std::fs::create_dir(&run_dir) {
            Ok(()) => return Ok((run_id, run_dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                run_id = format!("{}_{}", base, counter);
                counter += 1;
            }
            Err(e) => {
                return Err(AppError::FileSystem(format!(
                    "Cannot create run directory {}: {}",
                    run_dir.display(),
                    e
                )))
            }
        }
    }
}

/// Loads, enhances and saves a single page.
pub fn process_file(pipeline: &Pipeline, source: &Path, output: &Path) -> AppResult<PageReport> {
    let page = image::open(source)
        .map_err(|e| AppError::Image(format!("Cannot decode {}: {}", source.display(), e)))?
        .to_rgb8();
    let processed = pipeline.process(&page)?;
    processed.image.save(output).map_err(|e| {
        AppError::FileSystem(format!("Cannot write {}: {}", output.display(), e))
    })?;
    Ok(processed.report)
}

fn process_page(pipeline: &Pipeline, source: PathBuf, output: PathBuf) -> PageOutcome {
    let span = page_span(&source.to_string_lossy());
    let _enter = span.enter();
    let start_time = Instant::now();

    match process_file(pipeline, &source, &output) {
        Ok(report) => {
            record_page_metrics(true, start_time.elapsed());
            info!(
                source = %source.display(),
                output = %output.display(),
                degraded_stages = ?report.degraded_stages(),
                "Page written"
            );
            PageOutcome {
                source,
                output: Some(output),
                report: Some(report),
                error: None,
            }
        }
        Err(e) => {
            record_page_metrics(false, start_time.elapsed());
            error_logging::log_image_error(
                &e,
                "process_page",
                Some(&source.to_string_lossy()),
                None,
                Some(start_time.elapsed()),
            );
            PageOutcome {
                source,
                output: None,
                report: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Processes every configured input and writes the run directory.
///
/// Pages run on the blocking thread pool, at most `max_concurrent_pages` at a time.
/// A failing page is recorded in the manifest and does not stop the run.
///
/// # Arguments
///
/// * `config` - Validated application configuration
/// * `metrics` - Prometheus handle; when given, a `metrics.prom` snapshot is written
///
/// # Returns
///
/// The run manifest, or an error when the inputs or the run directory are unusable
pub async fn run_batch(
    config: &AppConfig,
    metrics: Option<&PrometheusHandle>,
) -> AppResult<RunManifest> {
    let start_time = Instant::now();
    let started_at = Local::now();

    let inputs = collect_inputs(&config.runner.input_paths)?;
    if inputs.is_empty() {
        return Err(AppError::Config(
            "No supported images found in the given inputs".to_string(),
        ));
    }

    let (run_id, run_dir) = create_run_dir(&config.runner.output_dir, &started_at)?;
    info!(
        run_id = %run_id,
        pages = inputs.len(),
        max_concurrent_pages = config.runner.max_concurrent_pages,
        "Starting batch run"
    );

    let pipeline = Arc::new(Pipeline::new(config.pipeline.clone()));
    let semaphore = Arc::new(Semaphore::new(config.runner.max_concurrent_pages));
    let names = output_names(&inputs);

    let mut handles = Vec::with_capacity(inputs.len());
    for (source, name) in inputs.into_iter().zip(names) {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(format!("Page semaphore closed: {}", e)))?;
        let pipeline = Arc::clone(&pipeline);
        let output = run_dir.join(name);
        let task_source = source.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process_page(&pipeline, task_source, output)
        });
        handles.push((source, handle));
    }

    let mut pages = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        match handle.await {
            Ok(outcome) => pages.push(outcome),
            Err(e) => {
                error_logging::log_internal_error(&e, "runner", "join_page_task");
                pages.push(PageOutcome {
                    source,
                    output: None,
                    report: None,
                    error: Some(format!("Page task failed: {}", e)),
                });
            }
        }
    }

    let manifest = RunManifest {
        run_id,
        started_at,
        run_dir: run_dir.clone(),
        pipeline: config.pipeline.clone(),
        pages,
        processing_time_ms: start_time.elapsed().as_millis() as u64,
    };

    if config.runner.write_manifest {
        let manifest_path = run_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|e| {
            error_logging::log_filesystem_error(
                &e,
                "write_manifest",
                Some(&manifest_path.to_string_lossy()),
                None,
            );
            AppError::FileSystem(format!("Cannot write {}: {}", manifest_path.display(), e))
        })?;

        if let Some(handle) = metrics {
            let metrics_path = run_dir.join("metrics.prom");
            std::fs::write(&metrics_path, handle.render()).map_err(|e| {
                AppError::FileSystem(format!("Cannot write {}: {}", metrics_path.display(), e))
            })?;
        }
    }

    info!(
        run_id = %manifest.run_id,
        succeeded = manifest.succeeded(),
        failed = manifest.failed(),
        processing_time_ms = manifest.processing_time_ms,
        "Batch run completed"
    );

    Ok(manifest)
}
