use anyhow::{Context, Result};
use clap::Parser;
use sheetclean::config::{AppConfig, PipelineConfig};
use sheetclean::errors::error_logging;
use sheetclean::observability;
use sheetclean::runner;
use std::path::PathBuf;
use tracing::info;

/// Enhances photographed attendance sheets for text extraction.
///
/// Settings not given on the command line are read from SHEETCLEAN_* environment
/// variables.
#[derive(Parser, Debug)]
#[command(name = "sheetclean")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Pipeline preset (default, production)
    #[arg(long)]
    preset: Option<String>,

    /// Crop each page to its ruled table
    #[arg(long)]
    crop_table: bool,

    /// Directory that receives the run folder
    #[arg(short, long = "out", value_name = "DIR")]
    out: Option<PathBuf>,

    /// Pages processed at the same time
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    jobs: Option<usize>,

    /// Image files (png, jpg, jpeg, tif, tiff, bmp) or directories of them
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,
}

impl Cli {
    /// Applies the command-line settings on top of the environment configuration.
    fn apply(self, config: &mut AppConfig) -> Result<()> {
        if let Some(name) = &self.preset {
            config.pipeline = PipelineConfig::preset(name)?;
        }
        // Applied after the preset so it always survives it
        if self.crop_table {
            config.pipeline.crop_table = true;
        }
        if let Some(dir) = self.out {
            config.runner.output_dir = dir;
        }
        if let Some(jobs) = self.jobs {
            config.runner.max_concurrent_pages = jobs;
        }
        config.runner.input_paths.extend(self.inputs);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    cli.apply(&mut config)?;

    observability::init_tracing(&config.logging)?;
    if let Err(e) = config.validate() {
        error_logging::log_config_error(&e, "app_config", "validate");
        return Err(e.into());
    }
    let metrics_handle = observability::init_metrics()?;
    info!("{}", config.summary());

    let manifest = runner::run_batch(&config, Some(&metrics_handle))
        .await
        .context("Batch run failed")?;

    println!(
        "Processed {} page(s) into {}: {} succeeded, {} failed",
        manifest.pages.len(),
        manifest.run_dir.display(),
        manifest.succeeded(),
        manifest.failed()
    );

    if manifest.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
