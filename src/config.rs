//! # Unified Application Configuration
//!
//! This module gathers every setting of the enhancement pipeline, the logging layer
//! and the batch runner into one structured configuration object. Values can be loaded
//! from environment variables and are validated before any page is processed.
//!
//! The preprocessing stages never read the environment themselves; they only ever see
//! a [`PipelineConfig`] passed by reference.

use crate::errors::{AppError, AppResult};
use crate::preprocessing::thresholding::normalize_block_size;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Parameters of the enhancement pipeline, shared read-only by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Working width every page is resized to (600-3000)
    pub resize_width: u32,
    /// Adaptive threshold window; even values are bumped to the next odd one (11-101)
    pub adaptive_block_size: u32,
    /// Constant subtracted from the local mean (-20 to 20)
    pub adaptive_c: i32,
    /// Whether to estimate and correct page rotation
    pub deskew_enabled: bool,
    /// Whether to run illumination correction
    pub remove_shadow: bool,
    /// CLAHE clip limit; 0 selects the default of 2.0
    pub clahe_clip: f32,
    /// Non-local means strength; 0 selects the bilateral filter
    pub denoise_strength: f32,
    /// Whether to crop the finished page to its table
    pub crop_table: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resize_width: 1500,
            adaptive_block_size: 35,
            adaptive_c: 5,
            deskew_enabled: true,
            remove_shadow: true,
            clahe_clip: 0.0,
            denoise_strength: 0.0,
            crop_table: false,
        }
    }
}

impl PipelineConfig {
    /// Settings used for deployed attendance scanning: larger pages, a wider
    /// threshold window and explicit CLAHE and NLM strengths.
    pub fn production_preset() -> Self {
        Self {
            resize_width: 2000,
            adaptive_block_size: 51,
            adaptive_c: 10,
            deskew_enabled: true,
            remove_shadow: true,
            clahe_clip: 2.0,
            denoise_strength: 5.0,
            crop_table: false,
        }
    }

    /// Looks up a preset by name.
    pub fn preset(name: &str) -> AppResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "default" => Ok(Self::default()),
            "production" => Ok(Self::production_preset()),
            other => Err(AppError::Config(format!(
                "Unknown pipeline preset '{}'. Expected 'default' or 'production'",
                other
            ))),
        }
    }

    /// Block size actually used by the binarizer.
    pub fn normalized_block_size(&self) -> u32 {
        normalize_block_size(self.adaptive_block_size)
    }

    /// Validate pipeline configuration
    pub fn validate(&self) -> AppResult<()> {
        if !(600..=3000).contains(&self.resize_width) {
            return Err(AppError::Config(format!(
                "Resize width must be between 600 and 3000 pixels, got {}",
                self.resize_width
            )));
        }

        if !(11..=101).contains(&self.adaptive_block_size) {
            return Err(AppError::Config(format!(
                "Adaptive block size must be between 11 and 101, got {}",
                self.adaptive_block_size
            )));
        }

        if !(-20..=20).contains(&self.adaptive_c) {
            return Err(AppError::Config(format!(
                "Adaptive constant must be between -20 and 20, got {}",
                self.adaptive_c
            )));
        }

        if !self.clahe_clip.is_finite() || self.clahe_clip < 0.0 {
            return Err(AppError::Config(format!(
                "CLAHE clip limit must be a non-negative number, got {}",
                self.clahe_clip
            )));
        }

        if !self.denoise_strength.is_finite() || self.denoise_strength < 0.0 {
            return Err(AppError::Config(format!(
                "Denoise strength must be a non-negative number, got {}",
                self.denoise_strength
            )));
        }

        Ok(())
    }

    /// Load pipeline settings from `SHEETCLEAN_*` environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// `SHEETCLEAN_PRESET` picks the base values; every other variable overrides a
    /// single field of that preset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup("SHEETCLEAN_PRESET") {
            Some(name) => Self::preset(&name)?,
            None => Self::default(),
        };

        Ok(Self {
            resize_width: lookup("SHEETCLEAN_RESIZE_WIDTH")
                .unwrap_or_else(|| base.resize_width.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("SHEETCLEAN_RESIZE_WIDTH must be a valid number".to_string())
                })?,
            adaptive_block_size: lookup("SHEETCLEAN_ADAPTIVE_BLOCK")
                .unwrap_or_else(|| base.adaptive_block_size.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("SHEETCLEAN_ADAPTIVE_BLOCK must be a valid number".to_string())
                })?,
            adaptive_c: lookup("SHEETCLEAN_ADAPTIVE_C")
                .unwrap_or_else(|| base.adaptive_c.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("SHEETCLEAN_ADAPTIVE_C must be a valid integer".to_string())
                })?,
            deskew_enabled: match lookup("SHEETCLEAN_DESKEW") {
                Some(value) => parse_flag("SHEETCLEAN_DESKEW", &value)?,
                None => base.deskew_enabled,
            },
            remove_shadow: match lookup("SHEETCLEAN_REMOVE_SHADOW") {
                Some(value) => parse_flag("SHEETCLEAN_REMOVE_SHADOW", &value)?,
                None => base.remove_shadow,
            },
            clahe_clip: lookup("SHEETCLEAN_CLAHE_CLIP")
                .unwrap_or_else(|| base.clahe_clip.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("SHEETCLEAN_CLAHE_CLIP must be a valid number".to_string())
                })?,
            denoise_strength: lookup("SHEETCLEAN_DENOISE_STRENGTH")
                .unwrap_or_else(|| base.denoise_strength.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config(
                        "SHEETCLEAN_DENOISE_STRENGTH must be a valid number".to_string(),
                    )
                })?,
            crop_table: match lookup("SHEETCLEAN_CROP_TABLE") {
                Some(value) => parse_flag("SHEETCLEAN_CROP_TABLE", &value)?,
                None => base.crop_table,
            },
        })
    }
}

/// Parses a boolean environment value.
fn parse_flag(key: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!(
            "{} must be a boolean (true/false), got '{}'",
            key, value
        ))),
    }
}

/// Logging configuration for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// Log level applied to this crate
    pub log_level: String,
    /// Output format, `json` or `pretty`
    pub log_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        }
    }

    /// Check if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Whether human-readable output should be used
    pub fn use_pretty_format(&self) -> bool {
        self.is_development() || self.log_format == "pretty"
    }

    /// Validate logging configuration
    pub fn validate(&self) -> AppResult<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(AppError::Config(format!("Invalid log level: {}", other)));
            }
        }

        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(AppError::Config(format!(
                "Invalid log format: {}. Expected 'json' or 'pretty'",
                self.log_format
            )));
        }

        Ok(())
    }
}

/// Batch runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Image files or directories of images to process
    pub input_paths: Vec<PathBuf>,
    /// Directory under which each run creates its own output folder
    pub output_dir: PathBuf,
    /// Maximum number of pages processed at the same time
    pub max_concurrent_pages: usize,
    /// Whether to write `manifest.json` and the metrics snapshot
    pub write_manifest: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_paths: Vec::new(),
            output_dir: PathBuf::from("output"),
            max_concurrent_pages: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            write_manifest: true,
        }
    }
}

impl RunnerConfig {
    /// Load runner settings from environment variables. Inputs come from the command line.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            input_paths: Vec::new(),
            output_dir: env::var("SHEETCLEAN_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            max_concurrent_pages: env::var("SHEETCLEAN_MAX_CONCURRENT_PAGES")
                .unwrap_or_else(|_| defaults.max_concurrent_pages.to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config(
                        "SHEETCLEAN_MAX_CONCURRENT_PAGES must be a valid number".to_string(),
                    )
                })?,
            write_manifest: match env::var("SHEETCLEAN_WRITE_MANIFEST") {
                Ok(value) => parse_flag("SHEETCLEAN_WRITE_MANIFEST", &value)?,
                Err(_) => defaults.write_manifest,
            },
        })
    }

    /// Validate runner configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.input_paths.is_empty() {
            return Err(AppError::Config(
                "At least one input file or directory is required".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(AppError::Config("Output directory cannot be empty".to_string()));
        }

        if self.max_concurrent_pages == 0 {
            return Err(AppError::Config(
                "Max concurrent pages cannot be 0".to_string(),
            ));
        }

        if self.max_concurrent_pages > 64 {
            return Err(AppError::Config(
                "Max concurrent pages cannot be greater than 64".to_string(),
            ));
        }

        Ok(())
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Enhancement pipeline parameters
    pub pipeline: PipelineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Batch runner configuration
    pub runner: RunnerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            pipeline: PipelineConfig::from_env()?,
            logging: LoggingConfig::from_env(),
            runner: RunnerConfig::from_env()?,
        })
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.pipeline.validate()?;
        self.logging.validate()?;
        self.runner.validate()?;
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: resize_width={}, block={}, c={}, deskew={}, remove_shadow={}, clahe_clip={}, denoise_strength={}, crop_table={}, inputs={}, output_dir={}, max_concurrent_pages={}",
            self.pipeline.resize_width,
            self.pipeline.normalized_block_size(),
            self.pipeline.adaptive_c,
            self.pipeline.deskew_enabled,
            self.pipeline.remove_shadow,
            self.pipeline.clahe_clip,
            self.pipeline.denoise_strength,
            self.pipeline.crop_table,
            self.runner.input_paths.len(),
            self.runner.output_dir.display(),
            self.runner.max_concurrent_pages
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_pipeline_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.normalized_block_size(), 35);
        assert!(PipelineConfig::production_preset().validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_validation() {
        let mut config = PipelineConfig::default();

        // Invalid: width out of range
        config.resize_width = 599;
        assert!(config.validate().is_err());
        config.resize_width = 3001;
        assert!(config.validate().is_err());
        config.resize_width = 600;
        assert!(config.validate().is_ok());

        // Invalid: block size out of range
        config.adaptive_block_size = 10;
        assert!(config.validate().is_err());
        config.adaptive_block_size = 102;
        assert!(config.validate().is_err());
        config.adaptive_block_size = 101;
        assert!(config.validate().is_ok());

        // Invalid: constant out of range
        config.adaptive_c = -21;
        assert!(config.validate().is_err());
        config.adaptive_c = 20;
        assert!(config.validate().is_ok());

        // Invalid: negative or non-finite strengths
        config.clahe_clip = -0.5;
        assert!(config.validate().is_err());
        config.clahe_clip = f32::NAN;
        assert!(config.validate().is_err());
        config.clahe_clip = 0.0;
        config.denoise_strength = -1.0;
        assert!(config.validate().is_err());
        config.denoise_strength = 0.0;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_even_block_size_is_normalized() {
        let config = PipelineConfig {
            adaptive_block_size: 50,
            ..Default::default()
        };
        assert_eq!(config.normalized_block_size(), 51);
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = PipelineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_from_lookup_preset_with_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("SHEETCLEAN_PRESET", "production"),
            ("SHEETCLEAN_ADAPTIVE_C", "-3"),
            ("SHEETCLEAN_CROP_TABLE", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.resize_width, 2000);
        assert_eq!(config.adaptive_block_size, 51);
        assert_eq!(config.adaptive_c, -3);
        assert_eq!(config.denoise_strength, 5.0);
        assert!(config.crop_table);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("SHEETCLEAN_RESIZE_WIDTH", "wide")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("SHEETCLEAN_RESIZE_WIDTH")));

        let bad_flag = lookup_from(&[("SHEETCLEAN_DESKEW", "maybe")]);
        assert!(PipelineConfig::from_lookup(bad_flag).is_err());
        let bad_preset = lookup_from(&[("SHEETCLEAN_PRESET", "fast")]);
        assert!(PipelineConfig::from_lookup(bad_preset).is_err());
    }

    #[test]
    fn test_logging_config_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.use_pretty_format());

        config.environment = "production".to_string();
        assert!(!config.use_pretty_format());
        config.log_format = "pretty".to_string();
        assert!(config.use_pretty_format());

        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
        config.log_format = "json".to_string();

        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runner_config_validation() {
        let mut config = RunnerConfig::default();

        // Invalid: no inputs
        assert!(config.validate().is_err());

        config.input_paths = vec![PathBuf::from("scans")];
        assert!(config.validate().is_ok());

        // Invalid: zero concurrency
        config.max_concurrent_pages = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_pages = 65;
        assert!(config.validate().is_err());
        config.max_concurrent_pages = 4;

        // Invalid: empty output directory
        config.output_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_mentions_pipeline_settings() {
        let mut config = AppConfig::default();
        config.pipeline.adaptive_block_size = 40;
        let summary = config.summary();
        assert!(summary.contains("resize_width=1500"));
        assert!(summary.contains("block=41"));
    }
}
