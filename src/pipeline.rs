//! # Page Enhancement Pipeline
//!
//! Chains the preprocessing stages into one pass over a page: resize, illumination
//! correction, contrast enhancement, denoising, deskewing, binarization, morphological
//! cleanup, sharpen-and-blend and, when enabled, table cropping.
//!
//! Every stage reports the path it took to a [`StageObserver`]; the collected records
//! form the [`PageReport`] returned with the enhanced page.

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::observability::{StageObserver, TracingObserver};
use crate::preprocessing::types::ensure_valid_dimensions;
use crate::preprocessing::{
    assess_page_quality, binarize_with_outcome, clean_morphology_with_outcome,
    correct_illumination_with_outcome, denoise_with_outcome, detect_and_crop_table_with_result,
    enhance_contrast_with_outcome, estimate_skew, normalize_geometry, rotate_about_center,
    sharpen_and_blend_with_outcome, PageQuality, PreprocessingError, Stage, StageOutcomeRecord,
    StagePath, TableCrop,
};

/// What happened to one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    /// One record per stage, in pipeline order
    pub stages: Vec<StageOutcomeRecord>,
    /// Rotation applied by the deskew stage, if it estimated one
    pub skew_angle_degrees: Option<f32>,
    /// Table crop decision; `None` when cropping is disabled
    pub table_crop: Option<TableCrop>,
    pub input_dimensions: (u32, u32),
    pub output_dimensions: (u32, u32),
    /// Quality of the finished page
    pub quality: PageQuality,
    /// Total processing time in milliseconds
    pub processing_time_ms: u32,
}

impl PageReport {
    /// Path taken by `stage`, if it was recorded.
    pub fn path_of(&self, stage: Stage) -> Option<StagePath> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| r.path)
    }

    /// Stages that fell back or passed their input through.
    pub fn degraded_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|r| r.path.is_degraded())
            .map(|r| r.stage)
            .collect()
    }
}

/// An enhanced page and its report.
#[derive(Debug, Clone)]
pub struct ProcessedPage {
    pub image: RgbImage,
    pub report: PageReport,
}

/// The ordered enhancement stages sharing one configuration.
///
/// A `Pipeline` holds no per-page state and can be shared between threads.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    observer: Arc<dyn StageObserver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline that logs stage outcomes through [`TracingObserver`].
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: PipelineConfig, observer: Arc<dyn StageObserver>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn report(&self, stages: &mut Vec<StageOutcomeRecord>, record: StageOutcomeRecord) {
        self.observer.on_stage(&record);
        stages.push(record);
    }

    /// Enhances one page.
    ///
    /// # Arguments
    ///
    /// * `image` - The photographed or scanned page
    ///
    /// # Returns
    ///
    /// The enhanced page with its report. Only an input with a zero dimension is an
    /// error; every other stage failure, a zero target width included, degrades to a
    /// fallback or a passthrough and shows up in the report.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sheetclean::config::PipelineConfig;
    /// use sheetclean::pipeline::Pipeline;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let page = image::open("attendance.jpg")?.to_rgb8();
    /// let pipeline = Pipeline::new(PipelineConfig::default());
    /// let processed = pipeline.process(&page)?;
    /// println!("degraded stages: {:?}", processed.report.degraded_stages());
    /// processed.image.save("attendance_processed.png")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn process(&self, image: &RgbImage) -> Result<ProcessedPage, PreprocessingError> {
        let start_time = Instant::now();
        let input_dimensions = image.dimensions();
        ensure_valid_dimensions(input_dimensions.0, input_dimensions.1)?;

        let config = &self.config;
        let mut stages = Vec::with_capacity(Stage::ORDER.len());

        // 1. Geometry; an unusable target width keeps the input size
        let stage_start = Instant::now();
        let (mut color, path, reason) = match normalize_geometry(image, config.resize_width) {
            Ok(resized) => (resized, StagePath::Primary, None),
            Err(e @ PreprocessingError::InvalidImage { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    target: "sheet_preprocessing",
                    "Resize unavailable, keeping input size: {}", e
                );
                (image.clone(), StagePath::Passthrough, Some(e.to_string()))
            }
        };
        self.report(
            &mut stages,
            StageOutcomeRecord {
                stage: Stage::Geometry,
                path,
                reason,
                processing_time_ms: stage_start.elapsed().as_millis() as u32,
            },
        );
        let mut gray = image::imageops::grayscale(&color);

        // 2. Illumination
        if config.remove_shadow {
            let outcome = correct_illumination_with_outcome(&gray);
            self.report(&mut stages, outcome.record(Stage::Illumination));
            gray = outcome.image;
        } else {
            self.report(&mut stages, StageOutcomeRecord::skipped(Stage::Illumination));
        }

        // 3. Contrast
        let outcome = enhance_contrast_with_outcome(&gray, config.clahe_clip);
        self.report(&mut stages, outcome.record(Stage::Contrast));
        gray = outcome.image;

        // 4. Denoise
        let outcome = denoise_with_outcome(&gray, config.denoise_strength);
        self.report(&mut stages, outcome.record(Stage::Denoise));
        gray = outcome.image;

        // 5. Deskew, applied to the color page as well so the blend lines up
        let mut skew_angle_degrees = None;
        if config.deskew_enabled {
            let stage_start = Instant::now();
            let (path, reason) = match estimate_skew(&gray) {
                Some(estimate) => {
                    skew_angle_degrees = Some(estimate.angle_degrees);
                    if !estimate.is_negligible() {
                        gray = rotate_about_center(&gray, estimate.angle_degrees);
                        color = rotate_about_center(&color, estimate.angle_degrees);
                    }
                    (StagePath::Primary, None)
                }
                None => (
                    StagePath::Passthrough,
                    Some("page has no foreground to estimate skew from".to_string()),
                ),
            };
            tracing::debug!(
                target: "sheet_preprocessing",
                "Deskew completed in {}ms: rotation={:?}",
                stage_start.elapsed().as_millis(),
                skew_angle_degrees
            );
            self.report(
                &mut stages,
                StageOutcomeRecord {
                    stage: Stage::Deskew,
                    path,
                    reason,
                    processing_time_ms: stage_start.elapsed().as_millis() as u32,
                },
            );
        } else {
            self.report(&mut stages, StageOutcomeRecord::skipped(Stage::Deskew));
        }

        // 6. Binarize
        let outcome = binarize_with_outcome(&gray, config.adaptive_block_size, config.adaptive_c);
        self.report(&mut stages, outcome.record(Stage::Binarize));
        let binary = outcome.image;

        // 7. Morphology
        let outcome = clean_morphology_with_outcome(&binary);
        self.report(&mut stages, outcome.record(Stage::Morphology));
        let cleaned = outcome.image;

        // 8. Sharpen and blend
        let outcome = sharpen_and_blend_with_outcome(&cleaned, &color);
        self.report(&mut stages, outcome.record(Stage::SharpenBlend));
        let mut page = outcome.image;

        // 9. Table crop
        let mut table_crop = None;
        if config.crop_table {
            let result = detect_and_crop_table_with_result(&page);
            let (path, reason) = match result.crop {
                TableCrop::Cropped { .. } => (StagePath::Primary, None),
                TableCrop::NotFound => (
                    StagePath::Passthrough,
                    Some("no table structure found".to_string()),
                ),
            };
            self.report(
                &mut stages,
                StageOutcomeRecord {
                    stage: Stage::TableCrop,
                    path,
                    reason,
                    processing_time_ms: result.processing_time_ms,
                },
            );
            table_crop = Some(result.crop);
            page = result.image;
        } else {
            self.report(&mut stages, StageOutcomeRecord::skipped(Stage::TableCrop));
        }

        let quality = assess_page_quality(&image::imageops::grayscale(&page));
        let processing_time_ms = start_time.elapsed().as_millis() as u32;

        tracing::info!(
            input_width = input_dimensions.0,
            input_height = input_dimensions.1,
            output_width = page.width(),
            output_height = page.height(),
            skew_angle_degrees = ?skew_angle_degrees,
            processing_time_ms = processing_time_ms,
            "Page enhancement completed"
        );

        let report = PageReport {
            stages,
            skew_angle_degrees,
            table_crop,
            input_dimensions,
            output_dimensions: page.dimensions(),
            quality,
            processing_time_ms,
        };

        Ok(ProcessedPage {
            image: page,
            report,
        })
    }
}

/// Runs the whole enhancement chain on one page.
///
/// Stages 1-8 always run (each may be disabled or degrade on its own); the table crop
/// runs last when `config.crop_table` is set.
///
/// # Examples
///
/// ```no_run
/// use sheetclean::config::PipelineConfig;
/// use sheetclean::pipeline::preprocess_page;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let page = image::open("attendance.jpg")?.to_rgb8();
/// let enhanced = preprocess_page(&page, &PipelineConfig::production_preset())?;
/// enhanced.save("attendance_processed.png")?;
/// # Ok(())
/// # }
/// ```
pub fn preprocess_page(
    image: &RgbImage,
    config: &PipelineConfig,
) -> Result<RgbImage, PreprocessingError> {
    Pipeline::new(config.clone())
        .process(image)
        .map(|processed| processed.image)
}
