//! # Shared Types for Image Preprocessing
//!
//! This module contains the shared types, structs, and enums used across
//! the preprocessing sub-modules and the page pipeline.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Errors that can occur during image preprocessing operations.
///
/// Only [`PreprocessingError::InvalidImage`] ever escapes the page pipeline;
/// every other failure is absorbed by the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// Input image has a zero dimension
    InvalidImage { width: u32, height: u32 },
    /// A stage could not run its intended algorithm
    ProcessingFailed { stage: Stage, message: String },
}

impl PreprocessingError {
    pub(crate) fn failed(stage: Stage, message: impl Into<String>) -> Self {
        PreprocessingError::ProcessingFailed {
            stage,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::InvalidImage { width, height } => {
                write!(
                    f,
                    "Invalid image: {}x{}. Width and height must be greater than 0",
                    width, height
                )
            }
            PreprocessingError::ProcessingFailed { stage, message } => {
                write!(f, "Stage {} failed: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Rejects images with a zero dimension.
pub fn ensure_valid_dimensions(width: u32, height: u32) -> Result<(), PreprocessingError> {
    if width == 0 || height == 0 {
        return Err(PreprocessingError::InvalidImage { width, height });
    }
    Ok(())
}

/// The enhancement stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Geometry,
    Illumination,
    Contrast,
    Denoise,
    Deskew,
    Binarize,
    Morphology,
    SharpenBlend,
    TableCrop,
}

impl Stage {
    /// Stages 1–8 run in this order; the table crop is optional and last.
    pub const ORDER: [Stage; 9] = [
        Stage::Geometry,
        Stage::Illumination,
        Stage::Contrast,
        Stage::Denoise,
        Stage::Deskew,
        Stage::Binarize,
        Stage::Morphology,
        Stage::SharpenBlend,
        Stage::TableCrop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Geometry => "geometry",
            Stage::Illumination => "illumination",
            Stage::Contrast => "contrast",
            Stage::Denoise => "denoise",
            Stage::Deskew => "deskew",
            Stage::Binarize => "binarize",
            Stage::Morphology => "morphology",
            Stage::SharpenBlend => "sharpen_blend",
            Stage::TableCrop => "table_crop",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path a stage took to produce its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePath {
    /// The intended algorithm ran
    Primary,
    /// The simpler secondary algorithm ran instead
    Fallback,
    /// The input was passed through unchanged
    Passthrough,
    /// The stage is disabled by configuration
    Skipped,
}

impl StagePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagePath::Primary => "primary",
            StagePath::Fallback => "fallback",
            StagePath::Passthrough => "passthrough",
            StagePath::Skipped => "skipped",
        }
    }

    /// True when the stage did not run its intended algorithm.
    pub fn is_degraded(&self) -> bool {
        matches!(self, StagePath::Fallback | StagePath::Passthrough)
    }
}

/// Output of a single stage together with the path that produced it.
#[derive(Debug, Clone)]
pub struct StageOutcome<T> {
    /// The stage output
    pub image: T,
    /// Path taken
    pub path: StagePath,
    /// Why a fallback or passthrough happened
    pub reason: Option<String>,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

impl<T> StageOutcome<T> {
    pub(crate) fn primary(image: T, started: std::time::Instant) -> Self {
        Self {
            image,
            path: StagePath::Primary,
            reason: None,
            processing_time_ms: started.elapsed().as_millis() as u32,
        }
    }

    pub(crate) fn degraded(
        image: T,
        path: StagePath,
        reason: impl Into<String>,
        started: std::time::Instant,
    ) -> Self {
        Self {
            image,
            path,
            reason: Some(reason.into()),
            processing_time_ms: started.elapsed().as_millis() as u32,
        }
    }

    /// Drops the image, keeping what the report needs.
    pub fn record(&self, stage: Stage) -> StageOutcomeRecord {
        StageOutcomeRecord {
            stage,
            path: self.path,
            reason: self.reason.clone(),
            processing_time_ms: self.processing_time_ms,
        }
    }
}

/// Serializable trace of one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcomeRecord {
    pub stage: Stage,
    pub path: StagePath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub processing_time_ms: u32,
}

impl StageOutcomeRecord {
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            path: StagePath::Skipped,
            reason: None,
            processing_time_ms: 0,
        }
    }
}

/// Result of Otsu thresholding.
#[derive(Debug, Clone)]
pub struct ThresholdedImageResult {
    /// The thresholded binary image
    pub image: GrayImage,
    /// Threshold found by Otsu's method; pixels above it are background
    pub threshold: u8,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Rotation that levels a page.
///
/// The angle is a clockwise rotation in image coordinates (y pointing down),
/// always within [-45°, 45°).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewEstimate {
    pub angle_degrees: f32,
}

impl SkewEstimate {
    /// Converts the edge angle of a minimum-area rectangle, in [-90°, 0°),
    /// into the rotation that makes the rectangle axis-aligned.
    pub fn from_rect_angle(rect_angle_degrees: f32) -> Self {
        let angle = if rect_angle_degrees < -45.0 {
            -(90.0 + rect_angle_degrees)
        } else {
            -rect_angle_degrees
        };
        // -(-45) lands on the excluded upper bound
        let angle = if angle >= 45.0 { angle - 90.0 } else { angle };
        Self {
            angle_degrees: angle,
        }
    }

    /// Rotations below this are not worth resampling the page for.
    pub fn is_negligible(&self) -> bool {
        self.angle_degrees.abs() < 0.01
    }
}

/// Result of the deskew stage.
#[derive(Debug, Clone)]
pub struct DeskewResult {
    /// The deskewed image (the input when no rotation was applied)
    pub image: GrayImage,
    /// Estimated rotation; `None` when the page has no foreground
    pub estimate: Option<SkewEstimate>,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether `other` lies completely inside this region.
    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }
}

/// What the table detector did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableCrop {
    /// Cropped to the padded bounding box of the largest ruled region
    Cropped { region: Region },
    /// No line structure found; input returned unchanged
    NotFound,
}

/// Result of table detection and cropping.
#[derive(Debug, Clone)]
pub struct TableCropResult {
    /// The cropped image, or a copy of the input
    pub image: RgbImage,
    /// Crop decision
    pub crop: TableCrop,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Page quality metrics, all in 0.0-1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageQuality {
    /// Spread between the 10th and 90th intensity percentiles
    pub contrast_ratio: f32,
    /// Mean intensity
    pub brightness: f32,
    /// Normalized variance of the Laplacian
    pub sharpness: f32,
    /// Fraction of ink (dark) pixels
    pub ink_density: f32,
}
