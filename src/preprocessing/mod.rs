//! # Image Preprocessing Module
//!
//! This module provides the enhancement stages that turn photographed attendance sheets
//! into clean pages for text extraction. Every stage borrows its input and returns a new
//! image; none of them touch the filesystem or the environment.
//!
//! The module is organized into focused sub-modules:
//! - `scaling`: Proportional resize to the working width
//! - `illumination`: Shadow and uneven-lighting removal
//! - `filtering`: CLAHE contrast enhancement and denoising
//! - `deskewing`: Skew estimation and rotation correction
//! - `thresholding`: Adaptive and Otsu binarization
//! - `morphology`: Erosion/dilation primitives and speckle cleanup
//! - `blending`: Sharpening and color compositing
//! - `cropping`: Table detection and cropping
//! - `quality`: Page quality metrics
//! - `types`: Shared types and error definitions

pub mod blending;
pub mod cropping;
pub mod deskewing;
pub mod filtering;
pub mod illumination;
pub mod morphology;
pub mod quality;
pub mod scaling;
pub mod thresholding;
pub mod types;

// Re-export commonly used types and functions for convenience
pub use types::{
    DeskewResult, PageQuality, PreprocessingError, Region, SkewEstimate, Stage, StageOutcome,
    StageOutcomeRecord, StagePath, TableCrop, TableCropResult, ThresholdedImageResult,
};

// Re-export main functions from sub-modules
pub use blending::{sharpen_and_blend, sharpen_and_blend_with_outcome};
pub use cropping::{detect_and_crop_table, detect_and_crop_table_with_result};
pub use deskewing::{correct_skew, estimate_skew, rotate_about_center};
pub use filtering::{
    apply_clahe, denoise, denoise_with_outcome, enhance_contrast, enhance_contrast_with_outcome,
};
pub use illumination::{correct_illumination, correct_illumination_with_outcome};
pub use morphology::{clean_morphology, clean_morphology_with_outcome};
pub use quality::{assess_page_quality, ink_density};
pub use scaling::normalize_geometry;
pub use thresholding::{apply_otsu_threshold, binarize, binarize_with_outcome};
