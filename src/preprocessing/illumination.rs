//! # Illumination Correction Module
//!
//! Flattens shadows and uneven lighting. The paper brightness is estimated by
//! removing ink strokes with a large elliptical opening of the ink layer, and
//! each pixel is divided by that background.

use image::GrayImage;
use tracing;

use super::morphology::{invert, open_ellipse};
use super::types::{PreprocessingError, Stage, StageOutcome, StagePath};

/// Smallest background window.
pub const MIN_BACKGROUND_KERNEL: u32 = 15;
/// Background window as a fraction of the shorter page side.
pub const BACKGROUND_KERNEL_RATIO: f32 = 0.03;
/// Share of the uncorrected page kept in the output.
pub const ORIGINAL_WEIGHT: f32 = 0.3;

/// Diameter of the elliptical background window, always odd.
pub fn background_kernel_size(width: u32, height: u32) -> u32 {
    let shorter = width.min(height) as f32;
    let kernel = MIN_BACKGROUND_KERNEL.max((shorter * BACKGROUND_KERNEL_RATIO) as u32);
    if kernel % 2 == 0 {
        kernel + 1
    } else {
        kernel
    }
}

/// Paper brightness with ink strokes removed.
///
/// Ink strokes are bright on the inverted page, so opening that layer with a
/// disc wider than any stroke erases them; inverting back yields the paper.
pub fn estimate_background(gray: &GrayImage, kernel: u32) -> GrayImage {
    let ink = invert(gray);
    invert(&open_ellipse(&ink, kernel))
}

fn divide_by_background(
    gray: &GrayImage,
    background: &GrayImage,
) -> Result<GrayImage, PreprocessingError> {
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, &value), &paper) in out
        .iter_mut()
        .zip(gray.as_raw())
        .zip(background.as_raw())
    {
        let corrected = (value as f32 / (paper as f32).max(1.0) * 255.0).clamp(0.0, 255.0);
        let blended = (1.0 - ORIGINAL_WEIGHT) * corrected + ORIGINAL_WEIGHT * value as f32;
        if !blended.is_finite() {
            return Err(PreprocessingError::failed(
                Stage::Illumination,
                format!("non-finite corrected value for input {}", value),
            ));
        }
        *dst = blended.round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// Removes shadows and uneven illumination from a gray page.
///
/// # Arguments
///
/// * `gray` - Gray page, ink dark on light paper
///
/// # Returns
///
/// The corrected page; the input unchanged if the correction was not numerically sound
pub fn correct_illumination(gray: &GrayImage) -> GrayImage {
    correct_illumination_with_outcome(gray).image
}

/// [`correct_illumination`] with the path that produced the page.
pub fn correct_illumination_with_outcome(gray: &GrayImage) -> StageOutcome<GrayImage> {
    let start_time = std::time::Instant::now();
    let kernel = background_kernel_size(gray.width(), gray.height());

    let background = estimate_background(gray, kernel);
    match divide_by_background(gray, &background) {
        Ok(corrected) => {
            tracing::debug!(
                target: "sheet_preprocessing",
                "Illumination correction completed in {:.2}ms: kernel={}, dimensions={}x{}",
                start_time.elapsed().as_millis(),
                kernel,
                gray.width(),
                gray.height()
            );
            StageOutcome::primary(corrected, start_time)
        }
        Err(e) => {
            tracing::warn!(target: "sheet_preprocessing", "Illumination correction skipped: {}", e);
            StageOutcome::degraded(gray.clone(), StagePath::Passthrough, e.to_string(), start_time)
        }
    }
}
