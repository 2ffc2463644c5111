//! # Image Thresholding Module
//!
//! This module turns gray pages into binary ink masks. It provides a global
//! Otsu threshold and the adaptive Gaussian threshold used by the binarize
//! stage, with Otsu as its fallback.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;
use imageproc::map::map_subpixels;
use tracing;

use super::types::{PreprocessingError, Stage, StageOutcome, StagePath, ThresholdedImageResult};

/// Smallest usable adaptive window.
pub const MIN_BLOCK_SIZE: u32 = 3;

/// Computes the Otsu level of a gray image.
///
/// Pixels strictly above the level belong to the bright class.
pub fn otsu_level(gray: &GrayImage) -> u8 {
    imageproc::contrast::otsu_level(gray)
}

/// True when every pixel has the same intensity.
pub fn is_uniform(gray: &GrayImage) -> bool {
    let raw = gray.as_raw();
    match raw.first() {
        Some(&first) => raw.iter().all(|&v| v == first),
        None => true,
    }
}

/// Applies Otsu's thresholding algorithm to convert an image to binary (black/white).
///
/// This function automatically determines the optimal threshold value using Otsu's method,
/// which maximizes the between-class variance. Ink ends up black (0) on a white (255)
/// background.
///
/// # Arguments
///
/// * `gray` - The gray page to threshold
///
/// # Returns
///
/// The thresholded image together with the chosen level
///
/// # Examples
///
/// ```no_run
/// use sheetclean::preprocessing::apply_otsu_threshold;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gray = image::open("sheet.png")?.to_luma8();
/// let thresholded = apply_otsu_threshold(&gray);
/// println!("Optimal threshold: {}", thresholded.threshold);
/// # Ok(())
/// # }
/// ```
pub fn apply_otsu_threshold(gray: &GrayImage) -> ThresholdedImageResult {
    let start_time = std::time::Instant::now();

    let threshold = otsu_level(gray);
    let image = threshold_at(gray, threshold);

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "sheet_preprocessing",
        "Otsu thresholding completed in {:.2}ms: threshold={}, dimensions={}x{}",
        processing_time.as_millis(),
        threshold,
        gray.width(),
        gray.height()
    );

    ThresholdedImageResult {
        image,
        threshold,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

/// Maps pixels above `level` to 255 and everything else to 0.
pub fn threshold_at(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for value in out.iter_mut() {
        *value = if *value > level { 255 } else { 0 };
    }
    out
}

/// Coerces a block size to a usable odd window.
///
/// Even sizes move up to the next odd value.
pub fn normalize_block_size(block_size: u32) -> u32 {
    let block = block_size.max(MIN_BLOCK_SIZE);
    if block % 2 == 0 {
        block + 1
    } else {
        block
    }
}

/// Normalized 1-D Gaussian weights for an odd window.
///
/// Sigma is derived from the window size the same way common imaging
/// libraries do when none is given: `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) as usize;
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f64 - 1.0) / 2.0;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / total) as f32).collect()
}

/// Separable Gaussian-weighted local mean with edge replication.
///
/// Runs on an `f32` copy so the mean is rounded only once, by the caller.
fn gaussian_local_mean(gray: &GrayImage, block: u32) -> Vec<f32> {
    let samples: ImageBuffer<Luma<f32>, Vec<f32>> = map_subpixels(gray, |v| v as f32);
    separable_filter_equal(&samples, &gaussian_kernel(block)).into_raw()
}

/// Adaptive Gaussian thresholding.
///
/// A pixel is ink (0) when it is at or below its rounded Gaussian-weighted
/// local mean minus `c`; otherwise it is background (255). Fails when the
/// window does not fit inside the image.
pub fn adaptive_gaussian_threshold(
    gray: &GrayImage,
    block_size: u32,
    c: i32,
) -> Result<GrayImage, PreprocessingError> {
    let block = normalize_block_size(block_size);
    let shorter = gray.width().min(gray.height());
    if block > shorter {
        return Err(PreprocessingError::failed(
            Stage::Binarize,
            format!(
                "block size {} exceeds shorter image side {}",
                block, shorter
            ),
        ));
    }

    let means = gaussian_local_mean(gray, block);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, &value), &mean) in out.iter_mut().zip(gray.as_raw()).zip(&means) {
        let local = mean.round().clamp(0.0, 255.0) as i32 - c;
        *dst = if (value as i32) <= local { 0 } else { 255 };
    }
    Ok(out)
}

/// Binarizes a page: adaptive Gaussian threshold, falling back to Otsu.
pub fn binarize(gray: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    binarize_with_outcome(gray, block_size, c).image
}

/// [`binarize`] with the path that produced the mask.
pub fn binarize_with_outcome(gray: &GrayImage, block_size: u32, c: i32) -> StageOutcome<GrayImage> {
    let start_time = std::time::Instant::now();

    match adaptive_gaussian_threshold(gray, block_size, c) {
        Ok(binary) => {
            tracing::debug!(
                target: "sheet_preprocessing",
                "Adaptive threshold completed in {:.2}ms: block={}, c={}, dimensions={}x{}",
                start_time.elapsed().as_millis(),
                normalize_block_size(block_size),
                c,
                gray.width(),
                gray.height()
            );
            StageOutcome::primary(binary, start_time)
        }
        Err(e) => {
            tracing::warn!(
                target: "sheet_preprocessing",
                "Adaptive threshold unavailable, using Otsu: {}", e
            );
            let fallback = apply_otsu_threshold(gray);
            StageOutcome::degraded(fallback.image, StagePath::Fallback, e.to_string(), start_time)
        }
    }
}

/// Writes a single value into a fresh image. Test helper shared with siblings.
#[cfg(test)]
pub(crate) fn filled(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, image::Luma([value]))
}
