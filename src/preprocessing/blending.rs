//! # Sharpen and Blend Module
//!
//! Sharpens the cleaned binary page and composites it onto the resized color page so
//! the output keeps the look of the original sheet with crisper, darker strokes.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::filter::filter3x3;
use tracing;

use super::types::{PreprocessingError, Stage, StageOutcome, StagePath};

/// 3×3 sharpening kernel, row-major.
pub const SHARPEN_KERNEL: [i32; 9] = [0, -1, 0, -1, 5, -1, 0, -1, 0];
/// Weight of the color page in the composite.
pub const COLOR_WEIGHT: f32 = 0.7;
/// Weight of the sharpened binary in the composite.
pub const SHARPENED_WEIGHT: f32 = 0.3;

/// Convolves with [`SHARPEN_KERNEL`], replicating edge pixels.
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    filter3x3::<_, i32, u8>(gray, &SHARPEN_KERNEL)
}

/// Expands a gray image to three identical channels.
pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

fn composite(sharpened: &GrayImage, color: &RgbImage) -> Result<RgbImage, PreprocessingError> {
    if sharpened.dimensions() != color.dimensions() {
        return Err(PreprocessingError::failed(
            Stage::SharpenBlend,
            format!(
                "binary page is {}x{} but color page is {}x{}",
                sharpened.width(),
                sharpened.height(),
                color.width(),
                color.height()
            ),
        ));
    }

    let mut output = color.clone();
    for (pixel, &value) in output.pixels_mut().zip(sharpened.as_raw()) {
        for channel in pixel.0.iter_mut() {
            let blended = COLOR_WEIGHT * *channel as f32 + SHARPENED_WEIGHT * value as f32;
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(output)
}

/// Sharpens the cleaned binary and blends it onto the color page.
///
/// When the two pages differ in size the cleaned binary, as RGB, is returned instead.
pub fn sharpen_and_blend(binary: &GrayImage, color: &RgbImage) -> RgbImage {
    sharpen_and_blend_with_outcome(binary, color).image
}

/// [`sharpen_and_blend`] with the path that produced the page.
pub fn sharpen_and_blend_with_outcome(
    binary: &GrayImage,
    color: &RgbImage,
) -> StageOutcome<RgbImage> {
    let start_time = std::time::Instant::now();

    let sharpened = sharpen(binary);
    match composite(&sharpened, color) {
        Ok(blended) => {
            tracing::debug!(
                target: "sheet_preprocessing",
                "Sharpen and blend completed in {:.2}ms: weights={}/{}, dimensions={}x{}",
                start_time.elapsed().as_millis(),
                COLOR_WEIGHT,
                SHARPENED_WEIGHT,
                color.width(),
                color.height()
            );
            StageOutcome::primary(blended, start_time)
        }
        Err(e) => {
            tracing::warn!(
                target: "sheet_preprocessing",
                "Blend unavailable, returning cleaned binary: {}", e
            );
            let fallback = gray_to_rgb(binary);
            StageOutcome::degraded(fallback, StagePath::Fallback, e.to_string(), start_time)
        }
    }
}
