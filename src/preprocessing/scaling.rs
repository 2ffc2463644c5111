//! # Image Scaling Module
//!
//! Proportional resizing of page images to a fixed working width. Shrinking averages
//! the source area covered by each output pixel; enlarging interpolates linearly.

use image::imageops::FilterType;
use image::RgbImage;
use tracing;

use super::types::{ensure_valid_dimensions, PreprocessingError, Stage};

/// Output size for a page resized to `resize_width`, keeping the aspect ratio.
pub fn target_dimensions(width: u32, height: u32, resize_width: u32) -> (u32, u32) {
    let scale = resize_width as f64 / width as f64;
    let new_height = (height as f64 * scale).round().max(1.0) as u32;
    (resize_width, new_height)
}

/// Per-output-sample source spans and weights for area averaging along one axis.
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let ratio = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|i| {
            let start = i as f64 * ratio;
            let end = ((i + 1) as f64 * ratio).min(src_len as f64);
            let mut taps = Vec::new();
            let mut pos = start.floor() as usize;
            while (pos as f64) < end {
                let lo = start.max(pos as f64);
                let hi = end.min(pos as f64 + 1.0);
                if hi > lo {
                    taps.push((pos, ((hi - lo) / (end - start)) as f32));
                }
                pos += 1;
            }
            taps
        })
        .collect()
}

/// Shrinks an RGB image by averaging the covered source area of every output pixel.
fn area_downscale(
    image: &RgbImage,
    dst_width: u32,
    dst_height: u32,
) -> Result<RgbImage, PreprocessingError> {
    let (src_width, src_height) = image.dimensions();
    let x_taps = area_weights(src_width, dst_width);
    let y_taps = area_weights(src_height, dst_height);
    let src = image.as_raw();
    let src_stride = src_width as usize * 3;
    let dst_stride = dst_width as usize * 3;

    let mut horizontal = vec![0f32; dst_stride * src_height as usize];
    for y in 0..src_height as usize {
        let row = &src[y * src_stride..(y + 1) * src_stride];
        let out = &mut horizontal[y * dst_stride..(y + 1) * dst_stride];
        for (x, taps) in x_taps.iter().enumerate() {
            for &(sx, weight) in taps {
                for c in 0..3 {
                    out[x * 3 + c] += weight * row[sx * 3 + c] as f32;
                }
            }
        }
    }

    let mut buffer = vec![0u8; dst_stride * dst_height as usize];
    for (y, taps) in y_taps.iter().enumerate() {
        let out = &mut buffer[y * dst_stride..(y + 1) * dst_stride];
        for (i, slot) in out.iter_mut().enumerate() {
            let value: f32 = taps
                .iter()
                .map(|&(sy, weight)| weight * horizontal[sy * dst_stride + i])
                .sum();
            *slot = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    RgbImage::from_raw(dst_width, dst_height, buffer).ok_or_else(|| {
        PreprocessingError::failed(Stage::Geometry, "resized buffer does not match dimensions")
    })
}

/// Resizes a page to `resize_width`, preserving its aspect ratio.
///
/// # Arguments
///
/// * `image` - The color page
/// * `resize_width` - Target width in pixels
///
/// # Returns
///
/// The resized page, or `InvalidImage` when the input has a zero dimension
///
/// # Examples
///
/// ```
/// use sheetclean::preprocessing::normalize_geometry;
///
/// let page = image::RgbImage::new(100, 140);
/// let resized = normalize_geometry(&page, 150).unwrap();
/// assert_eq!(resized.dimensions(), (150, 210));
/// ```
pub fn normalize_geometry(
    image: &RgbImage,
    resize_width: u32,
) -> Result<RgbImage, PreprocessingError> {
    let start_time = std::time::Instant::now();
    let (width, height) = image.dimensions();
    ensure_valid_dimensions(width, height)?;
    if resize_width == 0 {
        return Err(PreprocessingError::failed(
            Stage::Geometry,
            "target width must be greater than 0",
        ));
    }

    let (new_width, new_height) = target_dimensions(width, height, resize_width);
    let resized = if (new_width, new_height) == (width, height) {
        image.clone()
    } else if new_width < width {
        area_downscale(image, new_width, new_height)?
    } else {
        image::imageops::resize(image, new_width, new_height, FilterType::Triangle)
    };

    tracing::debug!(
        target: "sheet_preprocessing",
        "Resized page in {:.2}ms: {}x{} -> {}x{}",
        start_time.elapsed().as_millis(),
        width,
        height,
        new_width,
        new_height
    );

    Ok(resized)
}
