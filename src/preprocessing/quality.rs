//! # Page Quality Assessment Module
//!
//! This module measures a processed page: contrast, brightness, sharpness and how much
//! of it is ink. The numbers go into the page report and back the enhancement tests.

use image::GrayImage;
use tracing;

use super::types::{PageQuality, Region};

/// Intensity at or below which a pixel counts as ink.
pub const INK_LEVEL: u8 = 127;

/// Measures the quality of a gray page.
///
/// # Arguments
///
/// * `gray` - The page to assess
///
/// # Returns
///
/// Contrast, brightness, sharpness and ink density, each within 0.0-1.0
///
/// # Examples
///
/// ```no_run
/// use sheetclean::preprocessing::assess_page_quality;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gray = image::open("sheet_processed.png")?.to_luma8();
/// let quality = assess_page_quality(&gray);
/// println!("ink density: {:.3}", quality.ink_density);
/// # Ok(())
/// # }
/// ```
pub fn assess_page_quality(gray: &GrayImage) -> PageQuality {
    let start_time = std::time::Instant::now();

    let quality = PageQuality {
        contrast_ratio: calculate_contrast_ratio(gray),
        brightness: calculate_brightness(gray),
        sharpness: calculate_sharpness(gray),
        ink_density: ink_density(gray, None),
    };

    tracing::debug!(
        target: "sheet_preprocessing",
        "Quality assessment completed in {:.2}ms: contrast={:.3}, brightness={:.3}, sharpness={:.3}, ink={:.3}",
        start_time.elapsed().as_millis(),
        quality.contrast_ratio,
        quality.brightness,
        quality.sharpness,
        quality.ink_density
    );

    quality
}

/// Fraction of ink pixels, over the whole page or inside `region`.
///
/// The region is clipped to the page; an empty intersection yields 0.0.
pub fn ink_density(gray: &GrayImage, region: Option<Region>) -> f32 {
    let (width, height) = gray.dimensions();
    let region = region.unwrap_or(Region::new(0, 0, width, height));
    let x1 = region.x.saturating_add(region.width).min(width);
    let y1 = region.y.saturating_add(region.height).min(height);
    if region.x >= x1 || region.y >= y1 {
        return 0.0;
    }

    let src = gray.as_raw();
    let mut ink = 0u64;
    for y in region.y..y1 {
        let row = &src[(y * width) as usize..((y + 1) * width) as usize];
        ink += row[region.x as usize..x1 as usize]
            .iter()
            .filter(|&&v| v <= INK_LEVEL)
            .count() as u64;
    }
    ink as f32 / ((x1 - region.x) as u64 * (y1 - region.y) as u64) as f32
}

/// Calculates the contrast ratio of a grayscale image.
///
/// Contrast is the spread between the 10th and 90th percentile intensities. For uniform
/// images this is 0.0.
fn calculate_contrast_ratio(image: &GrayImage) -> f32 {
    let mut histogram = [0u64; 256];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }
    let total = image.as_raw().len() as u64;
    if total == 0 {
        return 0.0;
    }

    let percentile = |fraction: f64| {
        let target = ((total as f64 * fraction) as u64).min(total - 1);
        let mut seen = 0u64;
        for (value, &count) in histogram.iter().enumerate() {
            seen += count;
            if seen > target {
                return value as f32 / 255.0;
            }
        }
        1.0
    };

    (percentile(0.9) - percentile(0.1)).clamp(0.0, 1.0)
}

/// Mean intensity, normalized to 0.0-1.0.
fn calculate_brightness(image: &GrayImage) -> f32 {
    let total_pixels = image.as_raw().len();
    if total_pixels == 0 {
        return 0.5; // Default neutral brightness
    }

    let sum: u64 = image.as_raw().iter().map(|&v| v as u64).sum();
    sum as f32 / total_pixels as f32 / 255.0
}

/// Calculates the sharpness score of a grayscale image.
///
/// Sharpness is estimated using the variance of the Laplacian operator,
/// which detects edges and high-frequency content.
fn calculate_sharpness(image: &GrayImage) -> f32 {
    let (width, height) = image.dimensions();

    if width < 3 || height < 3 {
        return 0.5; // Default sharpness for very small images
    }

    let mut laplacian_sum = 0.0f64;
    let mut pixel_count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            // Laplacian kernel: [[0, 1, 0], [1, -4, 1], [0, 1, 0]]
            let center = image.get_pixel(x, y)[0] as f64;
            let top = image.get_pixel(x, y - 1)[0] as f64;
            let bottom = image.get_pixel(x, y + 1)[0] as f64;
            let left = image.get_pixel(x - 1, y)[0] as f64;
            let right = image.get_pixel(x + 1, y)[0] as f64;

            let laplacian = -4.0 * center + top + bottom + left + right;
            laplacian_sum += laplacian * laplacian;
            pixel_count += 1;
        }
    }

    let variance = laplacian_sum / pixel_count as f64;

    // Rough normalization based on typical document values
    (variance / 1000.0).min(1.0) as f32
}
