//! # Image Filtering Module
//!
//! This module provides local contrast enhancement and noise reduction for gray pages.
//! It includes CLAHE for contrast, non-local means for strong denoising, and a bilateral
//! filter used when non-local means is disabled or cannot run.

use image::GrayImage;
use tracing;

use super::types::{PreprocessingError, Stage, StageOutcome, StagePath};

/// Clip limit used when none is configured.
pub const DEFAULT_CLAHE_CLIP: f32 = 2.0;
/// CLAHE tile grid (columns, rows).
pub const CLAHE_GRID: (u32, u32) = (8, 8);

/// Non-local means patch size.
pub const NLM_TEMPLATE_WINDOW: u32 = 7;
/// Non-local means search area.
pub const NLM_SEARCH_WINDOW: u32 = 21;

/// Bilateral window size.
pub const BILATERAL_DIAMETER: u32 = 5;
/// Bilateral intensity sigma.
pub const BILATERAL_SIGMA_COLOR: f32 = 40.0;
/// Bilateral spatial sigma.
pub const BILATERAL_SIGMA_SPACE: f32 = 1.5;

/// Applies CLAHE (Contrast Limited Adaptive Histogram Equalization) to enhance local contrast.
///
/// CLAHE improves contrast in images with varying lighting conditions by equalizing
/// histograms per tile of a `grid` of tiles, with a clip limit to prevent noise
/// amplification. Each pixel blends the mappings of its four nearest tiles so no tile
/// seams appear.
///
/// # Arguments
///
/// * `gray` - The gray page to enhance
/// * `clip_limit` - Histogram clip limit relative to a flat histogram (recommended: 2.0-4.0)
/// * `grid` - Number of tiles horizontally and vertically
///
/// # Returns
///
/// Returns a `Result` containing the enhanced image, or a `PreprocessingError`
///
/// # Examples
///
/// ```no_run
/// use sheetclean::preprocessing::apply_clahe;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gray = image::open("low_contrast_sheet.png")?.to_luma8();
/// let enhanced = apply_clahe(&gray, 2.0, (8, 8))?;
/// # Ok(())
/// # }
/// ```
pub fn apply_clahe(
    gray: &GrayImage,
    clip_limit: f32,
    grid: (u32, u32),
) -> Result<GrayImage, PreprocessingError> {
    // Validate parameters
    if !clip_limit.is_finite() || clip_limit <= 0.0 {
        return Err(PreprocessingError::failed(
            Stage::Contrast,
            format!("Invalid clip limit: {}. Must be > 0.0", clip_limit),
        ));
    }

    if grid.0 == 0 || grid.1 == 0 {
        return Err(PreprocessingError::failed(
            Stage::Contrast,
            "Invalid tile grid: dimensions must be > 0",
        ));
    }

    let (width, height) = gray.dimensions();
    if width < grid.0 || height < grid.1 {
        return Err(PreprocessingError::failed(
            Stage::Contrast,
            format!(
                "Image {}x{} is smaller than the {}x{} tile grid",
                width, height, grid.0, grid.1
            ),
        ));
    }

    let tile_width = width.div_ceil(grid.0);
    let tile_height = height.div_ceil(grid.1);
    let (tiles_x, tiles_y) = (width.div_ceil(tile_width), height.div_ceil(tile_height));

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for tile_y in 0..tiles_y {
        for tile_x in 0..tiles_x {
            let x0 = tile_x * tile_width;
            let y0 = tile_y * tile_height;
            let x1 = (x0 + tile_width).min(width);
            let y1 = (y0 + tile_height).min(height);
            luts.push(tile_mapping(gray, (x0, y0, x1, y1), clip_limit));
        }
    }

    let src = gray.as_raw();
    let mut output = GrayImage::new(width, height);
    let dst: &mut [u8] = &mut output;
    for y in 0..height {
        let (ty0, ty1, wy) = neighbour_tiles(y, tile_height, tiles_y);
        for x in 0..width {
            let (tx0, tx1, wx) = neighbour_tiles(x, tile_width, tiles_x);
            let idx = (y * width + x) as usize;
            let value = src[idx] as usize;
            let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value];
            let top = (1.0 - wx) * lut(tx0, ty0) + wx * lut(tx1, ty0);
            let bottom = (1.0 - wx) * lut(tx0, ty1) + wx * lut(tx1, ty1);
            dst[idx] = ((1.0 - wy) * top + wy * bottom).round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(output)
}

/// The two tiles whose centers bracket `coord`, and the weight of the second.
fn neighbour_tiles(coord: u32, tile_size: u32, tiles: u32) -> (u32, u32, f32) {
    let position = (coord as f32 + 0.5) / tile_size as f32 - 0.5;
    let base = position.floor();
    let weight = position - base;
    let last = tiles as i64 - 1;
    let first = (base as i64).clamp(0, last) as u32;
    let second = (base as i64 + 1).clamp(0, last) as u32;
    (first, second, weight)
}

/// Clipped-histogram equalization mapping for one tile.
fn tile_mapping(gray: &GrayImage, bounds: (u32, u32, u32, u32), clip_limit: f32) -> [f32; 256] {
    let (x0, y0, x1, y1) = bounds;
    let width = gray.width();
    let src = gray.as_raw();
    let total_pixels = ((x1 - x0) * (y1 - y0)) as f32;

    // Calculate histogram
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[src[(y * width + x) as usize] as usize] += 1;
        }
    }

    // Apply clip limit
    let clip_limit_pixels = ((clip_limit * (total_pixels / 256.0)).round() as u32).max(1);
    let mut excess_pixels = 0u32;

    for count in &mut histogram {
        if *count > clip_limit_pixels {
            excess_pixels += *count - clip_limit_pixels;
            *count = clip_limit_pixels;
        }
    }

    // Redistribute excess pixels uniformly
    let uniform_increment = excess_pixels / 256;
    let mut remainder = excess_pixels % 256;

    for count in &mut histogram {
        *count += uniform_increment;
        if remainder > 0 {
            *count += 1;
            remainder -= 1;
        }
    }

    let mut mapping = [0.0f32; 256];
    let mut cumulative = 0.0;
    for (slot, &count) in mapping.iter_mut().zip(histogram.iter()) {
        cumulative += count as f32 / total_pixels;
        *slot = cumulative * 255.0;
    }
    mapping
}

/// Boosts local contrast. A `clahe_clip` of 0 selects [`DEFAULT_CLAHE_CLIP`].
pub fn enhance_contrast(gray: &GrayImage, clahe_clip: f32) -> GrayImage {
    enhance_contrast_with_outcome(gray, clahe_clip).image
}

/// [`enhance_contrast`] with the path that produced the page.
pub fn enhance_contrast_with_outcome(gray: &GrayImage, clahe_clip: f32) -> StageOutcome<GrayImage> {
    let start_time = std::time::Instant::now();
    let clip_limit = if clahe_clip > 0.0 {
        clahe_clip
    } else {
        DEFAULT_CLAHE_CLIP
    };

    match apply_clahe(gray, clip_limit, CLAHE_GRID) {
        Ok(enhanced) => {
            tracing::debug!(
                target: "sheet_preprocessing",
                "CLAHE applied in {:.2}ms: clip_limit={}, grid={:?}",
                start_time.elapsed().as_millis(),
                clip_limit,
                CLAHE_GRID
            );
            StageOutcome::primary(enhanced, start_time)
        }
        Err(e) => {
            tracing::warn!(target: "sheet_preprocessing", "Contrast enhancement skipped: {}", e);
            StageOutcome::degraded(gray.clone(), StagePath::Passthrough, e.to_string(), start_time)
        }
    }
}

/// Patch weights are not computed once `exp` drops below `e^-16`.
const NLM_WEIGHT_CUTOFF: f32 = 16.0;

/// `exp(-ssd / (area * h²))` for every whole-patch sum of squared differences that
/// still carries weight.
fn nlm_weight_table(h: f32, area: u32) -> Vec<f32> {
    let scale = area as f32 * h * h;
    let len = ((NLM_WEIGHT_CUTOFF * scale) as usize + 1).min(area as usize * 255 * 255 + 1);
    (0..len).map(|ssd| (-(ssd as f32) / scale).exp()).collect()
}

/// Non-local means denoising.
///
/// Every pixel becomes a weighted mean of the pixels in its search window, each weighted
/// by `exp(-d / h²)` where `d` is the mean squared difference between the two
/// surrounding patches, taken over the patch offsets that stay inside the image for both.
/// That distance is symmetric, so each displacement is evaluated once and credited to
/// both pixels. Patch sums come from an integral image, so the cost does not grow with
/// the patch size.
pub fn non_local_means(
    gray: &GrayImage,
    h: f32,
    template_window: u32,
    search_window: u32,
) -> Result<GrayImage, PreprocessingError> {
    if !h.is_finite() || h <= 0.0 {
        return Err(PreprocessingError::failed(
            Stage::Denoise,
            format!("Invalid filter strength: {}", h),
        ));
    }
    let (width, height) = gray.dimensions();
    if width < template_window || height < template_window {
        return Err(PreprocessingError::failed(
            Stage::Denoise,
            format!(
                "Image {}x{} is smaller than the {}x{} patch",
                width, height, template_window, template_window
            ),
        ));
    }

    let (w, hgt) = (width as isize, height as isize);
    let template_radius = (template_window / 2) as usize;
    let search_radius = (search_window / 2) as isize;
    let full_area = (2 * template_radius + 1) * (2 * template_radius + 1);
    let src = gray.as_raw();
    let inv_h2 = 1.0 / (h * h);
    let weights = nlm_weight_table(h, full_area as u32);

    // The zero displacement contributes weight 1
    let mut weight_sum = vec![1f32; src.len()];
    let mut value_sum: Vec<f32> = src.iter().map(|&v| v as f32).collect();
    let mut integral = vec![0u64; (width as usize + 1) * (height as usize + 1)];

    for dy in 0..=search_radius {
        for dx in -search_radius..=search_radius {
            if dy == 0 && dx <= 0 {
                continue;
            }

            // Pixels p with p + (dx, dy) inside the image
            let x_start = (-dx).max(0);
            let x_end = (w - dx).min(w);
            let y_end = hgt - dy;
            if x_start >= x_end || y_end <= 0 {
                continue;
            }
            let (valid_w, valid_h) = ((x_end - x_start) as usize, y_end as usize);
            let x_start = x_start as usize;
            let offset = dy * w + dx;
            let stride = valid_w + 1;

            integral[..stride].fill(0);
            for y in 0..valid_h {
                let row = y * width as usize + x_start;
                let shifted = (row as isize + offset) as usize;
                let mut row_acc = 0u32;
                integral[(y + 1) * stride] = 0;
                for x in 0..valid_w {
                    let d = src[row + x] as i32 - src[shifted + x] as i32;
                    row_acc += (d * d) as u32;
                    integral[(y + 1) * stride + x + 1] =
                        integral[y * stride + x + 1] + row_acc as u64;
                }
            }

            for y in 0..valid_h {
                let y0 = y.saturating_sub(template_radius);
                let y1 = (y + template_radius).min(valid_h - 1);
                let row = y * width as usize + x_start;
                for x in 0..valid_w {
                    let x0 = x.saturating_sub(template_radius);
                    let x1 = (x + template_radius).min(valid_w - 1);
                    let ssd = integral[(y1 + 1) * stride + x1 + 1] + integral[y0 * stride + x0]
                        - integral[y0 * stride + x1 + 1]
                        - integral[(y1 + 1) * stride + x0];
                    let area = (y1 - y0 + 1) * (x1 - x0 + 1);
                    let weight = if area == full_area {
                        weights.get(ssd as usize).copied().unwrap_or(0.0)
                    } else {
                        (-(ssd as f32 / area as f32) * inv_h2).exp()
                    };
                    if weight == 0.0 {
                        continue;
                    }

                    let p = row + x;
                    let q = (p as isize + offset) as usize;
                    weight_sum[p] += weight;
                    value_sum[p] += weight * src[q] as f32;
                    weight_sum[q] += weight;
                    value_sum[q] += weight * src[p] as f32;
                }
            }
        }
    }

    let mut output = GrayImage::new(width, height);
    for ((dst, &value), &weight) in output.iter_mut().zip(&value_sum).zip(&weight_sum) {
        *dst = (value / weight).round().clamp(0.0, 255.0) as u8;
    }
    Ok(output)
}

fn bilateral_default(gray: &GrayImage) -> GrayImage {
    imageproc::filter::bilateral_filter(
        gray,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    )
}

/// Reduces noise while keeping stroke edges.
///
/// A positive `strength` runs non-local means with filter strength `h = strength`;
/// zero selects the bilateral filter, which also covers a non-local means failure.
pub fn denoise(gray: &GrayImage, strength: f32) -> GrayImage {
    denoise_with_outcome(gray, strength).image
}

/// [`denoise`] with the path that produced the page.
pub fn denoise_with_outcome(gray: &GrayImage, strength: f32) -> StageOutcome<GrayImage> {
    let start_time = std::time::Instant::now();

    if strength <= 0.0 {
        let filtered = bilateral_default(gray);
        tracing::debug!(
            target: "sheet_preprocessing",
            "Bilateral denoise completed in {:.2}ms: diameter={}, sigma_color={}, sigma_space={}",
            start_time.elapsed().as_millis(),
            BILATERAL_DIAMETER,
            BILATERAL_SIGMA_COLOR,
            BILATERAL_SIGMA_SPACE
        );
        return StageOutcome::primary(filtered, start_time);
    }

    match non_local_means(gray, strength, NLM_TEMPLATE_WINDOW, NLM_SEARCH_WINDOW) {
        Ok(denoised) => {
            tracing::debug!(
                target: "sheet_preprocessing",
                "Non-local means completed in {:.2}ms: h={}, dimensions={}x{}",
                start_time.elapsed().as_millis(),
                strength,
                gray.width(),
                gray.height()
            );
            StageOutcome::primary(denoised, start_time)
        }
        Err(e) => {
            tracing::warn!(
                target: "sheet_preprocessing",
                "Non-local means unavailable, using bilateral filter: {}", e
            );
            let filtered = bilateral_default(gray);
            StageOutcome::degraded(filtered, StagePath::Fallback, e.to_string(), start_time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::thresholding::filled;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn create_test_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
    }

    /// Left half dark, right half light, with seeded noise.
    fn create_noisy_step(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(width, height, |x, _| {
            let base: i32 = if x < width / 2 { 60 } else { 200 };
            let noise: i32 = rng.random_range(-20..=20);
            Luma([(base + noise).clamp(0, 255) as u8])
        })
    }

    fn mean_abs_error(image: &GrayImage, reference: impl Fn(u32) -> u8) -> f32 {
        let total: u32 = image
            .enumerate_pixels()
            .map(|(x, _, p)| p[0].abs_diff(reference(x)) as u32)
            .sum();
        total as f32 / (image.width() * image.height()) as f32
    }

    #[test]
    fn test_apply_clahe_basic() {
        let img = create_test_image(100, 100);
        let result = apply_clahe(&img, 3.0, (8, 8)).unwrap();
        assert_eq!(result.dimensions(), (100, 100));
    }

    #[test]
    fn test_apply_clahe_invalid_parameters() {
        let img = create_test_image(50, 50);
        assert!(apply_clahe(&img, 0.0, (8, 8)).is_err());
        assert!(apply_clahe(&img, f32::NAN, (8, 8)).is_err());
        assert!(apply_clahe(&img, 2.0, (0, 8)).is_err());
        assert!(apply_clahe(&create_test_image(5, 50), 2.0, (8, 8)).is_err());
    }

    #[test]
    fn test_apply_clahe_stretches_low_contrast() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 8) as u8 * 3]));
        let result = apply_clahe(&img, 4.0, (8, 8)).unwrap();
        let spread = |im: &GrayImage| {
            let min = im.iter().min().copied().unwrap_or(0);
            let max = im.iter().max().copied().unwrap_or(0);
            max - min
        };
        assert!(spread(&result) > spread(&img));
    }

    #[test]
    fn test_clahe_keeps_white_page_white() {
        let img = filled(64, 64, 255);
        assert_eq!(apply_clahe(&img, 2.0, (8, 8)).unwrap(), img);
    }

    #[test]
    fn test_neighbour_tiles_at_edges() {
        let (first, second, _) = neighbour_tiles(0, 10, 8);
        assert_eq!((first, second), (0, 0));
        let (first, second, weight) = neighbour_tiles(15, 10, 8);
        assert_eq!((first, second), (1, 2));
        assert!((weight - 0.05).abs() < 1e-4);
        let (first, second, _) = neighbour_tiles(79, 10, 8);
        assert_eq!((first, second), (7, 7));
    }

    #[test]
    fn test_enhance_contrast_passthrough_on_tiny_image() {
        let img = create_test_image(4, 4);
        let outcome = enhance_contrast_with_outcome(&img, 0.0);
        assert_eq!(outcome.path, StagePath::Passthrough);
        assert_eq!(outcome.image, img);
    }

    #[test]
    fn test_enhance_contrast_zero_clip_uses_default() {
        let img = create_test_image(64, 64);
        assert_eq!(
            enhance_contrast(&img, 0.0),
            apply_clahe(&img, DEFAULT_CLAHE_CLIP, CLAHE_GRID).unwrap()
        );
    }

    #[test]
    fn test_bilateral_reduces_noise_and_keeps_edge() {
        let img = create_noisy_step(40, 30, 7);
        let reference = |x: u32| if x < 20 { 60 } else { 200 };
        let filtered = bilateral_default(&img);
        assert!(mean_abs_error(&filtered, reference) < mean_abs_error(&img, reference));
        assert!(filtered.get_pixel(18, 15)[0] < 110);
        assert!(filtered.get_pixel(21, 15)[0] > 150);
    }

    #[test]
    fn test_non_local_means_reduces_noise() {
        let img = create_noisy_step(40, 30, 11);
        let reference = |x: u32| if x < 20 { 60 } else { 200 };
        let denoised = non_local_means(&img, 15.0, NLM_TEMPLATE_WINDOW, NLM_SEARCH_WINDOW).unwrap();
        assert!(mean_abs_error(&denoised, reference) < mean_abs_error(&img, reference));
        assert!(denoised.get_pixel(18, 15)[0] < 110);
        assert!(denoised.get_pixel(21, 15)[0] > 150);
    }

    #[test]
    fn test_non_local_means_keeps_flat_image() {
        let img = filled(16, 16, 90);
        assert_eq!(non_local_means(&img, 5.0, 7, 21).unwrap(), img);
    }

    #[test]
    fn test_non_local_means_weight_table() {
        let table = nlm_weight_table(5.0, 49);
        assert_eq!(table[0], 1.0);
        assert!(table.windows(2).all(|pair| pair[1] <= pair[0]));
        let last = *table.last().unwrap();
        assert!(last > 0.0 && last < 1e-6);
    }

    #[test]
    fn test_non_local_means_performance() {
        let img = create_noisy_step(400, 400, 5);
        let outcome = denoise_with_outcome(&img, 5.0);
        assert_eq!(outcome.path, StagePath::Primary);

        // Should complete in reasonable time (< 3s for 400x400 image)
        assert!(outcome.processing_time_ms < 3000, "{}ms", outcome.processing_time_ms);
    }

    #[test]
    fn test_denoise_paths() {
        let img = create_noisy_step(30, 30, 3);
        assert_eq!(denoise_with_outcome(&img, 0.0).path, StagePath::Primary);
        assert_eq!(denoise_with_outcome(&img, 10.0).path, StagePath::Primary);

        let tiny = create_noisy_step(5, 5, 3);
        let outcome = denoise_with_outcome(&tiny, 10.0);
        assert_eq!(outcome.path, StagePath::Fallback);
        assert_eq!(outcome.image, bilateral_default(&tiny));
    }
}
