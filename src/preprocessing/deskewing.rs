//! # Image Deskewing Module
//!
//! This module estimates page rotation from the minimum-area rectangle around all ink
//! and rotates pages back to horizontal with bicubic resampling.

use image::{GrayImage, ImageBuffer, Pixel};
use imageproc::geometry::{convex_hull, min_area_rect};
use imageproc::point::Point;
use tracing;

use super::thresholding::{is_uniform, otsu_level};
use super::types::{DeskewResult, SkewEstimate};

/// Estimates the rotation that levels the page.
///
/// The page is split with an Otsu threshold; pixels at or below it are ink. The
/// minimum-area rectangle around all ink gives the dominant orientation.
///
/// # Returns
///
/// `None` when the page has no ink to measure (for example a uniform image)
pub fn estimate_skew(gray: &GrayImage) -> Option<SkewEstimate> {
    if is_uniform(gray) {
        return None;
    }

    let points = ink_extremes(gray, otsu_level(gray));
    if points.is_empty() {
        return None;
    }

    let rect_angle = min_area_rect_angle(&points);
    let estimate = SkewEstimate::from_rect_angle(rect_angle);

    tracing::debug!(
        target: "sheet_preprocessing",
        "Skew estimated: rect_angle={:.2}°, rotation={:.2}°, ink_extremes={}",
        rect_angle,
        estimate.angle_degrees,
        points.len()
    );

    Some(estimate)
}

/// Leftmost and rightmost ink pixel of every row.
///
/// Points between a row's extremes never lie on the convex hull, so these are all the
/// hull needs.
fn ink_extremes(gray: &GrayImage, level: u8) -> Vec<Point<i32>> {
    let width = gray.width() as usize;
    let mut points = Vec::new();
    for (y, row) in gray.as_raw().chunks_exact(width).enumerate() {
        let first = row.iter().position(|&v| v <= level);
        let last = row.iter().rposition(|&v| v <= level);
        if let (Some(first), Some(last)) = (first, last) {
            points.push(Point::new(first as i32, y as i32));
            if last != first {
                points.push(Point::new(last as i32, y as i32));
            }
        }
    }
    points
}

/// Direction of the segment `a -> b` folded into [0°, 90°).
fn folded_direction(a: Point<i32>, b: Point<i32>) -> Option<f64> {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dy.atan2(dx).to_degrees().rem_euclid(90.0) % 90.0)
}

/// Edge angle, in [-90°, 0°), of the minimum-area rectangle enclosing `points`.
///
/// `min_area_rect` rounds its corners to whole pixels. The optimal rectangle has a side
/// collinear with a hull edge, so the direction read off the corners is snapped to the
/// nearest hull edge direction.
pub fn min_area_rect_angle(points: &[Point<i32>]) -> f32 {
    if points.is_empty() {
        return -90.0;
    }

    let corners = min_area_rect(points);
    let rough = folded_direction(corners[0], corners[1])
        .or_else(|| folded_direction(corners[1], corners[2]));
    let Some(rough) = rough else {
        return -90.0;
    };

    // One pixel of rounding at each end of the longer side
    let side = |a: Point<i32>, b: Point<i32>| ((b.x - a.x) as f64).hypot((b.y - a.y) as f64);
    let longest = side(corners[0], corners[1]).max(side(corners[1], corners[2]));
    let tolerance = 2f64.atan2(longest).to_degrees();

    let folded_distance = |angle: f64| {
        let d = (angle - rough).rem_euclid(90.0);
        d.min(90.0 - d)
    };
    let hull = convex_hull(points);
    let exact = hull
        .iter()
        .zip(hull.iter().cycle().skip(1))
        .filter_map(|(&a, &b)| folded_direction(a, b))
        .filter(|&angle| folded_distance(angle) <= tolerance)
        .min_by(|a, b| folded_distance(*a).total_cmp(&folded_distance(*b)))
        .unwrap_or(rough);

    (exact - 90.0) as f32
}

/// Bicubic convolution weights for a fractional offset `t` in [0, 1).
fn cubic_weights(t: f32) -> [f32; 4] {
    const A: f32 = -0.75;
    let w0 = ((A * (t + 1.0) - 5.0 * A) * (t + 1.0) + 8.0 * A) * (t + 1.0) - 4.0 * A;
    let w1 = ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0;
    let s = 1.0 - t;
    let w2 = ((A + 2.0) * s - (A + 3.0)) * s * s + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

/// Rotates an image clockwise by `angle_degrees` about its center.
///
/// Dimensions are preserved; samples falling outside the source replicate the nearest
/// edge pixel.
pub fn rotate_about_center<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    angle_degrees: f32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let src = image.as_raw();
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    let mut output: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;

        let (fx, fy) = (sx.floor(), sy.floor());
        let wx = cubic_weights(sx - fx);
        let wy = cubic_weights(sy - fy);
        let (ix, iy) = (fx as i64, fy as i64);

        let mut acc = [0f32; 4];
        for (j, weight_y) in wy.iter().enumerate() {
            let row = (iy - 1 + j as i64).clamp(0, max_y) as usize;
            for (i, weight_x) in wx.iter().enumerate() {
                let col = (ix - 1 + i as i64).clamp(0, max_x) as usize;
                let offset = (row * width as usize + col) * channels;
                let weight = weight_y * weight_x;
                for (c, slot) in acc.iter_mut().take(channels).enumerate() {
                    *slot += weight * src[offset + c] as f32;
                }
            }
        }

        for (dst, value) in pixel.channels_mut().iter_mut().zip(acc) {
            *dst = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    output
}

/// Detects and corrects page skew.
///
/// # Arguments
///
/// * `gray` - The denoised gray page
///
/// # Returns
///
/// The leveled page and the estimate used; a uniform page comes back unchanged
///
/// # Examples
///
/// ```no_run
/// use sheetclean::preprocessing::correct_skew;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gray = image::open("rotated_sheet.png")?.to_luma8();
/// let result = correct_skew(&gray);
/// if let Some(estimate) = result.estimate {
///     println!("Corrected skew: {:.2}°", estimate.angle_degrees);
/// }
/// # Ok(())
/// # }
/// ```
pub fn correct_skew(gray: &GrayImage) -> DeskewResult {
    let start_time = std::time::Instant::now();

    let estimate = estimate_skew(gray);
    let image = match estimate {
        Some(e) if !e.is_negligible() => rotate_about_center(gray, e.angle_degrees),
        _ => gray.clone(),
    };

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "sheet_preprocessing",
        "Deskewing completed in {:.2}ms: rotation={:?}",
        processing_time.as_millis(),
        estimate.map(|e| e.angle_degrees)
    );

    DeskewResult {
        image,
        estimate,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::thresholding::filled;
    use image::{Luma, Rgb, RgbImage};

    /// Dark text-like bars of equal length drawn at `angle_degrees` (clockwise, y down).
    fn create_text_block(width: u32, height: u32, angle_degrees: f32) -> GrayImage {
        let (sin, cos) = angle_degrees.to_radians().sin_cos();
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        GrayImage::from_fn(width, height, |x, y| {
            // Map back into the unrotated frame
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let u = cos * dx + sin * dy;
            let v = -sin * dx + cos * dy;
            let on_line = (v + 60.0).rem_euclid(20.0) < 4.0 && v.abs() < 60.0;
            if u.abs() < 140.0 && on_line {
                Luma([20])
            } else {
                Luma([235])
            }
        })
    }

    #[test]
    fn test_min_area_rect_axis_aligned() {
        let hull = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 5),
            Point::new(0, 5),
        ];
        assert_eq!(min_area_rect_angle(&hull), -90.0);
    }

    #[test]
    fn test_min_area_rect_rotated_rectangle() {
        // Outline of a 400x200 rectangle turned 10° clockwise (y down)
        let (sin, cos) = 10f32.to_radians().sin_cos();
        let mut points = Vec::new();
        for u in (-200..=200).step_by(10) {
            for v in [-100, 100] {
                let (u, v) = (u as f32, v as f32);
                points.push(Point::new(
                    (cos * u - sin * v + 300.0).round() as i32,
                    (sin * u + cos * v + 300.0).round() as i32,
                ));
            }
        }
        let angle = min_area_rect_angle(&points);
        assert!((angle + 80.0).abs() < 1.0, "{}", angle);
        assert!((SkewEstimate::from_rect_angle(angle).angle_degrees + 10.0).abs() < 1.0);
    }

    #[test]
    fn test_min_area_rect_degenerate() {
        assert_eq!(min_area_rect_angle(&[]), -90.0);
        assert_eq!(min_area_rect_angle(&[Point::new(3, 3)]), -90.0);
        assert_eq!(min_area_rect_angle(&[Point::new(3, 3), Point::new(3, 3)]), -90.0);
    }

    #[test]
    fn test_estimate_skew_horizontal_text() {
        let img = create_text_block(400, 300, 0.0);
        let estimate = estimate_skew(&img).unwrap();
        assert!(estimate.angle_degrees.abs() < 0.5, "{:?}", estimate);
    }

    #[test]
    fn test_estimate_skew_rotated_text() {
        for angle in [-6.0f32, 4.0, 8.0] {
            let img = create_text_block(420, 340, angle);
            let estimate = estimate_skew(&img).unwrap();
            assert!(
                (estimate.angle_degrees + angle).abs() < 1.0,
                "drawn at {}, estimated {:?}",
                angle,
                estimate
            );
        }
    }

    #[test]
    fn test_correct_skew_levels_rotated_text() {
        let img = create_text_block(420, 340, 7.0);
        let result = correct_skew(&img);
        assert_eq!(result.image.dimensions(), img.dimensions());
        let residual = estimate_skew(&result.image).unwrap();
        assert!(residual.angle_degrees.abs() < 1.0, "{:?}", residual);
    }

    #[test]
    fn test_deskew_is_idempotent_on_horizontal_text() {
        let img = create_text_block(400, 300, 0.0);
        let first = correct_skew(&img);
        let second = correct_skew(&first.image);
        assert!(second.estimate.unwrap().angle_degrees.abs() < 1.0);
    }

    #[test]
    fn test_correct_skew_uniform_is_noop() {
        let img = filled(50, 40, 180);
        let result = correct_skew(&img);
        assert!(result.estimate.is_none());
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_rotation_zero_angle_is_identity() {
        let img = GrayImage::from_fn(17, 11, |x, y| Luma([(x * 13 + y * 7) as u8]));
        assert_eq!(rotate_about_center(&img, 0.0), img);
    }

    #[test]
    fn test_rotation_quarter_turn_moves_pixels_clockwise() {
        let mut img = filled(21, 21, 0);
        img.put_pixel(15, 10, Luma([255]));
        let rotated = rotate_about_center(&img, 90.0);
        // Right of center moves below center when turning clockwise with y down
        assert_eq!(rotated.get_pixel(10, 15)[0], 255);
        assert_eq!(rotated.get_pixel(15, 10)[0], 0);
    }

    #[test]
    fn test_rotation_replicates_edges_and_keeps_color() {
        let img = RgbImage::from_pixel(30, 20, Rgb([200, 120, 40]));
        let rotated = rotate_about_center(&img, 12.0);
        assert_eq!(rotated.dimensions(), (30, 20));
        assert!(rotated.pixels().all(|p| *p == Rgb([200, 120, 40])));
    }

    #[test]
    fn test_cubic_weights_sum_to_one() {
        for t in [0.0f32, 0.25, 0.5, 0.9] {
            let sum: f32 = cubic_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert_eq!(cubic_weights(0.0)[1], 1.0);
    }
}
