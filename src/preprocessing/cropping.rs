//! # Table Cropping Module
//!
//! This module finds the ruled table on a page and crops the page to it. Long
//! horizontal and vertical rules are isolated with directional openings, and the
//! largest outline they form becomes the crop region.

use std::time::Instant;

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::geometry::contour_area;
use tracing;

use super::morphology::{invert, open_rect};
use super::thresholding::{is_uniform, otsu_level, threshold_at};
use super::types::{Region, TableCrop, TableCropResult};

/// Minimum length of a rule, in pixels.
pub const LINE_KERNEL_LENGTH: u32 = 40;
/// Margin kept around the detected table.
pub const TABLE_PADDING: u32 = 10;

/// Mask of long horizontal and vertical rules, bright on black.
pub fn line_mask(gray: &GrayImage) -> GrayImage {
    let ink = invert(gray);
    let horizontal = open_rect(&ink, LINE_KERNEL_LENGTH, 1);
    let vertical = open_rect(&ink, 1, LINE_KERNEL_LENGTH);

    let mut combined = horizontal;
    for (h, &v) in combined.iter_mut().zip(vertical.as_raw()) {
        *h = (0.5 * *h as f32 + 0.5 * v as f32).round() as u8;
    }
    combined
}

/// Inclusive bounding box of a contour as a region.
fn bounding_region(contour: &Contour<i32>) -> Option<Region> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;
    Some(Region::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

/// Grows a region by `padding` on every side without leaving the image.
pub fn pad_region(region: Region, padding: u32, width: u32, height: u32) -> Region {
    let x0 = region.x.saturating_sub(padding);
    let y0 = region.y.saturating_sub(padding);
    let x1 = region.x.saturating_add(region.width).saturating_add(padding).min(width);
    let y1 = region.y.saturating_add(region.height).saturating_add(padding).min(height);
    Region::new(x0, y0, x1 - x0, y1 - y0)
}

/// Locates the largest ruled region of a page.
///
/// # Returns
///
/// The padded, clamped bounding box of the biggest outer outline formed by long
/// rules, or `None` when the page has no such structure
pub fn find_table_region(gray: &GrayImage) -> Option<Region> {
    let mask = line_mask(gray);
    if is_uniform(&mask) {
        return None;
    }

    let binary = threshold_at(&mask, otsu_level(&mask));
    let contours = find_contours::<i32>(&binary);

    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .max_by(|a, b| contour_area(&a.points).total_cmp(&contour_area(&b.points)))?;

    let bounds = bounding_region(largest)?;
    Some(pad_region(bounds, TABLE_PADDING, gray.width(), gray.height()))
}

/// Detects the attendance table and crops the page to it.
///
/// Pages without line structure come back unchanged.
pub fn detect_and_crop_table(image: &RgbImage) -> RgbImage {
    detect_and_crop_table_with_result(image).image
}

/// [`detect_and_crop_table`] with the crop decision.
///
/// # Examples
///
/// ```no_run
/// use sheetclean::preprocessing::{detect_and_crop_table_with_result, TableCrop};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let page = image::open("sheet_processed.png")?.to_rgb8();
/// let result = detect_and_crop_table_with_result(&page);
/// if let TableCrop::Cropped { region } = result.crop {
///     println!("Table at {}x{}+{}+{}", region.width, region.height, region.x, region.y);
/// }
/// # Ok(())
/// # }
/// ```
pub fn detect_and_crop_table_with_result(image: &RgbImage) -> TableCropResult {
    let start_time = Instant::now();
    let gray = image::imageops::grayscale(image);

    let (image, crop) = match find_table_region(&gray) {
        Some(region) => {
            let cropped = image::imageops::crop_imm(
                image,
                region.x,
                region.y,
                region.width,
                region.height,
            )
            .to_image();
            (cropped, TableCrop::Cropped { region })
        }
        None => (image.clone(), TableCrop::NotFound),
    };

    let processing_time_ms = start_time.elapsed().as_millis() as u32;

    tracing::debug!(
        target: "sheet_preprocessing",
        "Table detection completed in {}ms on {}x{} page: {:?}",
        processing_time_ms,
        gray.width(),
        gray.height(),
        crop
    );

    TableCropResult {
        image,
        crop,
        processing_time_ms,
    }
}
