//! # Morphological Operations Module
//!
//! Grayscale erosion and dilation with rectangular and elliptical structuring
//! elements, and the cleanup stage that removes speckles and closes stroke
//! gaps on the ink layer of a binary page.
//!
//! Rectangles go through `imageproc::morphology`. The disc used for background
//! estimation is tens of pixels wide, so it has its own incremental filter whose cost
//! grows with the radius instead of the disc area.
//!
//! Out-of-image pixels never take part in a min/max, which behaves like an
//! infinitely padded border of the neutral value.

use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use tracing;

use super::types::StageOutcome;

/// Speckle removal window (width, height).
pub const SPECKLE_KERNEL: (u32, u32) = (2, 2);
/// Gap closing window (width, height).
pub const GAP_KERNEL: (u32, u32) = (3, 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankOp {
    Min,
    Max,
}

impl RankOp {
    #[inline]
    fn apply(self, a: u8, b: u8) -> u8 {
        match self {
            RankOp::Min => a.min(b),
            RankOp::Max => a.max(b),
        }
    }

    fn identity(self) -> u8 {
        match self {
            RankOp::Min => u8::MAX,
            RankOp::Max => u8::MIN,
        }
    }
}

/// A `kernel_width` × `kernel_height` rectangle anchored at `size / 2`, and its
/// reflection through the anchor.
///
/// Dilation uses the reflected mask so that opening and closing stay true openings and
/// closings for even-sized kernels.
fn rect_masks(kernel_width: u32, kernel_height: u32) -> (Mask, Mask) {
    let (width, height) = (kernel_width.clamp(1, 511), kernel_height.clamp(1, 511));
    let block = GrayImage::from_pixel(width, height, Luma([255]));
    let (anchor_x, anchor_y) = (width / 2, height / 2);
    let mask = Mask::from_image(&block, anchor_x as u8, anchor_y as u8);
    let reflected = Mask::from_image(
        &block,
        (width - 1 - anchor_x) as u8,
        (height - 1 - anchor_y) as u8,
    );
    (mask, reflected)
}

/// Grayscale erosion with a `kernel_width` × `kernel_height` rectangle.
pub fn erode_rect(image: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    let (mask, _) = rect_masks(kernel_width, kernel_height);
    grayscale_erode(image, &mask)
}

/// Grayscale dilation with a `kernel_width` × `kernel_height` rectangle.
pub fn dilate_rect(image: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    let (_, reflected) = rect_masks(kernel_width, kernel_height);
    grayscale_dilate(image, &reflected)
}

/// Opening (erode, then dilate) with a rectangle. Removes bright features
/// the rectangle cannot fit inside.
pub fn open_rect(image: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    let (mask, reflected) = rect_masks(kernel_width, kernel_height);
    grayscale_dilate(&grayscale_erode(image, &mask), &reflected)
}

/// Closing (dilate, then erode) with a rectangle. Fills dark gaps narrower
/// than the rectangle.
pub fn close_rect(image: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    let (mask, reflected) = rect_masks(kernel_width, kernel_height);
    grayscale_erode(&grayscale_dilate(image, &reflected), &mask)
}

/// Half-widths of each row of a filled ellipse (a disc) of odd `diameter`.
pub(crate) fn ellipse_half_widths(diameter: u32) -> Vec<u32> {
    let radius = (diameter.max(1) / 2) as i64;
    if radius == 0 {
        return vec![0];
    }
    let r = radius as f64;
    (-radius..=radius)
        .map(|dy| {
            let t = dy as f64 / r;
            (r * (1.0 - t * t).max(0.0).sqrt()).round() as u32
        })
        .collect()
}

/// Min/max over a disc.
///
/// Row extents grow one column at a time; each structuring-element row with
/// half-width `k` then reads the k-th running extent of its source row.
fn rank_filter_ellipse(image: &GrayImage, diameter: u32, op: RankOp) -> GrayImage {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let src = image.as_raw();
    let half_widths = ellipse_half_widths(diameter);
    let radius = (half_widths.len() / 2) as isize;
    let max_half = half_widths.iter().copied().max().unwrap_or(0) as usize;

    let mut out = vec![op.identity(); width * height];
    let mut extent = src.clone();

    for k in 0..=max_half {
        if k > 0 {
            for y in 0..height {
                let row = &src[y * width..(y + 1) * width];
                let ext = &mut extent[y * width..(y + 1) * width];
                for x in 0..width {
                    let mut acc = ext[x];
                    if x >= k {
                        acc = op.apply(acc, row[x - k]);
                    }
                    if x + k < width {
                        acc = op.apply(acc, row[x + k]);
                    }
                    ext[x] = acc;
                }
            }
        }

        for (i, &half) in half_widths.iter().enumerate() {
            if half as usize != k {
                continue;
            }
            let dy = i as isize - radius;
            for y in 0..height {
                let sy = y as isize + dy;
                if sy < 0 || sy >= height as isize {
                    continue;
                }
                let source = &extent[sy as usize * width..(sy as usize + 1) * width];
                let target = &mut out[y * width..(y + 1) * width];
                for (t, &s) in target.iter_mut().zip(source) {
                    *t = op.apply(*t, s);
                }
            }
        }
    }

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([out[y as usize * width + x as usize]])
    })
}

/// Grayscale erosion with a disc.
pub fn erode_ellipse(image: &GrayImage, diameter: u32) -> GrayImage {
    rank_filter_ellipse(image, diameter, RankOp::Min)
}

/// Grayscale dilation with a disc.
pub fn dilate_ellipse(image: &GrayImage, diameter: u32) -> GrayImage {
    rank_filter_ellipse(image, diameter, RankOp::Max)
}

/// Opening with a disc of odd `diameter`.
pub fn open_ellipse(image: &GrayImage, diameter: u32) -> GrayImage {
    dilate_ellipse(&erode_ellipse(image, diameter), diameter)
}

/// Swaps ink and paper.
pub fn invert(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for value in out.iter_mut() {
        *value = 255 - *value;
    }
    out
}

/// Removes isolated ink speckles and reconnects narrow stroke gaps.
///
/// Ink is dark on the input, so both steps run on the inverted page: a 2×2
/// opening drops ink blobs smaller than the window, then a 3×3 closing bridges
/// one-pixel breaks inside strokes.
pub fn clean_morphology(binary: &GrayImage) -> GrayImage {
    clean_morphology_with_outcome(binary).image
}

/// [`clean_morphology`] with timing.
pub fn clean_morphology_with_outcome(binary: &GrayImage) -> StageOutcome<GrayImage> {
    let start_time = std::time::Instant::now();

    let ink = invert(binary);
    let despeckled = open_rect(&ink, SPECKLE_KERNEL.0, SPECKLE_KERNEL.1);
    let closed = close_rect(&despeckled, GAP_KERNEL.0, GAP_KERNEL.1);
    let cleaned = invert(&closed);

    tracing::debug!(
        target: "sheet_preprocessing",
        "Morphological cleanup completed in {:.2}ms: speckle={}x{}, gap={}x{}, dimensions={}x{}",
        start_time.elapsed().as_millis(),
        SPECKLE_KERNEL.0,
        SPECKLE_KERNEL.1,
        GAP_KERNEL.0,
        GAP_KERNEL.1,
        binary.width(),
        binary.height()
    );

    StageOutcome::primary(cleaned, start_time)
}
