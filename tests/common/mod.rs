//! # Synthetic Sheet Generators
//!
//! Builds attendance-sheet-like images in memory so the integration tests need no
//! fixtures on disk.

#![allow(dead_code)]

use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Grid geometry in the unrotated sheet frame, centered on the page.
pub const GRID_COLUMNS: u32 = 8;
pub const GRID_ROWS: u32 = 20;
pub const CELL_WIDTH: u32 = 90;
pub const CELL_HEIGHT: u32 = 50;
pub const LINE_THICKNESS: u32 = 3;

/// Width of the whole grid, outer lines included.
pub fn grid_width() -> u32 {
    GRID_COLUMNS * CELL_WIDTH + LINE_THICKNESS
}

/// Height of the whole grid, outer lines included.
pub fn grid_height() -> u32 {
    GRID_ROWS * CELL_HEIGHT + LINE_THICKNESS
}

const PAPER: [f32; 3] = [236.0, 232.0, 222.0];
const INK: Rgb<u8> = Rgb([35, 35, 45]);

fn shaded_paper(x: u32, y: u32, width: u32, height: u32) -> Rgb<u8> {
    // Darker toward the bottom-right corner, like a hand shadow
    let shade = 1.0 - 0.25 * (x as f32 / width as f32) * (y as f32 / height as f32);
    Rgb(PAPER.map(|c| (c * shade).round() as u8))
}

/// Whether the unrotated point `(u, v)`, relative to the grid center, lies on ink.
fn sheet_ink(u: f32, v: f32) -> bool {
    let left = -(GRID_COLUMNS as f32 * CELL_WIDTH as f32) / 2.0;
    let top = -(GRID_ROWS as f32 * CELL_HEIGHT as f32) / 2.0;
    let gx = u - left;
    let gy = v - top;
    if gx < 0.0 || gy < 0.0 || gx >= grid_width() as f32 || gy >= grid_height() as f32 {
        return false;
    }

    let thickness = LINE_THICKNESS as f32;
    if gx.rem_euclid(CELL_WIDTH as f32) < thickness
        || gy.rem_euclid(CELL_HEIGHT as f32) < thickness
    {
        return true;
    }

    // Short handwriting-like bars, well inside the cells
    let column = (gx / CELL_WIDTH as f32) as u32;
    let row = (gy / CELL_HEIGHT as f32) as u32;
    let cx = gx.rem_euclid(CELL_WIDTH as f32);
    let cy = gy.rem_euclid(CELL_HEIGHT as f32);
    let on_bar_row = (22.0..27.0).contains(&cy);
    if column == 0 {
        on_bar_row && ((12.0..34.0).contains(&cx) || (44.0..66.0).contains(&cx))
    } else if (column * 3 + row) % 4 != 0 {
        on_bar_row && (30.0..52.0).contains(&cx)
    } else {
        false
    }
}

/// A shaded attendance sheet whose ruled grid is rotated by `angle_degrees`
/// (clockwise, y pointing down) about the page center, with seeded speckles
/// scattered inside the grid.
pub fn create_attendance_sheet(width: u32, height: u32, angle_degrees: f32, seed: u64) -> RgbImage {
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    let mut sheet = RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let u = cos * dx + sin * dy;
        let v = -sin * dx + cos * dy;
        if sheet_ink(u, v) {
            INK
        } else {
            shaded_paper(x, y, width, height)
        }
    });

    let mut rng = StdRng::seed_from_u64(seed);
    let half_w = (GRID_COLUMNS * CELL_WIDTH) as f32 / 2.0 - 10.0;
    let half_h = (GRID_ROWS * CELL_HEIGHT) as f32 / 2.0 - 10.0;
    for _ in 0..300 {
        let u: f32 = rng.random_range(-half_w..half_w);
        let v: f32 = rng.random_range(-half_h..half_h);
        let x = (cos * u - sin * v + cx).round() as u32;
        let y = (sin * u + cos * v + cy).round() as u32;
        if x < width && y < height {
            sheet.put_pixel(x, y, INK);
        }
    }

    sheet
}

/// Gray page of level text lines, with no ruling.
pub fn create_text_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let in_text = x >= width / 8 && x < width * 7 / 8 && y >= height / 8 && y < height * 7 / 8;
        let on_line = y % 24 < 5;
        let in_word = (x % 40) < 28;
        if in_text && on_line && in_word {
            Luma([30])
        } else {
            Luma([225])
        }
    })
}
