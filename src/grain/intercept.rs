//! ASTM E112 circular intercept counting.

use std::f64::consts::PI;

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::GrainError;

/// Test circle radius as a percentage of the smaller image dimension.
const RADIUS_PERCENT: u64 = 35;
/// Maximum centre jitter as a fraction of each image dimension.
const JITTER_FRACTION: f64 = 0.1;
const MIN_RADIUS: u32 = 2;

const CIRCLE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const MARKER_RADIUS: i32 = 3;

/// One test circle and the boundary crossings found on it.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleSample {
    pub center: (u32, u32),
    /// Representative pixel of each intercept run.
    pub intercepts: Vec<(u32, u32)>,
}

/// Intercepts accumulated over all test circles.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptCount {
    pub radius: u32,
    pub circles: Vec<CircleSample>,
    pub total_intercepts: usize,
    pub total_circumference_px: f64,
}

/// Lay `circles` test circles over the boundary map and count crossings.
pub fn count_intercepts(
    boundaries: &GrayImage,
    circles: usize,
    seed: u64,
) -> Result<InterceptCount, GrainError> {
    let (width, height) = boundaries.dimensions();
    let radius = (width.min(height) as u64 * RADIUS_PERCENT / 100) as u32;
    if radius < MIN_RADIUS {
        return Err(GrainError::ImageTooSmall { width, height });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let jitter_x = (width as f64 * JITTER_FRACTION) as i64;
    let jitter_y = (height as f64 * JITTER_FRACTION) as i64;

    let mut samples = Vec::with_capacity(circles);
    let mut total_intercepts = 0;
    let mut total_circumference_px = 0.0;

    for _ in 0..circles {
        let mut cx = (width / 2) as i64 + rng.gen_range(-jitter_x..=jitter_x);
        let mut cy = (height / 2) as i64 + rng.gen_range(-jitter_y..=jitter_y);
        let r = radius as i64;
        if cx - r < 0 || cx + r >= width as i64 || cy - r < 0 || cy + r >= height as i64 {
            cx = (width / 2) as i64;
            cy = (height / 2) as i64;
        }

        let path = circle_path(cx, cy, radius, width, height);
        let intercepts = boundary_runs(boundaries, &path);

        total_intercepts += intercepts.len();
        total_circumference_px += 2.0 * PI * radius as f64;
        samples.push(CircleSample {
            center: (cx as u32, cy as u32),
            intercepts,
        });
    }

    Ok(InterceptCount {
        radius,
        circles: samples,
        total_intercepts,
        total_circumference_px,
    })
}

/// Closed, ordered, 8-connected pixel path around a circle. Points falling
/// outside the image are dropped.
pub fn circle_path(cx: i64, cy: i64, radius: u32, width: u32, height: u32) -> Vec<(u32, u32)> {
    let steps = ((2.0 * PI * radius as f64).ceil() as usize * 4).max(8);
    let mut path: Vec<(u32, u32)> = Vec::with_capacity(steps);

    for i in 0..steps {
        let theta = 2.0 * PI * i as f64 / steps as f64;
        let x = (cx as f64 + radius as f64 * theta.cos()).round() as i64;
        let y = (cy as f64 + radius as f64 * theta.sin()).round() as i64;
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            continue;
        }
        let point = (x as u32, y as u32);
        if path.last() != Some(&point) {
            path.push(point);
        }
    }
    while path.len() > 1 && path.first() == path.last() {
        path.pop();
    }
    path
}

/// Count maximal runs of boundary pixels along a cyclic path, returning the
/// middle pixel of each run.
pub fn boundary_runs(boundaries: &GrayImage, path: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let on = |&(x, y): &(u32, u32)| boundaries.get_pixel(x, y)[0] > 0;

    let Some(start) = path.iter().position(|p| !on(p)) else {
        // Entirely on boundary pixels, or an empty path.
        return path.first().copied().into_iter().collect();
    };

    let mut runs = Vec::new();
    let mut current: Vec<(u32, u32)> = Vec::new();
    for offset in 1..=path.len() {
        let point = path[(start + offset) % path.len()];
        if on(&point) {
            current.push(point);
        } else if !current.is_empty() {
            runs.push(current[current.len() / 2]);
            current.clear();
        }
    }
    runs
}

/// Draw the test circles and intercept markers over the original image.
pub fn draw_overlay(original: &RgbImage, count: &InterceptCount) -> RgbImage {
    let mut overlay = original.clone();
    let radius = count.radius as i32;

    for circle in &count.circles {
        let center = (circle.center.0 as i32, circle.center.1 as i32);
        draw_hollow_circle_mut(&mut overlay, center, radius, CIRCLE_COLOR);
        draw_hollow_circle_mut(&mut overlay, center, radius + 1, CIRCLE_COLOR);
        for &(x, y) in &circle.intercepts {
            draw_filled_circle_mut(&mut overlay, (x as i32, y as i32), MARKER_RADIUS, MARKER_COLOR);
        }
    }
    overlay
}
