//! Micrograph preprocessing into a binary grain boundary map.

use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;

/// CLAHE clip limit, relative to a flat histogram.
pub const CLAHE_CLIP_LIMIT: f32 = 2.5;
/// CLAHE tiles per axis.
pub const CLAHE_TILES: u32 = 8;
/// Sigma matching a 5x5 Gaussian kernel.
const BLUR_SIGMA: f32 = 1.1;
/// Adaptive threshold neighbourhood (odd).
const THRESHOLD_BLOCK: u32 = 11;
/// Subtracted from the local mean before thresholding.
const THRESHOLD_C: f32 = 2.0;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

const FOREGROUND: u8 = 255;

/// Build the boundary map: CLAHE, blur, inverted adaptive threshold opened
/// with a 2x2 kernel, OR'ed with Canny edges of the blurred image.
pub fn boundary_map(gray: &GrayImage) -> GrayImage {
    let enhanced = clahe(gray, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    let blurred = gaussian_blur_f32(&enhanced, BLUR_SIGMA);
    let thresholded = adaptive_threshold_inv(&blurred, THRESHOLD_BLOCK, THRESHOLD_C);
    let opened = open_2x2(&thresholded);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
    union(&edges, &opened)
}

/// Contrast-limited adaptive histogram equalization.
///
/// Each tile gets a clipped, redistributed histogram; pixels are mapped by
/// bilinear interpolation between the lookup tables of the four nearest
/// tile centres.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(tiles.max(1));
    let tile_h = height.div_ceil(tiles.max(1));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts.push(tile_lut(&mut hist, area, clip_limit));
        }
    }

    let lut_index = |tx: i64, ty: i64| -> usize {
        let tx = tx.clamp(0, tiles_x as i64 - 1) as u32;
        let ty = ty.clamp(0, tiles_y as i64 - 1) as u32;
        (ty * tiles_x + tx) as usize
    };
    let lookup = |tx: i64, ty: i64, v: usize| luts[lut_index(tx, ty)][v] as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let gx = fx.floor();
        let gy = fy.floor();
        let ax = fx - gx;
        let ay = fy - gy;
        let (tx, ty) = (gx as i64, gy as i64);

        let v = gray.get_pixel(x, y)[0] as usize;
        let top = lookup(tx, ty, v) * (1.0 - ax) + lookup(tx + 1, ty, v) * ax;
        let bottom = lookup(tx, ty + 1, v) * (1.0 - ax) + lookup(tx + 1, ty + 1, v) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Clip a tile histogram, spread the excess evenly and return its CDF mapping.
fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }

    // Leftover counts go to evenly spaced bins across the range.
    let mut residual = (excess % 256) as usize;
    if residual > 0 {
        let step = (256 / residual).max(1);
        let mut i = 0;
        while i < 256 && residual > 0 {
            hist[i] += 1;
            i += step;
            residual -= 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / area.max(1) as f32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean.
///
/// A pixel is foreground when it is at least `c` darker than its
/// neighbourhood.
pub fn adaptive_threshold_inv(gray: &GrayImage, block: u32, c: f32) -> GrayImage {
    let mean = gaussian_mean(gray, block);
    let (width, height) = gray.dimensions();

    GrayImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        let local = mean[idx].round();
        if gray.get_pixel(x, y)[0] as f32 <= local - c {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Separable Gaussian-weighted mean with replicated borders.
fn gaussian_mean(gray: &GrayImage, block: u32) -> Vec<f32> {
    let (width, height) = gray.dimensions();
    let kernel = gaussian_kernel(block);
    let half = (block / 2) as i64;
    let clamp = |v: i64, max: u32| v.clamp(0, max as i64 - 1) as u32;

    let mut horizontal = vec![0f32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as i64 + k as i64 - half, width);
                acc += weight * gray.get_pixel(sx, y)[0] as f32;
            }
            horizontal[(y * width + x) as usize] = acc;
        }
    }

    let mut out = vec![0f32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = clamp(y as i64 + k as i64 - half, height);
                acc += weight * horizontal[(sy * width + x) as usize];
            }
            out[(y * width + x) as usize] = acc;
        }
    }
    out
}

/// Normalized 1-D Gaussian kernel; sigma follows the usual
/// `0.3 * ((size - 1) / 2 - 1) + 0.8` rule for a given size.
fn gaussian_kernel(size: u32) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as i64;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Morphological opening with a 2x2 square: erosion then dilation.
pub fn open_2x2(binary: &GrayImage) -> GrayImage {
    let (width, height) = binary.dimensions();

    // Outside the image counts as foreground for erosion.
    let eroded = GrayImage::from_fn(width, height, |x, y| {
        let keep = [(0, 0), (1, 0), (0, 1), (1, 1)].iter().all(|&(dx, dy)| {
            let (sx, sy) = (x + dx, y + dy);
            sx >= width || sy >= height || binary.get_pixel(sx, sy)[0] == FOREGROUND
        });
        Luma([if keep { FOREGROUND } else { 0 }])
    });

    GrayImage::from_fn(width, height, |x, y| {
        let hit = [(0, 0), (1, 0), (0, 1), (1, 1)].iter().any(|&(dx, dy)| {
            x >= dx && y >= dy && eroded.get_pixel(x - dx, y - dy)[0] == FOREGROUND
        });
        Luma([if hit { FOREGROUND } else { 0 }])
    })
}

/// Pixelwise OR of two binary maps of equal size.
pub fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].max(b.get_pixel(x, y)[0])])
    })
}
