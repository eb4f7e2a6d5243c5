//! Grain size measurement and yield strength estimation.
//!
//! The pipeline turns a micrograph into a binary boundary map, counts grain
//! boundary intercepts along randomly placed test circles (ASTM E112 circular
//! intercept method) and feeds the resulting mean lineal intercept into the
//! Hall-Petch relation.

pub mod enhance;
pub mod intercept;
pub mod report;
pub mod strength;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, Limits};

pub use strength::HallPetch;

/// Default number of test circles laid over the micrograph.
pub const DEFAULT_CIRCLES: usize = 5;

/// Upper bound on test circles accepted per analysis.
pub const MAX_CIRCLES: usize = 64;

/// Default cap on decoded image area, in pixels.
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 40_000_000;

/// Errors raised by the grain pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum GrainError {
    /// The upload could not be decoded as an image
    Decode(String),
    /// The image is too small to hold a test circle
    ImageTooSmall { width: u32, height: u32 },
    /// The image area exceeds the configured pixel cap
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
    /// No grain boundaries were crossed by any test circle
    NoBoundaries,
    /// Pixel scale is not a positive finite number
    InvalidScale(f64),
    /// Some other parameter is out of range
    InvalidParameter(String),
    /// The overlay could not be encoded
    Encode(String),
}

impl std::fmt::Display for GrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrainError::Decode(msg) => write!(f, "Could not read image file: {}", msg),
            GrainError::ImageTooSmall { width, height } => write!(
                f,
                "Image of {}x{} pixels is too small for intercept analysis",
                width, height
            ),
            GrainError::ImageTooLarge {
                width,
                height,
                max_pixels,
            } => write!(
                f,
                "Image of {}x{} pixels exceeds the limit of {} pixels",
                width, height, max_pixels
            ),
            GrainError::NoBoundaries => write!(
                f,
                "No boundaries found. Try a higher contrast image."
            ),
            GrainError::InvalidScale(scale) => write!(
                f,
                "Invalid pixel scale {}: must be a number greater than 0",
                scale
            ),
            GrainError::InvalidParameter(msg) => write!(f, "{}", msg),
            GrainError::Encode(msg) => write!(f, "Could not encode overlay: {}", msg),
        }
    }
}

impl std::error::Error for GrainError {}

/// Inputs to a single analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub pixels_per_micron: f64,
    pub circles: usize,
    pub seed: u64,
    pub hall_petch: HallPetch,
    /// Largest accepted width × height
    pub max_image_pixels: u64,
}

impl AnalysisParams {
    fn validate(&self) -> Result<(), GrainError> {
        if !self.pixels_per_micron.is_finite() || self.pixels_per_micron <= 0.0 {
            return Err(GrainError::InvalidScale(self.pixels_per_micron));
        }
        if self.circles == 0 || self.circles > MAX_CIRCLES {
            return Err(GrainError::InvalidParameter(format!(
                "Circle count must be between 1 and {}",
                MAX_CIRCLES
            )));
        }
        Ok(())
    }
}

/// Numbers produced by an analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub image_width: u32,
    pub image_height: u32,
    pub circle_count: usize,
    pub circle_radius_px: u32,
    pub total_intercepts: usize,
    pub total_circumference_px: f64,
    pub mean_intercept_um: f64,
    pub grain_diameter_mm: f64,
    pub astm_grain_number: f64,
    pub yield_strength_mpa: f64,
}

/// Measurement plus the annotated overlay encoded as PNG.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub measurement: Measurement,
    pub overlay_png: Vec<u8>,
}

/// Decode an uploaded micrograph and analyze it.
pub fn analyze_bytes(bytes: &[u8], params: &AnalysisParams) -> Result<AnalysisOutput, GrainError> {
    params.validate()?;
    let image = decode(bytes, params.max_image_pixels)?;
    analyze_image(&image, params)
}

/// Decode an image, rejecting it from its header alone when it is larger
/// than `max_pixels`.
pub fn decode(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage, GrainError> {
    let (width, height) = image_reader(bytes)?
        .into_dimensions()
        .map_err(|e| GrainError::Decode(e.to_string()))?;
    check_dimensions(width, height, max_pixels)?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);

    let mut reader = image_reader(bytes)?;
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| GrainError::Decode(e.to_string()))
}

fn image_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, GrainError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| GrainError::Decode(e.to_string()))
}

fn check_dimensions(width: u32, height: u32, max_pixels: u64) -> Result<(), GrainError> {
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(GrainError::ImageTooLarge {
            width,
            height,
            max_pixels,
        });
    }
    Ok(())
}

/// Analyze an already decoded micrograph.
pub fn analyze_image(
    image: &DynamicImage,
    params: &AnalysisParams,
) -> Result<AnalysisOutput, GrainError> {
    params.validate()?;
    check_dimensions(image.width(), image.height(), params.max_image_pixels)?;

    let gray = image.to_luma8();
    let boundaries = enhance::boundary_map(&gray);
    let count = intercept::count_intercepts(&boundaries, params.circles, params.seed)?;

    if count.total_intercepts == 0 {
        return Err(GrainError::NoBoundaries);
    }

    let size = strength::grain_size(
        count.total_circumference_px,
        count.total_intercepts,
        params.pixels_per_micron,
    )?;

    tracing::debug!(
        intercepts = count.total_intercepts,
        mean_intercept_um = size.mean_intercept_um,
        "Grain intercepts counted"
    );

    let overlay = intercept::draw_overlay(&image.to_rgb8(), &count);
    let mut overlay_png = Vec::new();
    DynamicImage::ImageRgb8(overlay)
        .write_to(&mut Cursor::new(&mut overlay_png), ImageFormat::Png)
        .map_err(|e| GrainError::Encode(e.to_string()))?;

    Ok(AnalysisOutput {
        measurement: Measurement {
            image_width: gray.width(),
            image_height: gray.height(),
            circle_count: count.circles.len(),
            circle_radius_px: count.radius,
            total_intercepts: count.total_intercepts,
            total_circumference_px: count.total_circumference_px,
            mean_intercept_um: size.mean_intercept_um,
            grain_diameter_mm: size.diameter_mm,
            astm_grain_number: strength::astm_grain_number(size.mean_intercept_um),
            yield_strength_mpa: params.hall_petch.yield_strength(size.diameter_mm),
        },
        overlay_png,
    })
}
