//! Grain size conversion, ASTM grain number and Hall-Petch yield strength.

use super::GrainError;

const MICRONS_PER_MM: f64 = 1000.0;

/// Bounds on a user-supplied scale bar length, in microns.
pub const MIN_KNOWN_LENGTH_UM: f64 = 0.1;
pub const MAX_KNOWN_LENGTH_UM: f64 = 10_000.0;

/// Hall-Petch constants of a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HallPetch {
    /// Friction stress σ0, MPa
    pub friction_stress_mpa: f64,
    /// Locking parameter k, MPa·mm^0.5
    pub locking_parameter: f64,
}

impl HallPetch {
    pub fn new(friction_stress_mpa: f64, locking_parameter: f64) -> Self {
        Self {
            friction_stress_mpa,
            locking_parameter,
        }
    }

    /// σy = σ0 + k·d^(-1/2) with d in millimetres. Degenerate grain sizes
    /// yield zero.
    pub fn yield_strength(&self, grain_diameter_mm: f64) -> f64 {
        if grain_diameter_mm <= 0.0 || !grain_diameter_mm.is_finite() {
            return 0.0;
        }
        self.friction_stress_mpa + self.locking_parameter * grain_diameter_mm.powf(-0.5)
    }
}

/// Mean lineal intercept expressed in image and physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainSize {
    pub mean_intercept_px: f64,
    pub mean_intercept_um: f64,
    pub diameter_mm: f64,
}

/// Convert test-line length and intercept count into a grain size.
pub fn grain_size(
    total_length_px: f64,
    intercepts: usize,
    pixels_per_micron: f64,
) -> Result<GrainSize, GrainError> {
    if !pixels_per_micron.is_finite() || pixels_per_micron <= 0.0 {
        return Err(GrainError::InvalidScale(pixels_per_micron));
    }
    if intercepts == 0 {
        return Err(GrainError::NoBoundaries);
    }

    let mean_intercept_px = total_length_px / intercepts as f64;
    let mean_intercept_um = mean_intercept_px / pixels_per_micron;
    Ok(GrainSize {
        mean_intercept_px,
        mean_intercept_um,
        diameter_mm: mean_intercept_um / MICRONS_PER_MM,
    })
}

/// ASTM E112 grain size number from the mean lineal intercept:
/// G = -6.643856·log10(L_mm) - 3.288.
pub fn astm_grain_number(mean_intercept_um: f64) -> f64 {
    if mean_intercept_um <= 0.0 {
        return 0.0;
    }
    -6.643856 * (mean_intercept_um / MICRONS_PER_MM).log10() - 3.288
}

/// Pixel distance between two points picked on a displayed image, mapped back
/// to original image pixels, and the resulting pixels per micron.
pub fn calibrate_scale(
    start: (f64, f64),
    end: (f64, f64),
    known_length_um: f64,
    display_scale: f64,
) -> Result<(f64, f64), GrainError> {
    if !(MIN_KNOWN_LENGTH_UM..=MAX_KNOWN_LENGTH_UM).contains(&known_length_um) {
        return Err(GrainError::InvalidParameter(format!(
            "Known length must be between {} and {} microns",
            MIN_KNOWN_LENGTH_UM, MAX_KNOWN_LENGTH_UM
        )));
    }
    if !display_scale.is_finite() || display_scale <= 0.0 {
        return Err(GrainError::InvalidParameter(
            "Display scale must be greater than 0".to_string(),
        ));
    }

    let display_distance = (end.0 - start.0).hypot(end.1 - start.1);
    if !display_distance.is_finite() || display_distance == 0.0 {
        return Err(GrainError::InvalidParameter(
            "Calibration points must be distinct".to_string(),
        ));
    }

    let pixel_distance = display_distance / display_scale;
    Ok((pixel_distance, pixel_distance / known_length_um))
}
