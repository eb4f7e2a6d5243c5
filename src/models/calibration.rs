//! Scale calibration from a scale bar measured on the image.

use serde::{Deserialize, Serialize};

/// A point in display coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Two picked points spanning a scale bar of known length.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleCalibrationRequest {
    pub start: Point,
    pub end: Point,
    pub known_length_um: f64,
    /// Display pixels per original image pixel
    #[serde(default = "default_display_scale")]
    pub display_scale: f64,
}

fn default_display_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleCalibration {
    /// Scale bar length in original image pixels
    pub pixel_distance: f64,
    pub pixels_per_micron: f64,
}
