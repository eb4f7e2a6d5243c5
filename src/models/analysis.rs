//! Analysis model: one measured micrograph.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A completed grain size analysis with its yield strength estimate.
///
/// Hall-Petch constants are copied from the material at analysis time so
/// later material edits do not change recorded results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub file_name: String,
    pub material_id: String,
    pub material_name: String,
    pub pixels_per_micron: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub circle_count: u32,
    pub circle_radius_px: u32,
    pub total_intercepts: u32,
    pub total_circumference_px: f64,
    pub mean_intercept_um: f64,
    pub grain_diameter_mm: f64,
    pub astm_grain_number: f64,
    pub friction_stress_mpa: f64,
    pub locking_parameter: f64,
    pub yield_strength_mpa: f64,
    pub seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: String,
}

/// Multipart form accepted by the analysis upload endpoint.
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpload {
    pub file_name: Option<String>,
    pub image: Option<Vec<u8>>,
    pub pixels_per_micron: Option<f64>,
    pub material_id: Option<String>,
    pub material_name: Option<String>,
    pub circles: Option<usize>,
    pub seed: Option<u64>,
    pub notes: Option<String>,
}

impl AnalysisUpload {
    /// Store a text form field. Unknown fields are reported as `Ok(false)`.
    pub fn set_text_field(&mut self, name: &str, value: &str) -> Result<bool, String> {
        let value = value.trim();
        match name {
            "pixelsPerMicron" => self.pixels_per_micron = Some(parse_number(name, value)?),
            "materialId" => self.material_id = non_empty(value),
            "materialName" => self.material_name = non_empty(value),
            "circles" => self.circles = Some(parse_number(name, value)?),
            "seed" => self.seed = Some(parse_number(name, value)?),
            "notes" => self.notes = non_empty(value),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Field {} has invalid value {:?}", name, value))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Per-run inputs recorded with an analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub file_name: String,
    pub pixels_per_micron: f64,
    pub seed: u64,
    pub notes: Option<String>,
}
