//! Material model carrying Hall-Petch constants.

use serde::{Deserialize, Serialize};

use crate::grain::HallPetch;

/// An alloy with its Hall-Petch friction stress and locking parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub name: String,
    /// σ0 in MPa
    pub friction_stress_mpa: f64,
    /// k in MPa·mm^0.5
    pub locking_parameter: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Material {
    pub fn hall_petch(&self) -> HallPetch {
        HallPetch::new(self.friction_stress_mpa, self.locking_parameter)
    }
}

/// Request body for creating a new material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMaterialRequest {
    pub name: String,
    pub friction_stress_mpa: f64,
    pub locking_parameter: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request body for updating an existing material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMaterialRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub friction_stress_mpa: Option<f64>,
    #[serde(default)]
    pub locking_parameter: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Check name and constants shared by create and update.
pub fn validate_material(
    name: &str,
    friction_stress_mpa: f64,
    locking_parameter: f64,
) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Material name is required".to_string());
    }
    if !friction_stress_mpa.is_finite() || friction_stress_mpa < 0.0 {
        return Err("Friction stress must be a non-negative number".to_string());
    }
    if !locking_parameter.is_finite() || locking_parameter <= 0.0 {
        return Err("Locking parameter must be greater than 0".to_string());
    }
    Ok(())
}

/// Materials inserted on first start: (name, σ0 MPa, k MPa·mm^0.5, note).
pub const SEED_MATERIALS: &[(&str, f64, f64, &str)] = &[
    ("Steel (Low Carbon)", 70.0, 23.0, "Typical mild steel"),
    ("Aluminum (1100-O Pure)", 15.0, 2.2, "Pure aluminium, very soft"),
    ("Titanium (CP Grade 2)", 170.0, 12.0, "HCP metal with significant k"),
    ("Inconel 718 (Sol. Ann.)", 350.0, 24.0, "Solution treated state only"),
    ("Brass (70/30 Cartridge)", 70.0, 12.0, "Cartridge brass"),
];
