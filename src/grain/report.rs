//! Plain-text analysis report.

use std::fmt;

use crate::models::Analysis;

const RULE: &str = "----------------------------------------";

/// Renders an analysis the way the results panel presents it.
pub struct Report<'a>(pub &'a Analysis);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        writeln!(f, "MATERIAL: {}", a.material_name)?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Intercepts Counted : {}", a.total_intercepts)?;
        writeln!(f, "Mean Lineal Intercept: {:.2} µm", a.mean_intercept_um)?;
        writeln!(f, "ASTM Grain Number (G): {:.2}", a.astm_grain_number)?;
        writeln!(f)?;
        writeln!(f, "MECHANICAL PROPERTIES (EST.)")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Formula: σy = σ₀ + k·d⁻¹/²")?;
        writeln!(f, "Grain Diam (d)     : {:.4} mm", a.grain_diameter_mm)?;
        writeln!(f, "Friction Stress σ₀ : {} MPa", Constant(a.friction_stress_mpa))?;
        writeln!(f, "Locking Param. k   : {} MPa·√mm", Constant(a.locking_parameter))?;
        write!(f, "Yield Strength σy  : {} MPa", a.yield_strength_mpa.trunc() as i64)
    }
}

/// Material constant printed in shortest form, keeping `.0` on whole numbers.
struct Constant(f64);

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_finite() && self.0.fract() == 0.0 && self.0.abs() < 1e16 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
