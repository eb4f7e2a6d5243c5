//! Data models for the grain analyzer.
//!
//! Wire names are camelCase to match the JSON API.

mod analysis;
mod calibration;
mod datastore;
mod material;

pub use analysis::*;
pub use calibration::*;
pub use datastore::*;
pub use material::*;
