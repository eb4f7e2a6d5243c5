//! Datastore snapshot model.

use serde::{Deserialize, Serialize};

use super::{Analysis, Material};

/// Everything the service persists, minus overlay images.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastore {
    pub schema_version: i32,
    pub generated_at: String,
    pub revision_id: i64,
    pub materials: Vec<Material>,
    pub analyses: Vec<Analysis>,
}

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}
