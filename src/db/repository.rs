//! Database repository for materials and analyses.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::grain::Measurement;
use crate::models::{
    Analysis, AnalysisRun, CreateMaterialRequest, Datastore, Material, RevisionInfo,
    UpdateMaterialRequest,
};

const ANALYSIS_COLUMNS: &str = r#"id, file_name, material_id, material_name, pixels_per_micron,
    image_width, image_height, circle_count, circle_radius_px, total_intercepts,
    total_circumference_px, mean_intercept_um, grain_diameter_mm, astm_grain_number,
    friction_stress_mpa, locking_parameter, yield_strength_mpa, seed, notes, created_at"#;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID and return the new value.
    pub async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        self.get_revision_id().await
    }

    /// Get the full datastore.
    pub async fn get_datastore(&self) -> Result<Datastore, AppError> {
        let meta =
            sqlx::query("SELECT schema_version, revision_id, generated_at FROM meta WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        let materials = self.list_materials().await?;
        let analyses = self.list_analyses().await?;

        Ok(Datastore {
            schema_version: meta.get("schema_version"),
            revision_id: meta.get("revision_id"),
            generated_at: meta.get("generated_at"),
            materials,
            analyses,
        })
    }

    // ==================== MATERIAL OPERATIONS ====================

    /// List all materials.
    pub async fn list_materials(&self) -> Result<Vec<Material>, AppError> {
        let rows = sqlx::query(
            "SELECT id, name, friction_stress_mpa, locking_parameter, description, updated_at, version FROM materials ORDER BY name"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(material_from_row).collect())
    }

    /// Get a material by ID.
    pub async fn get_material(&self, id: &str) -> Result<Option<Material>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, friction_stress_mpa, locking_parameter, description, updated_at, version FROM materials WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(material_from_row))
    }

    /// Get a material by its exact name.
    pub async fn get_material_by_name(&self, name: &str) -> Result<Option<Material>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, friction_stress_mpa, locking_parameter, description, updated_at, version FROM materials WHERE name = ?"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(material_from_row))
    }

    /// Create a new material.
    pub async fn create_material(
        &self,
        request: &CreateMaterialRequest,
    ) -> Result<Material, AppError> {
        let name = request.name.trim();
        if self.get_material_by_name(name).await?.is_some() {
            return Err(AppError::Validation(format!(
                "Material {} already exists",
                name
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO materials (id, name, friction_stress_mpa, locking_parameter, description, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(name)
        .bind(request.friction_stress_mpa)
        .bind(request.locking_parameter)
        .bind(&request.description)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_name(e, name))?;

        self.increment_revision().await?;

        Ok(Material {
            id,
            name: name.to_string(),
            friction_stress_mpa: request.friction_stress_mpa,
            locking_parameter: request.locking_parameter,
            description: request.description.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a material with optimistic concurrency control.
    pub async fn update_material(
        &self,
        id: &str,
        request: &UpdateMaterialRequest,
    ) -> Result<Material, AppError> {
        let existing = self
            .get_material(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Material {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.name)
            .to_string();
        let friction_stress_mpa = request
            .friction_stress_mpa
            .unwrap_or(existing.friction_stress_mpa);
        let locking_parameter = request
            .locking_parameter
            .unwrap_or(existing.locking_parameter);
        let description = request
            .description
            .clone()
            .or(existing.description.clone());

        crate::models::validate_material(&name, friction_stress_mpa, locking_parameter)
            .map_err(AppError::Validation)?;

        if name != existing.name {
            if let Some(other) = self.get_material_by_name(&name).await? {
                if other.id != id {
                    return Err(AppError::Validation(format!(
                        "Material {} already exists",
                        name
                    )));
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let new_version = existing.version + 1;

        // Use conditional UPDATE with version check to prevent race conditions
        let result = sqlx::query(
            "UPDATE materials SET name = ?, friction_stress_mpa = ?, locking_parameter = ?, description = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&name)
        .bind(friction_stress_mpa)
        .bind(locking_parameter)
        .bind(&description)
        .bind(&now)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_name(e, &name))?;

        if result.rows_affected() == 0 {
            // Race condition - version changed between read and write
            let current = self.get_material(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|m| m.version).unwrap_or(0),
            });
        }

        self.increment_revision().await?;

        Ok(Material {
            id: id.to_string(),
            name,
            friction_stress_mpa,
            locking_parameter,
            description,
            updated_at: now,
            version: new_version,
        })
    }

    /// Delete a material. Analyses keep their copied constants.
    pub async fn delete_material(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM materials WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Material {} not found", id)));
        }

        self.increment_revision().await?;
        Ok(())
    }

    // ==================== ANALYSIS OPERATIONS ====================

    /// List all analyses, newest first.
    pub async fn list_analyses(&self) -> Result<Vec<Analysis>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM analyses ORDER BY created_at DESC, id",
            ANALYSIS_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(analysis_from_row).collect())
    }

    /// Get an analysis by ID.
    pub async fn get_analysis(&self, id: &str) -> Result<Option<Analysis>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analyses WHERE id = ?",
            ANALYSIS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(analysis_from_row))
    }

    /// Get the annotated overlay PNG of an analysis.
    pub async fn get_overlay(&self, id: &str) -> Result<Option<Vec<u8>>, AppError> {
        let row = sqlx::query("SELECT overlay_png FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get::<Option<Vec<u8>>, _>("overlay_png")))
    }

    /// Record a finished analysis together with its overlay.
    pub async fn create_analysis(
        &self,
        material: &Material,
        run: &AnalysisRun,
        measurement: &Measurement,
        overlay_png: &[u8],
    ) -> Result<Analysis, AppError> {
        let analysis = Analysis {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: run.file_name.clone(),
            material_id: material.id.clone(),
            material_name: material.name.clone(),
            pixels_per_micron: run.pixels_per_micron,
            image_width: measurement.image_width,
            image_height: measurement.image_height,
            circle_count: measurement.circle_count as u32,
            circle_radius_px: measurement.circle_radius_px,
            total_intercepts: measurement.total_intercepts as u32,
            total_circumference_px: measurement.total_circumference_px,
            mean_intercept_um: measurement.mean_intercept_um,
            grain_diameter_mm: measurement.grain_diameter_mm,
            astm_grain_number: measurement.astm_grain_number,
            friction_stress_mpa: material.friction_stress_mpa,
            locking_parameter: material.locking_parameter,
            yield_strength_mpa: measurement.yield_strength_mpa,
            seed: run.seed,
            notes: run.notes.clone(),
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(&format!(
            "INSERT INTO analyses ({}, overlay_png) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ANALYSIS_COLUMNS
        ))
        .bind(&analysis.id)
        .bind(&analysis.file_name)
        .bind(&analysis.material_id)
        .bind(&analysis.material_name)
        .bind(analysis.pixels_per_micron)
        .bind(analysis.image_width as i64)
        .bind(analysis.image_height as i64)
        .bind(analysis.circle_count as i64)
        .bind(analysis.circle_radius_px as i64)
        .bind(analysis.total_intercepts as i64)
        .bind(analysis.total_circumference_px)
        .bind(analysis.mean_intercept_um)
        .bind(analysis.grain_diameter_mm)
        .bind(analysis.astm_grain_number)
        .bind(analysis.friction_stress_mpa)
        .bind(analysis.locking_parameter)
        .bind(analysis.yield_strength_mpa)
        .bind(analysis.seed as i64)
        .bind(&analysis.notes)
        .bind(&analysis.created_at)
        .bind(overlay_png)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        Ok(analysis)
    }

    /// Delete an analysis.
    pub async fn delete_analysis(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM analyses WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Analysis {} not found", id)));
        }

        self.increment_revision().await?;
        Ok(())
    }
}

// Helper functions for row conversion

fn material_from_row(row: &sqlx::sqlite::SqliteRow) -> Material {
    Material {
        id: row.get("id"),
        name: row.get("name"),
        friction_stress_mpa: row.get("friction_stress_mpa"),
        locking_parameter: row.get("locking_parameter"),
        description: row.get("description"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

/// A write that lost the race on `materials.name` is a validation error, not a
/// database failure.
fn duplicate_name(err: sqlx::Error, name: &str) -> AppError {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        AppError::Validation(format!("Material {} already exists", name))
    } else {
        AppError::from(err)
    }
}

fn analysis_from_row(row: &sqlx::sqlite::SqliteRow) -> Analysis {
    let int = |column: &str| -> i64 { row.get(column) };
    Analysis {
        id: row.get("id"),
        file_name: row.get("file_name"),
        material_id: row.get("material_id"),
        material_name: row.get("material_name"),
        pixels_per_micron: row.get("pixels_per_micron"),
        image_width: int("image_width") as u32,
        image_height: int("image_height") as u32,
        circle_count: int("circle_count") as u32,
        circle_radius_px: int("circle_radius_px") as u32,
        total_intercepts: int("total_intercepts") as u32,
        total_circumference_px: row.get("total_circumference_px"),
        mean_intercept_um: row.get("mean_intercept_um"),
        grain_diameter_mm: row.get("grain_diameter_mm"),
        astm_grain_number: row.get("astm_grain_number"),
        friction_stress_mpa: row.get("friction_stress_mpa"),
        locking_parameter: row.get("locking_parameter"),
        yield_strength_mpa: row.get("yield_strength_mpa"),
        seed: int("seed") as u64,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
    }
}
