//! Material API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{validate_material, CreateMaterialRequest, Material, UpdateMaterialRequest};
use crate::AppState;

/// GET /api/materials - List all materials.
pub async fn list_materials(State(state): State<AppState>) -> ApiResult<Vec<Material>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_materials().await {
        Ok(materials) => success(materials, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/materials/:id - Get a single material.
pub async fn get_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Material> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_material(&id).await {
        Ok(Some(material)) => success(material, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Material {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/materials - Create a new material.
pub async fn create_material(
    State(state): State<AppState>,
    Json(request): Json<CreateMaterialRequest>,
) -> ApiResult<Material> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(message) = validate_material(
        &request.name,
        request.friction_stress_mpa,
        request.locking_parameter,
    ) {
        return error(AppError::Validation(message), revision_id);
    }

    match state.repo.create_material(&request).await {
        Ok(material) => {
            tracing::info!(name = %material.name, "Material created");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(material, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/materials/:id - Update a material.
pub async fn update_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateMaterialRequest>,
) -> ApiResult<Material> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_material(&id, &request).await {
        Ok(material) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(material, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/materials/:id - Delete a material.
pub async fn delete_material(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_material(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
