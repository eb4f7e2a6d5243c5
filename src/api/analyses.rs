//! Analysis API endpoints.

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use super::{error, success, ApiResult};
use crate::errors::{AppError, AppErrorWithRevision};
use crate::grain::{self, report::Report, AnalysisParams};
use crate::models::{Analysis, AnalysisRun, AnalysisUpload, Material};
use crate::AppState;

/// GET /api/analyses - List all analyses, newest first.
pub async fn list_analyses(State(state): State<AppState>) -> ApiResult<Vec<Analysis>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_analyses().await {
        Ok(analyses) => success(analyses, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/analyses/:id - Get a single analysis.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Analysis> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_analysis(&id).await {
        Ok(Some(analysis)) => success(analysis, revision_id),
        Ok(None) => error(not_found(&id), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/analyses/:id/report - Plain-text results report.
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppErrorWithRevision> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let with_revision = |error| AppErrorWithRevision { error, revision_id };

    let analysis = state
        .repo
        .get_analysis(&id)
        .await
        .map_err(with_revision)?
        .ok_or_else(|| with_revision(not_found(&id)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Report(&analysis).to_string(),
    )
        .into_response())
}

/// GET /api/analyses/:id/overlay - Micrograph annotated with test circles.
pub async fn get_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppErrorWithRevision> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let with_revision = |error| AppErrorWithRevision { error, revision_id };

    let png = state
        .repo
        .get_overlay(&id)
        .await
        .map_err(with_revision)?
        .ok_or_else(|| with_revision(not_found(&id)))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// POST /api/analyses - Upload a micrograph and measure it.
pub async fn create_analysis(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Analysis> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match run_analysis(&state, &mut multipart).await {
        Ok(analysis) => {
            if let Err(e) = state.search.index_analysis(&analysis).await {
                tracing::warn!("Failed to index analysis: {}", e);
            }

            tracing::info!(
                id = %analysis.id,
                intercepts = analysis.total_intercepts,
                yield_strength_mpa = analysis.yield_strength_mpa,
                "Analysis complete"
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(analysis, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/analyses/:id - Delete an analysis.
pub async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_analysis(&id).await {
        Ok(()) => {
            if let Err(e) = state.search.remove_analysis(&id).await {
                tracing::warn!("Failed to remove analysis from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Analysis {} not found", id))
}

/// Read the upload, resolve the material, measure on the blocking pool and
/// persist the result.
async fn run_analysis(state: &AppState, multipart: &mut Multipart) -> Result<Analysis, AppError> {
    let upload = read_upload(multipart).await?;

    let image = upload
        .image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::Validation("Image file is required".to_string()))?;
    let pixels_per_micron = upload
        .pixels_per_micron
        .ok_or_else(|| AppError::Validation("pixelsPerMicron is required".to_string()))?;
    let material = resolve_material(
        state,
        upload.material_id.as_deref(),
        upload.material_name.as_deref(),
    )
    .await?;

    let seed = upload.seed.unwrap_or_else(|| rand::random::<u32>() as u64);
    let params = AnalysisParams {
        pixels_per_micron,
        circles: upload.circles.unwrap_or(state.config.default_circles),
        seed,
        hall_petch: material.hall_petch(),
        max_image_pixels: state.config.max_image_pixels,
    };
    let file_name = upload.file_name.unwrap_or_else(|| "upload".to_string());

    tracing::info!(
        file = %file_name,
        material = %material.name,
        bytes = image.len(),
        "Running grain analysis"
    );

    let output = tokio::task::spawn_blocking(move || grain::analyze_bytes(&image, &params)).await??;

    let run = AnalysisRun {
        file_name,
        pixels_per_micron,
        seed,
        notes: upload.notes,
    };
    state
        .repo
        .create_analysis(&material, &run, &output.measurement, &output.overlay_png)
        .await
}

async fn read_upload(multipart: &mut Multipart) -> Result<AnalysisUpload, AppError> {
    let mut upload = AnalysisUpload::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            upload.file_name = field.file_name().map(str::to_string);
            upload.image = Some(field.bytes().await?.to_vec());
            continue;
        }

        let value = field.text().await?;
        if !upload
            .set_text_field(&name, &value)
            .map_err(AppError::Validation)?
        {
            tracing::debug!(field = %name, "Ignoring unknown upload field");
        }
    }

    Ok(upload)
}

async fn resolve_material(
    state: &AppState,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<Material, AppError> {
    match (id, name) {
        (Some(id), _) => state
            .repo
            .get_material(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Material {} not found", id))),
        (None, Some(name)) => state
            .repo
            .get_material_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Material {} not found", name))),
        (None, None) => Err(AppError::Validation(
            "materialId or materialName is required".to_string(),
        )),
    }
}
