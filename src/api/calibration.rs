//! Scale calibration endpoint.

use axum::{extract::State, Json};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::grain::strength::calibrate_scale;
use crate::models::{ScaleCalibration, ScaleCalibrationRequest};
use crate::AppState;

/// POST /api/calibrate - Derive pixels per micron from a measured scale bar.
pub async fn calibrate(
    State(state): State<AppState>,
    Json(request): Json<ScaleCalibrationRequest>,
) -> ApiResult<ScaleCalibration> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result = calibrate_scale(
        (request.start.x, request.start.y),
        (request.end.x, request.end.y),
        request.known_length_um,
        request.display_scale,
    );

    match result {
        Ok((pixel_distance, pixels_per_micron)) => success(
            ScaleCalibration {
                pixel_distance,
                pixels_per_micron,
            },
            revision_id,
        ),
        Err(e) => error(AppError::from(e), revision_id),
    }
}
