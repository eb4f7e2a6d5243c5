//! PSK-based authentication module.
//!
//! Keys are accepted from `x-api-key` or an `Authorization: Bearer` header and
//! compared in constant time.

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, ErrorResponse};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware guarding the API with the configured pre-shared key.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // No key configured: auth disabled (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let verdict = match provided_key(request.headers()) {
        Some(key) if keys_match(key, &expected) => Ok(()),
        Some(_) => Err("Invalid API key"),
        None => Err("Missing API key"),
    };

    match verdict {
        Ok(()) => next.run(request).await,
        Err(message) => unauthorized_response(message),
    }
}

/// Extract the client's key, preferring the dedicated header.
fn provided_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
}

/// Constant-time key comparison.
fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    let error = AppError::Unauthorized(message.to_string());
    tracing::debug!("Rejected request: {}", message);
    (error.status_code(), Json(ErrorResponse::new(&error, 0))).into_response()
}
