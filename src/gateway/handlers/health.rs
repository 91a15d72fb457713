//! Health check handler

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{Json, http::StatusCode};

use super::super::types::{ApiResponse, HealthResponse};

/// Health check endpoint
///
/// The hub has no external dependencies, so a response means healthy.
///
/// - 200 OK + {code: 0, data: {timestamp_ms}}
pub async fn health_check() -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: now_ms,
        })),
    )
}
