//! Screenshot Routes
//!
//! - GET /api/screenshot - Latest pushed screenshot
//! - GET /api/screenshot/take - Ask dashboards for a fresh capture

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::dto::CaptureResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/screenshot
///
/// Serves the stored image, never a live capture. 404 until the first push.
pub async fn latest_screenshot(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let record = state
        .screenshots
        .latest()
        .ok_or_else(|| ApiError::NotFound("No screenshot captured yet".to_string()))?;

    let captured_at = record.captured_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, record.content_type.clone()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::LAST_MODIFIED, captured_at),
        ],
        Body::from(record.image.to_vec()),
    )
        .into_response())
}

/// GET /api/screenshot/take
///
/// Always 202; the image arrives later through a dashboard push.
pub async fn take_screenshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let clients = state.hub.connection_count().await;
    let requested = state.pipeline.request_capture().await;

    let status = if requested { "requested" } else { "no_clients" };
    (
        StatusCode::ACCEPTED,
        Json(CaptureResponse {
            status: status.to_string(),
            clients: if requested { clients } else { 0 },
        }),
    )
}
