//! Notification Routes
//!
//! - GET /api/notifications - Persistent notifications from the controller

use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::upstream::fetch_notifications;

/// GET /api/notifications
///
/// Opens a short-lived controller session for each request. Any failure on
/// the way is a 502.
pub async fn list_notifications(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let notifications = fetch_notifications(&state.controller).await?;
    Ok(Json(notifications))
}
