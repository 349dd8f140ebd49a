//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;
use crate::upstream::SubscriberState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health
///
/// Status of each transport. Always 200; a dropped controller or broker
/// degrades but does not stop the bridge.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let upstream = state.upstream_state();

    let mqtt = match &state.publisher {
        None => "disabled",
        Some(publisher) if publisher.is_connected() => "connected",
        Some(_) => "disconnected",
    };

    let status = if upstream == SubscriberState::Listening {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        upstream,
        mqtt: mqtt.to_string(),
        clients: state.hub.connection_count().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
