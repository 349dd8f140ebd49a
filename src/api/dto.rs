//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use serde::Serialize;

use crate::upstream::SubscriberState;

// ============================================
// SCREENSHOT DTOs
// ============================================

/// Response to a capture request
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    /// "requested" or "no_clients"
    pub status: String,
    /// Dashboards the request was sent to
    pub clients: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// healthy when the controller subscription is live, otherwise degraded
    pub status: String,
    /// Upstream subscriber lifecycle state
    pub upstream: SubscriberState,
    /// disabled, connected or disconnected
    pub mqtt: String,
    /// Connected dashboards
    pub clients: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
