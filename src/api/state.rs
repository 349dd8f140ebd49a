//! Application State
//!
//! Shared state accessible by HTTP and WebSocket handlers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::config::ControllerConfig;
use crate::mqtt::StatePublisher;
use crate::screenshot::ScreenshotPipeline;
use crate::state::{ScreenshotStore, StateStore};
use crate::upstream::SubscriberState;
use crate::websocket::ConnectionHub;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Dashboard state reported by browsers and commands
    pub store: Arc<StateStore>,
    /// Most recent screenshot
    pub screenshots: Arc<ScreenshotStore>,
    /// Connected dashboards
    pub hub: Arc<ConnectionHub>,
    pub pipeline: Arc<ScreenshotPipeline>,
    /// MQTT side, absent when the bridge is disabled
    pub publisher: Option<Arc<dyn StatePublisher>>,
    /// Used for one-off controller round trips
    pub controller: Arc<ControllerConfig>,
    pub upstream_state: watch::Receiver<SubscriberState>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<StateStore>,
        screenshots: Arc<ScreenshotStore>,
        hub: Arc<ConnectionHub>,
        pipeline: Arc<ScreenshotPipeline>,
        publisher: Option<Arc<dyn StatePublisher>>,
        controller: Arc<ControllerConfig>,
        upstream_state: watch::Receiver<SubscriberState>,
    ) -> Self {
        Self {
            store,
            screenshots,
            hub,
            pipeline,
            publisher,
            controller,
            upstream_state,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn upstream_state(&self) -> SubscriberState {
        *self.upstream_state.borrow()
    }
}
