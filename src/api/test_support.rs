//! Shared fixtures for handler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::state::AppState;
use crate::brightness::{BrightnessControl, BrightnessError};
use crate::config::ControllerConfig;
use crate::mqtt::{MqttError, StatePublisher};
use crate::screenshot::ScreenshotPipeline;
use crate::state::{DashboardState, ScreenshotStore, StateStore};
use crate::upstream::SubscriberState;
use crate::websocket::ConnectionHub;

/// Publisher that records instead of talking to a broker
#[derive(Default)]
pub struct RecordingPublisher {
    states: Mutex<Vec<DashboardState>>,
    screenshots: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPublisher {
    pub fn states(&self) -> Vec<DashboardState> {
        self.states.lock().clone()
    }

    pub fn screenshots(&self) -> Vec<Vec<u8>> {
        self.screenshots.lock().clone()
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    fn is_connected(&self) -> bool {
        true
    }

    async fn publish_state(&self, state: &DashboardState) -> Result<bool, MqttError> {
        self.states.lock().push(state.clone());
        Ok(true)
    }

    async fn publish_screenshot_bytes(&self, image: &[u8]) -> Result<bool, MqttError> {
        self.screenshots.lock().push(image.to_vec());
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingBrightness {
    values: Mutex<Vec<u8>>,
}

impl RecordingBrightness {
    pub fn values(&self) -> Vec<u8> {
        self.values.lock().clone()
    }
}

#[async_trait]
impl BrightnessControl for RecordingBrightness {
    async fn set_percent(&self, percent: u8) -> Result<(), BrightnessError> {
        self.values.lock().push(percent);
        Ok(())
    }
}

pub fn test_state() -> (Arc<AppState>, Arc<RecordingPublisher>) {
    test_state_with(ControllerConfig::default(), SubscriberState::Disconnected)
}

pub fn test_state_with(
    controller: ControllerConfig,
    upstream: SubscriberState,
) -> (Arc<AppState>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let dyn_publisher = Arc::clone(&publisher) as Arc<dyn StatePublisher>;
    let hub = Arc::new(ConnectionHub::default());
    let screenshots = Arc::new(ScreenshotStore::new());
    let pipeline = Arc::new(ScreenshotPipeline::new(
        Arc::clone(&hub),
        Arc::clone(&screenshots),
        Some(Arc::clone(&dyn_publisher)),
    ));
    // the receiver keeps the last value after the sender is gone
    let (_tx, upstream_state) = watch::channel(upstream);

    let state = AppState::new(
        Arc::new(StateStore::new()),
        screenshots,
        hub,
        pipeline,
        Some(dyn_publisher),
        Arc::new(controller),
        upstream_state,
    );
    (Arc::new(state), publisher)
}
