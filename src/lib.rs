//! # Dashbridge
//!
//! Keeps a wall-mounted dashboard in sync with a home-automation controller.
//!
//! Three transports run side by side and fail independently:
//!
//! - **Upstream**: an authenticated subscription to the controller's
//!   real-time event stream; events are classified and relayed to browsers
//! - **MQTT**: the dashboard announced as a device with discovery, state and
//!   availability; commands from the broker are routed to local effects
//! - **Downstream**: browser dashboards over WebSocket, reporting state and
//!   pushing screenshots
//!
//! ## Modules
//!
//! - [`state`]: Shared dashboard state and latest screenshot
//! - [`websocket`]: Browser connections and the broadcast hub
//! - [`upstream`]: Controller client and event classifier
//! - [`mqtt`]: Broker bridge, topics and discovery
//! - [`command`]: Command table shared by MQTT and browsers
//! - [`screenshot`]: Capture request and image pipeline
//! - [`api`]: HTTP surface with Axum

pub mod api;
pub mod brightness;
pub mod command;
pub mod config;
pub mod mqtt;
pub mod screenshot;
pub mod state;
pub mod upstream;
pub mod websocket;

pub use api::{build_router, build_ws_router, serve, ApiError, AppState};

pub use brightness::{BrightnessControl, BrightnessError, NoBacklight, SysfsBacklight};

pub use command::{route, CommandError, CommandRouter, LocalEffect, Route};

pub use config::{
    Config, ConfigError, ConfigOrigin, ControllerConfig, DisplayConfig, LoggingConfig, MqttConfig, ServerConfig,
};

pub use mqtt::{MqttBridge, MqttError, MqttHandle, StatePublisher, Topics};

pub use screenshot::{decode_image, ImageDecodeError, ScreenshotPipeline};

pub use state::{DashboardState, DisplayStatus, ScreenshotRecord, ScreenshotStore, StatePatch, StateStore};

pub use upstream::{
    fetch_notifications, Category, SubscriberState, UpstreamError, UpstreamSubscriber,
};

pub use websocket::{
    websocket_handler, ClientMessage, ConnectionHub, HubConfig, HubError, ServerMessage,
};
