//! WebSocket Message Types
//!
//! Defines the JSON frames exchanged between browser dashboards and the
//! bridge. Commands relayed from MQTT are forwarded verbatim and have no
//! variant here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::StatePatch;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive, answered with a pong
    Ping,
    /// Browser reports part of the dashboard state
    StateUpdate {
        #[serde(default)]
        state: StatePatch,
    },
    /// Screenshot captured in response to a screenshot request
    ScreenshotData {
        /// Base64 image, optionally with a `data:` URL prefix
        image: String,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Pong response to ping
    Pong {
        /// Bridge version
        version: String,
    },
    /// Ask the browser to capture and send back a screenshot
    ScreenshotRequest,
    /// Classified event from the home-automation controller
    ControllerEvent {
        category: String,
        event_type: String,
        entity_id: String,
        data: Value,
    },
}

impl ServerMessage {
    pub fn pong() -> Self {
        ServerMessage::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
