//! Topic namespace for one device.

use serde_json::{json, Value};
use thiserror::Error;

use crate::command::json_integer;
use crate::config::MqttConfig;

/// All topics under `<root>/<device_id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub availability: String,
    pub state: String,
    pub command: String,
    pub screen_set: String,
    pub volume_set: String,
    pub screenshot_take: String,
    pub screenshot: String,
}

impl Topics {
    pub fn new(root: &str, device_id: &str) -> Self {
        let base = format!("{}/{}", root.trim_end_matches('/'), device_id);
        Self {
            availability: format!("{}/availability", base),
            state: format!("{}/state", base),
            command: format!("{}/command", base),
            screen_set: format!("{}/screen/set", base),
            volume_set: format!("{}/volume/set", base),
            screenshot_take: format!("{}/screenshot/take", base),
            screenshot: format!("{}/screenshot", base),
            base,
        }
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(&config.topic_root, &config.device_id)
    }

    /// Topics the bridge subscribes to after every connect
    pub fn subscriptions(&self) -> [&str; 4] {
        [
            &self.command,
            &self.screen_set,
            &self.volume_set,
            &self.screenshot_take,
        ]
    }
}

/// Why an inbound MQTT message produced no command
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("No handler for topic {0}")]
    UnknownTopic(String),

    #[error("Invalid JSON command: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid payload {payload:?} on {topic}")]
    InvalidPayload { topic: String, payload: String },
}

/// Turn an inbound message into a command object.
///
/// Dispatch is by exact topic. Set-topics are rewritten into the same shape
/// a JSON command on the command topic would have.
pub fn translate_message(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Value, MessageError> {
    if topic == topics.command {
        return Ok(serde_json::from_slice(payload)?);
    }

    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    let invalid = || MessageError::InvalidPayload {
        topic: topic.to_string(),
        payload: text.to_string(),
    };

    if topic == topics.screen_set {
        match text.to_ascii_uppercase().as_str() {
            "ON" => Ok(json!({"command": "wake"})),
            "OFF" => Ok(json!({"command": "screensaver", "enabled": true})),
            _ => Err(invalid()),
        }
    } else if topic == topics.volume_set {
        let value = json_integer(&Value::String(text.to_string())).ok_or_else(invalid)?;
        Ok(json!({"command": "volume", "value": value}))
    } else if topic == topics.screenshot_take {
        Ok(json!({"command": "screenshot"}))
    } else {
        Err(MessageError::UnknownTopic(topic.to_string()))
    }
}
