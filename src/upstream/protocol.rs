//! Frames of the controller's real-time API.

use serde::Deserialize;
use serde_json::{json, Value};

/// Frames received from the controller
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    Event {
        id: u64,
        event: Value,
    },
    Pong {
        id: u64,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    pub fn describe(error: &Option<ErrorBody>) -> String {
        match error {
            Some(e) if !e.message.is_empty() => format!("{} ({})", e.message, e.code),
            Some(e) => e.code.clone(),
            None => "unknown error".to_string(),
        }
    }
}

pub fn auth(token: &str) -> Value {
    json!({"type": "auth", "access_token": token})
}

pub fn subscribe_events(id: u64, event_type: &str) -> Value {
    json!({"id": id, "type": "subscribe_events", "event_type": event_type})
}

pub fn ping(id: u64) -> Value {
    json!({"id": id, "type": "ping"})
}

/// A bare command such as `persistent_notification/get`
pub fn command(id: u64, command_type: &str) -> Value {
    json!({"id": id, "type": command_type})
}
