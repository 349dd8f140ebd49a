//! Decides which controller events reach the dashboard and under what category.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::websocket::ServerMessage;

pub const STATE_CHANGED: &str = "state_changed";
pub const CALL_SERVICE: &str = "call_service";

const NOTIFICATION_EVENTS: [&str; 3] = [
    "persistent_notifications_created",
    "persistent_notifications_removed",
    "persistent_notifications_updated",
];

const CALENDAR_EVENTS: [&str; 3] = [
    "calendar_event_created",
    "calendar_event_deleted",
    "calendar_event_updated",
];

const NOTIFICATION_DOMAIN: &str = "persistent_notification";

/// Category tag attached to a forwarded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Notification,
    Mail,
    Calendar,
    Todo,
    Weather,
    Sensor,
    Control,
    Prayer,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Notification => "notification",
            Category::Mail => "mail",
            Category::Calendar => "calendar",
            Category::Todo => "todo",
            Category::Weather => "weather",
            Category::Sensor => "sensor",
            Category::Control => "control",
            Category::Prayer => "prayer",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of an upstream event the classifier looks at
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_type: String,
    pub entity_id: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Extract from the `event` object of an event frame.
    ///
    /// Returns `None` when the frame carries no `event_type`.
    pub fn from_event(event: &Value) -> Option<Self> {
        let event_type = event.get("event_type")?.as_str()?.to_string();
        let data = event.get("data").cloned().unwrap_or(Value::Null);
        let entity_id = data
            .get("entity_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            event_type,
            entity_id,
            data,
        })
    }

    pub fn into_message(self, category: Category) -> ServerMessage {
        ServerMessage::ControllerEvent {
            category: category.as_str().to_string(),
            event_type: self.event_type,
            entity_id: self.entity_id,
            data: self.data,
        }
    }
}

/// Category for an entity id, or `None` if the dashboard has no use for it
pub fn categorize_entity(entity_id: &str) -> Option<Category> {
    // prayer is a sensor.* prefix too, so it goes before the generic checks
    if entity_id.starts_with("sensor.islamic_prayer") {
        return Some(Category::Prayer);
    }
    if entity_id.starts_with("persistent_notification.") {
        Some(Category::Notification)
    } else if entity_id.starts_with("sensor.mail_") {
        Some(Category::Mail)
    } else if entity_id.starts_with("calendar.") {
        Some(Category::Calendar)
    } else if entity_id.starts_with("todo.") {
        Some(Category::Todo)
    } else if entity_id.starts_with("weather.") {
        Some(Category::Weather)
    } else if entity_id.starts_with("binary_sensor.")
        && ["door", "motion", "doorbell"]
            .iter()
            .any(|needle| entity_id.contains(needle))
    {
        Some(Category::Sensor)
    } else if entity_id.starts_with("switch.") || entity_id.starts_with("light.") {
        Some(Category::Control)
    } else {
        None
    }
}

/// True when both old and new state are present and carry the same value
pub fn is_noop_state_change(data: &Value) -> bool {
    let old = data.pointer("/old_state/state");
    let new = data.pointer("/new_state/state");
    matches!((old, new), (Some(old), Some(new)) if old == new)
}

/// Category to forward the event under, or `None` to drop it
pub fn classify(envelope: &EventEnvelope) -> Option<Category> {
    let event_type = envelope.event_type.as_str();

    if NOTIFICATION_EVENTS.contains(&event_type) {
        return Some(Category::Notification);
    }
    if CALENDAR_EVENTS.contains(&event_type) {
        return Some(Category::Calendar);
    }

    match event_type {
        STATE_CHANGED => {
            if is_noop_state_change(&envelope.data) {
                return None;
            }
            categorize_entity(&envelope.entity_id)
        }
        // calendar service calls would loop back as a re-query from the dashboard
        CALL_SERVICE => {
            let domain = envelope.data.get("domain").and_then(Value::as_str);
            (domain == Some(NOTIFICATION_DOMAIN)).then_some(Category::Notification)
        }
        _ => None,
    }
}
