//! Discovery descriptors advertising each capability to the platform.
//!
//! One retained message per capability under
//! `<discovery_prefix>/<component>/<device_id>/<object_id>/config`.

use serde_json::{json, Map, Value};

use super::topics::Topics;
use crate::config::MqttConfig;

/// A descriptor and the topic it is published on
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: Value,
}

struct Capability {
    component: &'static str,
    object_id: &'static str,
    name: &'static str,
    fields: Value,
}

fn capabilities(topics: &Topics) -> Vec<Capability> {
    vec![
        Capability {
            component: "switch",
            object_id: "screen",
            name: "Screen",
            fields: json!({
                "command_topic": topics.screen_set,
                "state_topic": topics.state,
                "value_template": "{{ 'OFF' if value_json.screensaver_active else 'ON' }}",
                "payload_on": "ON",
                "payload_off": "OFF",
                "icon": "mdi:monitor",
            }),
        },
        Capability {
            component: "sensor",
            object_id: "state",
            name: "State",
            fields: json!({
                "state_topic": topics.state,
                "value_template": "{{ value_json.state }}",
                "json_attributes_topic": topics.state,
                "icon": "mdi:tablet-dashboard",
            }),
        },
        Capability {
            component: "sensor",
            object_id: "current_tab",
            name: "Current Tab",
            fields: json!({
                "state_topic": topics.state,
                "value_template": "{{ value_json.current_tab }}",
                "icon": "mdi:tab",
            }),
        },
        Capability {
            component: "number",
            object_id: "volume",
            name: "Volume",
            fields: json!({
                "command_topic": topics.volume_set,
                "state_topic": topics.state,
                "value_template": "{{ value_json.volume }}",
                "min": 0,
                "max": 100,
                "step": 1,
                "icon": "mdi:volume-high",
            }),
        },
        Capability {
            component: "binary_sensor",
            object_id: "camera_active",
            name: "Camera Active",
            fields: json!({
                "state_topic": topics.state,
                "value_template": "{{ 'ON' if value_json.camera_active else 'OFF' }}",
                "payload_on": "ON",
                "payload_off": "OFF",
                "icon": "mdi:cctv",
            }),
        },
        Capability {
            component: "camera",
            object_id: "screenshot",
            name: "Screenshot",
            fields: json!({
                "topic": topics.screenshot,
            }),
        },
        Capability {
            component: "button",
            object_id: "take_screenshot",
            name: "Take Screenshot",
            fields: json!({
                "command_topic": topics.screenshot_take,
                "payload_press": "PRESS",
                "icon": "mdi:camera",
            }),
        },
    ]
}

/// Build every discovery descriptor for this device
pub fn discovery_messages(config: &MqttConfig, topics: &Topics) -> Vec<DiscoveryMessage> {
    let device = json!({
        "identifiers": [config.device_id],
        "name": config.device_name,
        "manufacturer": "Dashbridge",
        "model": "Wall Dashboard",
        "sw_version": env!("CARGO_PKG_VERSION"),
    });

    capabilities(topics)
        .into_iter()
        .map(|cap| {
            let mut payload = Map::new();
            payload.insert("name".into(), json!(cap.name));
            payload.insert(
                "unique_id".into(),
                json!(format!("{}_{}", config.device_id, cap.object_id)),
            );
            payload.insert("availability_topic".into(), json!(topics.availability));
            payload.insert("payload_available".into(), json!("online"));
            payload.insert("payload_not_available".into(), json!("offline"));
            payload.insert("device".into(), device.clone());
            if let Value::Object(fields) = cap.fields {
                payload.extend(fields);
            }

            DiscoveryMessage {
                topic: format!(
                    "{}/{}/{}/{}/config",
                    config.discovery_prefix, cap.component, config.device_id, cap.object_id
                ),
                payload: Value::Object(payload),
            }
        })
        .collect()
}
