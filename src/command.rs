//! Command Router
//!
//! Maps a command object such as `{"command":"volume","value":55}` to its
//! effects. [`route`] is the pure table; [`CommandRouter`] carries the
//! effects out against the state store, the hub and the MQTT publisher.
//!
//! | command       | local effect | state change        | forwarded | republish |
//! |---------------|--------------|---------------------|-----------|-----------|
//! | `brightness`  | backlight    |                     | no        | no        |
//! | `wake`        |              | screensaver off     | yes       | yes       |
//! | `screensaver` |              | screensaver `enabled` (default on) | yes | yes |
//! | `navigate`    |              | current tab `tab`   | yes       | yes       |
//! | `volume`      |              | volume `value`      | yes       | yes       |
//! | `screenshot`  | capture      |                     | no        | no        |
//! | anything else |              |                     | yes       | no        |

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::brightness::{clamp_brightness, BrightnessControl};
use crate::mqtt::StatePublisher;
use crate::screenshot::ScreenshotPipeline;
use crate::state::{StatePatch, StateStore};
use crate::websocket::ConnectionHub;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command payload is not a JSON object")]
    NotAnObject,

    #[error("Command payload has no \"command\" name")]
    MissingName,
}

/// Side effect performed on this machine rather than in a browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEffect {
    /// Set the backlight to this percentage
    Brightness(u8),
    /// Ask connected browsers for a screenshot
    Capture,
}

/// Everything a command does
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub local: Option<LocalEffect>,
    pub patch: Option<StatePatch>,
    /// Relay the original payload to every dashboard
    pub forward: bool,
    /// Publish the dashboard state to MQTT afterwards
    pub republish: bool,
}

/// Read an integer that may arrive as a number, a float or a numeric string
pub fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Decide what a command does. Pure; no I/O.
pub fn route(command: &Value, min_brightness: u8) -> Result<Route, CommandError> {
    let object = command.as_object().ok_or(CommandError::NotAnObject)?;
    let name = object
        .get("command")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingName)?;

    let synced = |patch: StatePatch| Route {
        local: None,
        patch: Some(patch),
        forward: true,
        republish: true,
    };

    let route = match name {
        "brightness" => Route {
            local: object
                .get("value")
                .and_then(json_integer)
                .map(|v| LocalEffect::Brightness(clamp_brightness(v, min_brightness))),
            ..Default::default()
        },
        "wake" => synced(StatePatch {
            screensaver_active: Some(false),
            ..Default::default()
        }),
        "screensaver" => synced(StatePatch {
            screensaver_active: Some(
                object.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            ),
            ..Default::default()
        }),
        "navigate" => synced(StatePatch {
            current_tab: object.get("tab").and_then(Value::as_str).map(str::to_string),
            ..Default::default()
        }),
        "volume" => synced(StatePatch {
            volume: object.get("value").and_then(json_integer),
            ..Default::default()
        }),
        "screenshot" => Route {
            local: Some(LocalEffect::Capture),
            ..Default::default()
        },
        _ => Route {
            forward: true,
            ..Default::default()
        },
    };

    Ok(route)
}

/// Executes routed commands
pub struct CommandRouter {
    store: Arc<StateStore>,
    hub: Arc<ConnectionHub>,
    pipeline: Arc<ScreenshotPipeline>,
    publisher: Option<Arc<dyn StatePublisher>>,
    brightness: Arc<dyn BrightnessControl>,
    min_brightness: u8,
}

impl CommandRouter {
    pub fn new(
        store: Arc<StateStore>,
        hub: Arc<ConnectionHub>,
        pipeline: Arc<ScreenshotPipeline>,
        publisher: Option<Arc<dyn StatePublisher>>,
        brightness: Arc<dyn BrightnessControl>,
        min_brightness: u8,
    ) -> Self {
        Self {
            store,
            hub,
            pipeline,
            publisher,
            brightness,
            min_brightness,
        }
    }

    /// Route and execute one command
    pub async fn dispatch(&self, command: &Value) -> Result<Route, CommandError> {
        let route = route(command, self.min_brightness)?;
        tracing::debug!(%command, ?route, "Dispatching command");

        match route.local {
            Some(LocalEffect::Brightness(percent)) => {
                if let Err(e) = self.brightness.set_percent(percent).await {
                    tracing::warn!(error = %e, percent, "Brightness change failed");
                }
            }
            Some(LocalEffect::Capture) => {
                self.pipeline.request_capture().await;
            }
            None => {}
        }

        if let Some(patch) = &route.patch {
            self.store.apply(patch);
        }

        if route.forward {
            self.hub.broadcast(&command.to_string()).await;
        }

        if route.republish {
            if let Some(publisher) = &self.publisher {
                let snapshot = self.store.snapshot();
                if let Err(e) = publisher.publish_state(&snapshot).await {
                    tracing::warn!(error = %e, "Failed to publish dashboard state");
                }
            }
        }

        Ok(route)
    }
}
