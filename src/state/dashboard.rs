//! Dashboard state record and its store.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Whether the display is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Online,
    Offline,
}

/// Snapshot of the dashboard as published to the broker.
///
/// `uptime_seconds` is derived at read time from the store's start instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardState {
    pub state: DisplayStatus,
    pub screensaver_active: bool,
    pub camera_active: bool,
    pub current_tab: String,
    pub volume: u8,
    pub uptime_seconds: u64,
}

/// Partial update, as reported by a browser or produced by a command.
///
/// Unknown fields are ignored. Volume arrives as a plain integer and is
/// clamped into `0..=100` when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub state: Option<DisplayStatus>,
    #[serde(default)]
    pub screensaver_active: Option<bool>,
    #[serde(default)]
    pub camera_active: Option<bool>,
    #[serde(default)]
    pub current_tab: Option<String>,
    #[serde(default)]
    pub volume: Option<i64>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }
}

/// Clamp an arbitrary integer into the valid volume range
pub fn clamp_volume(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

#[derive(Debug, Clone)]
struct Fields {
    state: DisplayStatus,
    screensaver_active: bool,
    camera_active: bool,
    current_tab: String,
    volume: u8,
}

impl Default for Fields {
    fn default() -> Self {
        Self {
            state: DisplayStatus::Online,
            screensaver_active: false,
            camera_active: false,
            current_tab: "home".to_string(),
            volume: 50,
        }
    }
}

/// Single process-wide dashboard state
pub struct StateStore {
    fields: Mutex<Fields>,
    started: Instant,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            fields: Mutex::new(Fields::default()),
            started: Instant::now(),
        }
    }

    /// Seconds since the store was created
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Current state with a freshly computed uptime
    pub fn snapshot(&self) -> DashboardState {
        let fields = self.fields.lock().clone();
        self.render(fields)
    }

    /// Apply a partial update and return the resulting state
    pub fn apply(&self, patch: &StatePatch) -> DashboardState {
        let fields = {
            let mut fields = self.fields.lock();
            if let Some(state) = patch.state {
                fields.state = state;
            }
            if let Some(active) = patch.screensaver_active {
                fields.screensaver_active = active;
            }
            if let Some(active) = patch.camera_active {
                fields.camera_active = active;
            }
            if let Some(tab) = &patch.current_tab {
                fields.current_tab = tab.clone();
            }
            if let Some(volume) = patch.volume {
                fields.volume = clamp_volume(volume);
            }
            fields.clone()
        };

        tracing::debug!(?patch, "Dashboard state updated");
        self.render(fields)
    }

    fn render(&self, fields: Fields) -> DashboardState {
        DashboardState {
            state: fields.state,
            screensaver_active: fields.screensaver_active,
            camera_active: fields.camera_active,
            current_tab: fields.current_tab,
            volume: fields.volume,
            uptime_seconds: self.uptime_seconds(),
        }
    }
}
