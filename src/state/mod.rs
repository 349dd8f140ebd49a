//! Shared Dashboard State
//!
//! Process-wide state owned by the bridge and handed to every component:
//!
//! - **StateStore**: the dashboard record published over MQTT
//! - **ScreenshotStore**: the most recent screenshot pushed by a browser
//!
//! Each store guards its data with a single lock. Neither lock is held while
//! the other is acquired, and neither is held across an `.await`.

mod dashboard;
mod screenshot;

pub use dashboard::{clamp_volume, DashboardState, DisplayStatus, StatePatch, StateStore};
pub use screenshot::{ScreenshotRecord, ScreenshotStore};
