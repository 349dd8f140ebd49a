//! MQTT Integration
//!
//! Represents the dashboard to the home-automation platform through an MQTT
//! broker.
//!
//! ```text
//! mqtt/
//! ├── topics.rs     - Topic namespace and set-topic translation
//! ├── discovery.rs  - Discovery descriptors for each exposed capability
//! └── bridge.rs     - Connection loop, on-connect sequence, publishing
//! ```
//!
//! Topic structure under `<root>/<device_id>/`:
//! - `availability` - retained `online`/`offline` (also the last will)
//! - `state` - retained JSON dashboard state
//! - `command` - free-form JSON commands
//! - `screen/set`, `volume/set`, `screenshot/take` - per-capability setters
//! - `screenshot` - retained binary image

mod bridge;
mod discovery;
mod topics;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{MqttBridge, MqttError, MqttHandle};
pub use discovery::{discovery_messages, DiscoveryMessage};
pub use topics::{translate_message, MessageError, Topics};

use async_trait::async_trait;

use crate::state::DashboardState;

/// Outbound side of the MQTT bridge, as seen by the rest of the system.
///
/// Every method is a no-op returning `Ok(false)` while the bridge is not
/// connected.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    /// Whether the on-connect sequence has completed on the live session
    fn is_connected(&self) -> bool;

    /// Publish the full dashboard state (retained)
    async fn publish_state(&self, state: &DashboardState) -> Result<bool, MqttError>;

    /// Publish a decoded screenshot (retained)
    async fn publish_screenshot_bytes(&self, image: &[u8]) -> Result<bool, MqttError>;
}
