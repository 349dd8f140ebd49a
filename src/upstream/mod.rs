//! Upstream Controller Client
//!
//! Keeps an authenticated subscription to the home-automation controller's
//! real-time endpoint and forwards classified events to browser clients.
//!
//! ```text
//! upstream/
//! ├── protocol.rs    - Frame types and outbound builders
//! ├── session.rs     - One socket: handshake, correlated requests
//! ├── classifier.rs  - Forwarding rules and categories
//! └── subscriber.rs  - Reconnecting state machine
//! ```

mod classifier;
mod error;
mod protocol;
mod session;
mod subscriber;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{categorize_entity, classify, is_noop_state_change, Category, EventEnvelope};
pub use error::{UpstreamError, UpstreamResult};
pub use session::{fetch_notifications, open_session, UpstreamSession};
pub use subscriber::{
    EventClass, SubscribeOutcome, SubscriberState, Subscription, SubscriptionTable, UpstreamSubscriber,
    EVENT_CLASSES,
};
