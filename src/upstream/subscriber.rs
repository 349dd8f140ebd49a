//! Long-lived subscription to the controller's event stream.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::classifier::{classify, EventEnvelope, CALL_SERVICE, STATE_CHANGED};
use super::error::{UpstreamError, UpstreamResult};
use super::protocol::{self, Inbound};
use super::session::UpstreamSession;
use crate::config::ControllerConfig;
use crate::websocket::ConnectionHub;

/// Where the subscriber is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    AwaitingAuthChallenge,
    Authenticating,
    Subscribing,
    Listening,
}

/// An event type to subscribe to on every connection
#[derive(Debug, Clone, Copy)]
pub struct EventClass {
    pub event_type: &'static str,
    /// Optional classes may not exist on every controller
    pub required: bool,
}

pub const EVENT_CLASSES: &[EventClass] = &[
    EventClass { event_type: STATE_CHANGED, required: true },
    EventClass { event_type: CALL_SERVICE, required: true },
    EventClass { event_type: "persistent_notifications_updated", required: false },
    EventClass { event_type: "persistent_notifications_created", required: false },
    EventClass { event_type: "persistent_notifications_removed", required: false },
    EventClass { event_type: "calendar_event_created", required: false },
    EventClass { event_type: "calendar_event_updated", required: false },
    EventClass { event_type: "calendar_event_deleted", required: false },
];

/// An acknowledged subscription on the current connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: u64,
    pub event_type: String,
}

/// Outcome of subscribing to one class
#[derive(Debug)]
pub struct SubscribeOutcome {
    pub class: EventClass,
    pub result: UpstreamResult<Subscription>,
}

/// Live subscriptions, emptied whenever the connection drops
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    inner: Arc<Mutex<Vec<Subscription>>>,
}

impl SubscriptionTable {
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.inner.lock().clone()
    }

    fn replace(&self, subscriptions: Vec<Subscription>) {
        *self.inner.lock() = subscriptions;
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }
}

pub struct UpstreamSubscriber {
    config: Arc<ControllerConfig>,
    hub: Arc<ConnectionHub>,
    shutdown: CancellationToken,
    state: watch::Sender<SubscriberState>,
    subscriptions: SubscriptionTable,
}

impl UpstreamSubscriber {
    pub fn new(config: Arc<ControllerConfig>, hub: Arc<ConnectionHub>, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            config,
            hub,
            shutdown,
            state,
            subscriptions: SubscriptionTable::default(),
        }
    }

    /// Receiver tracking the lifecycle state
    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    pub fn subscriptions(&self) -> SubscriptionTable {
        self.subscriptions.clone()
    }

    fn set_state(&self, state: SubscriberState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Upstream state");
        }
    }

    /// Run until shutdown, reconnecting after a fixed delay on any failure
    pub async fn run(self) {
        let delay = self.config.reconnect_delay();
        info!(url = %self.config.websocket_url(), "Starting upstream subscriber");

        loop {
            match self.run_session().await {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, retry_in = ?delay, "Upstream connection lost")
                }
                Err(e) => warn!(error = %e, retry_in = ?delay, "Upstream session failed"),
            }

            self.subscriptions.clear();
            self.set_state(SubscriberState::Disconnected);

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        self.subscriptions.clear();
        self.set_state(SubscriberState::Disconnected);
        info!("Upstream subscriber stopped");
    }

    /// One connection from connect to teardown. `Ok` only on shutdown.
    async fn run_session(&self) -> UpstreamResult<()> {
        let mut session = tokio::select! {
            session = self.establish() => session?,
            () = self.shutdown.cancelled() => return Ok(()),
        };
        let outcome = self.listen(&mut session).await;
        if outcome.is_ok() {
            session.close().await;
        }
        outcome
    }

    async fn establish(&self) -> UpstreamResult<UpstreamSession> {
        let mut session = self.connect().await?;
        self.authenticate(&mut session).await?;

        self.set_state(SubscriberState::Subscribing);
        let mut live = Vec::new();
        for outcome in self.subscribe_events(&mut session).await? {
            match outcome.result {
                Ok(subscription) => live.push(subscription),
                Err(e) => debug!(event_type = outcome.class.event_type, error = %e, "Optional subscription skipped"),
            }
        }
        info!(subscriptions = live.len(), "Subscribed to controller events");
        self.subscriptions.replace(live);

        self.set_state(SubscriberState::Listening);
        Ok(session)
    }

    async fn connect(&self) -> UpstreamResult<UpstreamSession> {
        self.set_state(SubscriberState::Connecting);
        let url = self.config.websocket_url();
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, UpstreamSession::connect(&url))
            .await
            .map_err(|_| UpstreamError::ConnectTimeout(timeout))?
    }

    async fn authenticate(&self, session: &mut UpstreamSession) -> UpstreamResult<()> {
        self.set_state(SubscriberState::AwaitingAuthChallenge);
        session.await_auth_challenge(self.config.auth_timeout()).await?;

        self.set_state(SubscriberState::Authenticating);
        session.authenticate(&self.config.token, self.config.auth_timeout()).await?;
        debug!("Authenticated with controller");
        Ok(())
    }

    /// Subscribe to every class in order.
    ///
    /// Refusals of optional classes come back as failed outcomes; anything
    /// else aborts the connection attempt.
    async fn subscribe_events(&self, session: &mut UpstreamSession) -> UpstreamResult<Vec<SubscribeOutcome>> {
        let mut outcomes = Vec::with_capacity(EVENT_CLASSES.len());

        for class in EVENT_CLASSES {
            let result = session
                .request(
                    |id| protocol::subscribe_events(id, class.event_type),
                    self.config.request_timeout(),
                )
                .await
                .map(|(id, _)| Subscription {
                    id,
                    event_type: class.event_type.to_string(),
                })
                .map_err(|e| match e {
                    UpstreamError::RequestFailed { message, .. } => UpstreamError::SubscriptionFailed {
                        event_type: class.event_type.to_string(),
                        message,
                    },
                    other => other,
                });

            match result {
                Err(e @ UpstreamError::SubscriptionFailed { .. }) if !class.required => {
                    outcomes.push(SubscribeOutcome {
                        class: *class,
                        result: Err(e),
                    })
                }
                Err(e) => return Err(e),
                Ok(subscription) => outcomes.push(SubscribeOutcome {
                    class: *class,
                    result: Ok(subscription),
                }),
            }
        }

        Ok(outcomes)
    }

    /// Read frames until shutdown (`Ok`) or failure.
    ///
    /// After `idle_timeout` without a frame a ping goes out; no pong within
    /// `ping_timeout` ends the session.
    async fn listen(&self, session: &mut UpstreamSession) -> UpstreamResult<()> {
        let idle = self.config.idle_timeout();
        let mut awaiting_pong: Option<(u64, Instant)> = None;

        loop {
            let wait = match awaiting_pong {
                Some((_, deadline)) => deadline.saturating_duration_since(Instant::now()),
                None => idle,
            };

            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                frame = tokio::time::timeout(wait, session.next_inbound()) => match frame {
                    Err(_) => {
                        if let Some((id, _)) = awaiting_pong {
                            return Err(UpstreamError::HeartbeatTimeout { id });
                        }
                        let id = session.next_id();
                        trace!(id, "Controller idle, probing");
                        session.send(&protocol::ping(id)).await?;
                        awaiting_pong = Some((id, Instant::now() + self.config.ping_timeout()));
                    }
                    Ok(frame) => match frame? {
                        Inbound::Event { event, .. } => self.forward(&event).await,
                        Inbound::Pong { id } => {
                            if awaiting_pong.map(|(pending, _)| pending) == Some(id) {
                                awaiting_pong = None;
                            }
                        }
                        Inbound::Result { id, success: false, error, .. } => {
                            warn!(id, error = %protocol::ErrorBody::describe(&error), "Controller reported failure")
                        }
                        other => trace!(frame = ?other, "Ignoring frame"),
                    },
                },
            }
        }
    }

    async fn forward(&self, event: &Value) {
        let Some(envelope) = EventEnvelope::from_event(event) else {
            debug!("Event frame without event_type");
            return;
        };
        let Some(category) = classify(&envelope) else {
            trace!(event_type = %envelope.event_type, entity_id = %envelope.entity_id, "Event filtered");
            return;
        };

        let entity_id = envelope.entity_id.clone();
        let report = self.hub.broadcast_message(&envelope.into_message(category)).await;
        debug!(
            category = %category,
            entity_id = %entity_id,
            delivered = report.delivered,
            "Forwarded controller event"
        );
    }
}
