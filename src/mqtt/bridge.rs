//! MQTT Bridge
//!
//! Owns the broker session. The event loop runs in its own task; inbound
//! publishes are handed to a dedicated dispatch task over a channel so topic
//! order is preserved and a slow command never stalls keepalives.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::discovery::discovery_messages;
use super::topics::{translate_message, Topics};
use super::StatePublisher;
use crate::command::CommandRouter;
use crate::config::MqttConfig;
use crate::state::{DashboardState, StateStore};

const AVAILABLE: &str = "online";
const UNAVAILABLE: &str = "offline";

/// Screenshots are far larger than rumqttc's 10 KiB default
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

const REQUEST_CAPACITY: usize = 100;
const INBOUND_CAPACITY: usize = 256;
const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cloneable publishing side of the bridge
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    config: Arc<MqttConfig>,
    topics: Arc<Topics>,
    connected: Arc<AtomicBool>,
    /// Bumped on every ConnAck and every connection error
    epoch: Arc<AtomicU64>,
}

impl MqttHandle {
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Subscribe, announce availability, publish discovery and state.
    ///
    /// The handle only reports connected once this has finished on the
    /// session identified by `epoch`. Updates applied while the sequence ran
    /// were not published, so the state is sent again if it moved.
    async fn on_connect(&self, store: &StateStore, epoch: u64) -> Result<(), MqttError> {
        for topic in self.topics.subscriptions() {
            self.client.subscribe(topic, QoS::AtLeastOnce).await?;
            debug!(topic = %topic, "Subscribed to MQTT topic");
        }

        self.client
            .publish(&self.topics.availability, QoS::AtLeastOnce, true, AVAILABLE)
            .await?;

        let descriptors = discovery_messages(&self.config, &self.topics);
        let count = descriptors.len();
        for message in descriptors {
            let payload = serde_json::to_vec(&message.payload)?;
            self.client
                .publish(message.topic, QoS::AtLeastOnce, true, payload)
                .await?;
        }

        let sent = store.snapshot();
        self.send_state(&sent).await?;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Ok(());
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            device_id = %self.config.device_id,
            discovery = count,
            "MQTT bridge online"
        );

        let latest = store.snapshot();
        if state_moved(&sent, &latest) {
            debug!("State changed during on-connect, republishing");
            self.send_state(&latest).await?;
        }
        Ok(())
    }

    async fn send_state(&self, state: &DashboardState) -> Result<(), MqttError> {
        let payload = serde_json::to_vec(state)?;
        self.client
            .publish(&self.topics.state, QoS::AtMostOnce, true, payload)
            .await?;
        Ok(())
    }

    /// Announce offline and close the session
    async fn go_offline(&self) -> Result<(), MqttError> {
        self.connected.store(false, Ordering::SeqCst);
        self.client
            .publish(&self.topics.availability, QoS::AtLeastOnce, true, UNAVAILABLE)
            .await?;
        self.client.disconnect().await?;
        Ok(())
    }

    fn mark_disconnected(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connected.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl StatePublisher for MqttHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_state(&self, state: &DashboardState) -> Result<bool, MqttError> {
        if !self.is_connected() {
            return Ok(false);
        }
        self.send_state(state).await?;
        Ok(true)
    }

    async fn publish_screenshot_bytes(&self, image: &[u8]) -> Result<bool, MqttError> {
        if !self.is_connected() {
            return Ok(false);
        }
        self.client
            .publish(&self.topics.screenshot, QoS::AtMostOnce, true, image.to_vec())
            .await?;
        debug!(size = image.len(), "Published screenshot");
        Ok(true)
    }
}

/// Broker session driver
pub struct MqttBridge {
    handle: MqttHandle,
    eventloop: EventLoop,
    store: Arc<StateStore>,
    reconnect_delay: Duration,
}

impl MqttBridge {
    /// Create the session (nothing is sent until [`MqttBridge::run`] polls)
    pub fn new(config: &MqttConfig, store: Arc<StateStore>) -> (Self, MqttHandle) {
        let topics = Topics::from_config(config);

        let mut options = MqttOptions::new(config.client_id(), &config.broker, config.port);
        options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)))
            .set_clean_session(true)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
            .set_last_will(LastWill::new(
                &topics.availability,
                UNAVAILABLE,
                QoS::AtLeastOnce,
                true,
            ));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let handle = MqttHandle {
            client,
            config: Arc::new(config.clone()),
            topics: Arc::new(topics),
            connected: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
        };

        let bridge = Self {
            handle: handle.clone(),
            eventloop,
            store,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        };

        (bridge, handle)
    }

    /// Drive the session until `shutdown` is cancelled.
    ///
    /// Connection errors are logged and retried after a fixed delay; the
    /// rest of the process keeps running without MQTT in the meantime.
    pub async fn run(mut self, router: Arc<CommandRouter>, shutdown: CancellationToken) {
        info!(
            client_id = %self.handle.config.client_id(),
            broker = %self.handle.config.broker,
            port = self.handle.config.port,
            "Starting MQTT bridge"
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let dispatcher = tokio::spawn(dispatch_inbound(
            inbound_rx,
            Arc::clone(&self.handle.topics),
            router,
        ));

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,

                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "Connected to MQTT broker");
                        self.handle.mark_disconnected();
                        let epoch = self.handle.epoch.load(Ordering::SeqCst);
                        let handle = self.handle.clone();
                        let store = Arc::clone(&self.store);
                        tokio::spawn(async move {
                            if let Err(e) = handle.on_connect(&store, epoch).await {
                                error!(error = %e, "MQTT on-connect sequence failed");
                            }
                        });
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = (publish.topic.clone(), publish.payload.to_vec());
                        if inbound_tx.send(message).await.is_err() {
                            warn!("MQTT dispatcher stopped, dropping message");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker closed the MQTT session");
                        self.handle.mark_disconnected();
                    }
                    Ok(event) => {
                        tracing::trace!(?event, "MQTT event");
                    }
                    Err(e) => {
                        if self.handle.mark_disconnected() {
                            warn!(error = %e, "Disconnected from MQTT broker");
                        } else {
                            debug!(error = %e, "MQTT broker unreachable");
                        }
                        tokio::select! {
                            () = tokio::time::sleep(self.reconnect_delay) => {}
                            () = shutdown.cancelled() => break,
                        }
                    }
                },
            }
        }

        self.shutdown().await;
        drop(inbound_tx);
        let _ = dispatcher.await;
        info!("MQTT bridge stopped");
    }

    async fn shutdown(&mut self) {
        if !self.handle.is_connected() {
            return;
        }

        if let Err(e) = self.handle.go_offline().await {
            warn!(error = %e, "Failed to queue offline notice");
            return;
        }

        // Keep polling so the offline notice and DISCONNECT reach the broker
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out flushing MQTT disconnect");
        }
    }
}

/// Whether anything but the derived uptime differs
fn state_moved(sent: &DashboardState, latest: &DashboardState) -> bool {
    DashboardState {
        uptime_seconds: sent.uptime_seconds,
        ..latest.clone()
    } != *sent
}

async fn dispatch_inbound(
    mut inbound: mpsc::Receiver<(String, Vec<u8>)>,
    topics: Arc<Topics>,
    router: Arc<CommandRouter>,
) {
    while let Some((topic, payload)) = inbound.recv().await {
        let command = match translate_message(&topics, &topic, &payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropped MQTT message");
                continue;
            }
        };

        if let Err(e) = router.dispatch(&command).await {
            warn!(topic = %topic, error = %e, "Dropped MQTT command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::RecordingPublisher;
    use crate::brightness::NoBacklight;
    use crate::mqtt::discovery_messages;
    use crate::mqtt::testing::{Control, FakeBroker, Retained, Seen};
    use crate::screenshot::ScreenshotPipeline;
    use crate::state::{ScreenshotStore, StatePatch};
    use crate::websocket::ConnectionHub;
    use serde_json::{json, Value};

    fn bridge() -> (MqttBridge, MqttHandle) {
        let config = MqttConfig {
            enabled: true,
            broker: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        MqttBridge::new(&config, Arc::new(StateStore::new()))
    }

    fn broker_config(port: u16) -> MqttConfig {
        MqttConfig {
            enabled: true,
            broker: "127.0.0.1".to_string(),
            port,
            reconnect_delay_secs: 1,
            ..Default::default()
        }
    }

    fn router(
        store: &Arc<StateStore>,
        hub: &Arc<ConnectionHub>,
        publisher: Option<Arc<dyn StatePublisher>>,
    ) -> Arc<CommandRouter> {
        let pipeline = Arc::new(ScreenshotPipeline::new(
            Arc::clone(hub),
            Arc::new(ScreenshotStore::new()),
            publisher.clone(),
        ));
        Arc::new(CommandRouter::new(
            Arc::clone(store),
            Arc::clone(hub),
            pipeline,
            publisher,
            Arc::new(NoBacklight),
            10,
        ))
    }

    async fn wait_connected(handle: &MqttHandle) {
        for _ in 0..250 {
            if handle.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("bridge never reported connected");
    }

    fn retained(topic: &str, payload: &[u8]) -> Seen {
        Seen::Publish(Retained {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain: true,
        })
    }

    /// Connect, four subscriptions, online, seven descriptors, then state
    fn assert_on_connect_sequence(seen: &[Seen], config: &MqttConfig, topics: &Topics) -> DashboardState {
        assert_eq!(seen.len(), 14, "unexpected sequence {:?}", seen);

        let Seen::Connect { client_id, will } = &seen[0] else {
            panic!("expected CONNECT first, got {:?}", seen[0]);
        };
        assert_eq!(client_id, &config.client_id());
        assert_eq!(
            will.as_ref(),
            Some(&Retained {
                topic: topics.availability.clone(),
                payload: b"offline".to_vec(),
                retain: true,
            })
        );

        let subscribed: Vec<Seen> = topics
            .subscriptions()
            .iter()
            .map(|t| Seen::Subscribe(t.to_string()))
            .collect();
        assert_eq!(&seen[1..5], subscribed.as_slice());

        assert_eq!(seen[5], retained(&topics.availability, b"online"));

        let descriptors: Vec<Seen> = discovery_messages(config, topics)
            .into_iter()
            .map(|m| retained(&m.topic, &serde_json::to_vec(&m.payload).unwrap()))
            .collect();
        assert_eq!(&seen[6..13], descriptors.as_slice());

        let Seen::Publish(state) = &seen[13] else {
            panic!("expected state last, got {:?}", seen[13]);
        };
        assert_eq!(state.topic, topics.state);
        assert!(state.retain);
        serde_json::from_slice(&state.payload).unwrap()
    }

    #[tokio::test]
    async fn test_handle_starts_disconnected() {
        let (_bridge, handle) = bridge();
        assert!(!handle.is_connected());
        assert_eq!(handle.topics().state, "skylight/skylight_living/state");
    }

    #[tokio::test]
    async fn test_publishing_is_noop_while_disconnected() {
        let (_bridge, handle) = bridge();
        let state = StateStore::new().snapshot();

        assert!(!handle.publish_state(&state).await.unwrap());
        assert!(!handle.publish_screenshot_bytes(&[1, 2, 3]).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_disconnected_reports_previous_state() {
        let (_bridge, handle) = bridge();
        assert!(!handle.mark_disconnected());

        handle.connected.store(true, Ordering::SeqCst);
        assert!(handle.mark_disconnected());
        assert!(!handle.is_connected());
        assert_eq!(handle.epoch.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inbound_set_topics_dispatch_in_order() {
        let store = Arc::new(StateStore::new());
        let hub = Arc::new(ConnectionHub::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let router = router(&store, &hub, Some(Arc::clone(&publisher) as Arc<dyn StatePublisher>));
        let topics = Arc::new(Topics::new("skylight", "kitchen"));

        let (client_tx, mut client_rx) = hub.client_channel();
        hub.register(client_tx).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(dispatch_inbound(rx, Arc::clone(&topics), router));
        tx.send((topics.volume_set.clone(), b"55".to_vec())).await.unwrap();
        tx.send((topics.screen_set.clone(), b"OFF".to_vec())).await.unwrap();
        tx.send(("skylight/kitchen/unknown".to_string(), b"1".to_vec())).await.unwrap();
        tx.send((topics.volume_set.clone(), b"loud".to_vec())).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.volume, 55);
        assert!(state.screensaver_active);

        let frames: Vec<Value> = std::iter::from_fn(|| client_rx.try_recv().ok())
            .map(|text| serde_json::from_str(&text).unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                json!({"command": "volume", "value": 55}),
                json!({"command": "screensaver", "enabled": true}),
            ]
        );

        let published = publisher.states();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].volume, 55);
        assert!(!published[0].screensaver_active);
        assert!(published[1].screensaver_active);
    }

    #[tokio::test]
    async fn test_on_connect_sequence_repeats_on_every_connack() {
        let mut broker = FakeBroker::start().await;
        let config = broker_config(broker.port());
        let store = Arc::new(StateStore::new());
        let hub = Arc::new(ConnectionHub::default());
        let (bridge, handle) = MqttBridge::new(&config, Arc::clone(&store));
        let topics = handle.topics().clone();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bridge.run(router(&store, &hub, None), shutdown.clone()));

        let first = broker.next_connection().await;
        let seen = broker.seen_until_publish(&topics.state).await;
        let state = assert_on_connect_sequence(&seen, &config, &topics);
        assert_eq!(state.volume, 50);
        wait_connected(&handle).await;
        // let the acks for the first session settle before dropping it
        tokio::time::sleep(Duration::from_millis(200)).await;

        first.send(Control::Drop).unwrap();
        for _ in 0..250 {
            if !handle.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!handle.is_connected());

        // applied while offline; the reconnect publishes the current state
        store.apply(&StatePatch {
            volume: Some(80),
            ..Default::default()
        });

        let second = broker.next_connection().await;
        let seen = broker.seen_until_publish(&topics.state).await;
        let state = assert_on_connect_sequence(&seen, &config, &topics);
        assert_eq!(state.volume, 80);
        wait_connected(&handle).await;

        // inbound set-topic reaches the store through the dispatcher
        second
            .send(Control::Publish {
                topic: topics.volume_set.clone(),
                payload: b"30".to_vec(),
            })
            .unwrap();
        for _ in 0..250 {
            if store.snapshot().volume == 30 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.snapshot().volume, 30);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("bridge did not stop")
            .unwrap();

        // offline notice then DISCONNECT on the way out
        let seen = broker.seen_until_publish(&topics.availability).await;
        assert_eq!(seen.last(), Some(&retained(&topics.availability, b"offline")));
        let disconnect = tokio::time::timeout(Duration::from_secs(5), broker.seen.recv())
            .await
            .unwrap();
        assert_eq!(disconnect, Some(Seen::Disconnect));
    }

    #[test]
    fn test_state_moved_ignores_uptime() {
        let store = StateStore::new();
        let sent = store.snapshot();

        let mut later = sent.clone();
        later.uptime_seconds += 30;
        assert!(!state_moved(&sent, &later));

        later.current_tab = "calendar".to_string();
        assert!(state_moved(&sent, &later));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_with_unreachable_broker() {
        let (bridge, _handle) = bridge();
        let store = Arc::new(StateStore::new());
        let hub = Arc::new(ConnectionHub::default());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bridge.run(router(&store, &hub, None), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("bridge did not stop")
            .unwrap();
    }
}
