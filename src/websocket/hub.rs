//! WebSocket Connection Hub
//!
//! Tracks connected dashboard clients and fans messages out to them.
//! Each client owns a bounded channel drained by its own socket task, so
//! any task on any thread can enqueue a broadcast without touching sockets.
//! A client whose queue is full is treated like one whose socket is gone.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::messages::ServerMessage;

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// Outbound queue of a single client
pub type ClientSender = mpsc::Sender<String>;

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Frames buffered per client before it counts as stalled
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            queue_capacity: 256,
        }
    }
}

/// Outcome of a single fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was queued for
    pub delivered: usize,
    /// Clients dropped because their queue was closed or full
    pub removed: usize,
}

/// Manages all downstream WebSocket connections
pub struct ConnectionHub {
    /// Active connections: ConnectionId → outbound queue
    connections: Arc<RwLock<HashMap<ConnectionId, ClientSender>>>,
    config: HubConfig,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl ConnectionHub {
    /// Create a new connection hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Outbound queue for a new client, sized by `queue_capacity`
    pub fn client_channel(&self) -> (ClientSender, mpsc::Receiver<String>) {
        mpsc::channel(self.config.queue_capacity.max(1))
    }

    /// Register a client whose handshake has completed
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(&self, sender: ClientSender) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(id.clone(), sender);

        tracing::info!(connection_id = %id, clients = connections.len(), "Dashboard client connected");
        Ok(id)
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub async fn unregister(&self, id: &str) {
        let removed = self.connections.write().await.remove(id);
        if removed.is_some() {
            tracing::info!(connection_id = %id, "Dashboard client disconnected");
        }
    }

    /// Queue a text frame for every tracked client.
    ///
    /// Iterates over a snapshot of the client set. Clients whose queue is
    /// closed or full are removed afterwards; the rest still receive the frame.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, ClientSender)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, sender)| (id.clone(), sender.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (id, sender) in snapshot {
            match sender.try_send(text.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, "Client queue full, dropping client");
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in &failed {
                if connections.remove(id).is_some() {
                    report.removed += 1;
                    tracing::debug!(connection_id = %id, "Dropped client after failed send");
                }
            }
        }

        tracing::trace!(
            delivered = report.delivered,
            removed = report.removed,
            "Broadcast message"
        );
        report
    }

    /// Serialize and broadcast a server message
    pub async fn broadcast_message(&self, message: &ServerMessage) -> BroadcastReport {
        match message.to_text() {
            Ok(text) => self.broadcast(&text).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                BroadcastReport::default()
            }
        }
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: &ServerMessage) -> Result<(), HubError> {
        let text = message
            .to_text()
            .map_err(|e| HubError::Serialization(e.to_string()))?;

        let sender = self
            .connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(HubError::ConnectionNotFound)?;

        if sender.try_send(text).is_err() {
            self.unregister(id).await;
            return Err(HubError::SendFailed);
        }
        Ok(())
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether a connection is still tracked
    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Failed to serialize message: {0}")]
    Serialization(String),
}
