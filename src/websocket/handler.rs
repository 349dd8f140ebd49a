//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests from dashboards and runs the
//! per-connection receive loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::messages::{ClientMessage, ServerMessage};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// The client is only registered with the hub once the upgrade completes.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = state.hub.client_channel();

    let connection_id = match state.hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected dashboard connection");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Drain this client's queue onto the socket, in order
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                tracing::debug!(
                    connection_id = %conn_id_for_send,
                    "WebSocket send failed, closing connection"
                );
                break;
            }
        }
    });

    let state_for_recv = Arc::clone(&state);
    let conn_id_for_recv = connection_id.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&state_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    state.hub.unregister(&connection_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(state: &AppState, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            handle_client_text(state, connection_id, &text).await;
            true
        }
        Message::Binary(_) => {
            tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

/// Parse and act on one text frame. Malformed frames are logged and dropped.
pub async fn handle_client_text(state: &AppState, connection_id: &str, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Invalid client message"
            );
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            if let Err(e) = state.hub.send_to(connection_id, &ServerMessage::pong()).await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Pong not delivered");
            }
        }
        ClientMessage::StateUpdate { state: patch } => {
            let snapshot = state.store.apply(&patch);
            if let Some(publisher) = &state.publisher {
                if let Err(e) = publisher.publish_state(&snapshot).await {
                    tracing::warn!(error = %e, "Failed to publish dashboard state");
                }
            }
        }
        ClientMessage::ScreenshotData { image } => {
            if let Err(e) = state.pipeline.store_and_publish(&image).await {
                tracing::warn!(connection_id = %connection_id, error = %e, "Discarded screenshot");
            }
        }
    }
}
