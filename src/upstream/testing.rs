//! In-process controller speaking the real-time protocol over plain `ws://`.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ControllerConfig;

/// What a connected bridge sent
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Auth(String),
    Subscribe { id: u64, event_type: String },
    Ping { id: u64 },
}

/// Instructions for one accepted connection
#[derive(Debug)]
pub enum Control {
    Event(Value),
    /// Record pings from now on but never answer them
    IgnorePings,
    /// Drop the socket without a close frame
    Drop,
}

pub struct FakeController {
    url: String,
    pub seen: mpsc::UnboundedReceiver<Seen>,
    connections: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Control>>,
}

impl FakeController {
    /// Start listening; subscriptions to `failing` event types are refused
    pub async fn start(failing: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let failing: Vec<String> = failing.iter().map(|s| s.to_string()).collect();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                if conn_tx.send(control_tx).is_err() {
                    return;
                }
                tokio::spawn(serve(ws, control_rx, seen_tx.clone(), failing.clone()));
            }
        });

        Self {
            url,
            seen,
            connections,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Control channel of the next accepted connection
    pub async fn next_connection(&mut self) -> mpsc::UnboundedSender<Control> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.connections.recv())
            .await
            .expect("no connection within 5s")
            .expect("listener stopped")
    }

    /// Everything recorded so far
    pub fn drain_seen(&mut self) -> Vec<Seen> {
        let mut out = Vec::new();
        while let Ok(seen) = self.seen.try_recv() {
            out.push(seen);
        }
        out
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut control: mpsc::UnboundedReceiver<Control>,
    seen: mpsc::UnboundedSender<Seen>,
    failing: Vec<String>,
) {
    let (mut tx, mut rx) = ws.split();
    let send = |v: Value| Message::Text(v.to_string());
    let mut answer_pings = true;

    if tx.send(send(json!({"type": "auth_required"}))).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = rx.next() => {
                let Some(Ok(Message::Text(text))) = frame else { return };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                let id = frame["id"].as_u64().unwrap_or_default();

                let reply = match frame["type"].as_str().unwrap_or_default() {
                    "auth" => {
                        let token = frame["access_token"].as_str().unwrap_or_default().to_string();
                        let ok = token != "bad";
                        let _ = seen.send(Seen::Auth(token));
                        if ok {
                            json!({"type": "auth_ok"})
                        } else {
                            json!({"type": "auth_invalid", "message": "Invalid access token"})
                        }
                    }
                    "subscribe_events" => {
                        let event_type = frame["event_type"].as_str().unwrap_or_default().to_string();
                        let refused = failing.contains(&event_type);
                        let _ = seen.send(Seen::Subscribe { id, event_type });
                        if refused {
                            json!({"id": id, "type": "result", "success": false,
                                   "error": {"code": "not_found", "message": "Unknown event type"}})
                        } else {
                            json!({"id": id, "type": "result", "success": true, "result": null})
                        }
                    }
                    "persistent_notification/get" => json!({
                        "id": id, "type": "result", "success": true,
                        "result": [{"notification_id": "backup_failed", "title": "Backup", "message": "Failed"}]
                    }),
                    "ping" => {
                        let _ = seen.send(Seen::Ping { id });
                        if !answer_pings {
                            continue;
                        }
                        json!({"id": id, "type": "pong"})
                    }
                    _ => continue,
                };
                if tx.send(send(reply)).await.is_err() {
                    return;
                }
            }
            instruction = control.recv() => match instruction {
                Some(Control::Event(event)) => {
                    let frame = json!({"id": 1, "type": "event", "event": event});
                    if tx.send(send(frame)).await.is_err() {
                        return;
                    }
                }
                Some(Control::IgnorePings) => answer_pings = false,
                Some(Control::Drop) | None => return,
            }
        }
    }
}

pub fn controller_config(url: String) -> ControllerConfig {
    ControllerConfig {
        url,
        token: "test-token".to_string(),
        reconnect_delay_secs: 1,
        auth_timeout_secs: 2,
        request_timeout_secs: 2,
        ..ControllerConfig::default()
    }
}
