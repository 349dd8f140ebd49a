//! Downstream WebSocket Bridge
//!
//! Serves browser dashboards over WebSocket.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Tracks connected clients and fans out messages
//! - **Handler**: Handles WebSocket upgrade and the per-client receive loop
//! - **Messages**: Defines client and server message formats
//!
//! ## Protocol
//!
//! Browsers connect to the downstream port and exchange JSON text frames:
//! - `{"type":"ping"}` → `{"type":"pong","version":"0.1.0"}`
//! - `{"type":"state_update","state":{...}}` updates the dashboard state
//! - `{"type":"screenshot_data","image":"data:image/png;base64,..."}`
//!
//! The bridge pushes `screenshot_request`, `controller_event` frames and any
//! command received over MQTT.
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8766/ws');
//!
//! ws.onopen = () => ws.send(JSON.stringify({type: 'ping'}));
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.command === 'navigate') showTab(msg.tab);
//! };
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::{handle_client_text, websocket_handler};
pub use hub::{BroadcastReport, ClientSender, ConnectionHub, ConnectionId, HubConfig, HubError};
pub use messages::{ClientMessage, ServerMessage};
