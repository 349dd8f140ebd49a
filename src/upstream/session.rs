//! One authenticated socket to the controller.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::error::{UpstreamError, UpstreamResult};
use super::protocol::{self, ErrorBody, Inbound};
use crate::config::ControllerConfig;

type ControllerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A socket plus its correlation-id counter.
///
/// Ids start at 1 on every new session. Frames that arrive while a request
/// waits for its acknowledgement are kept in `pending` and handed out by
/// [`UpstreamSession::next_inbound`] before anything new is read.
pub struct UpstreamSession {
    stream: ControllerStream,
    next_id: u64,
    pending: VecDeque<Inbound>,
}

impl UpstreamSession {
    /// Open the socket. `wss://` URLs accept self-signed certificates.
    pub async fn connect(url: &str) -> UpstreamResult<Self> {
        let connector = if url.starts_with("wss://") {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (stream, _response) = connect_async_tls_with_config(url, None, true, connector).await?;
        debug!(url = %url, "Controller socket open");

        Ok(Self {
            stream,
            next_id: 0,
            pending: VecDeque::new(),
        })
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub async fn send(&mut self, frame: &Value) -> UpstreamResult<()> {
        trace!(frame = %frame, "-> controller");
        self.stream.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Read the next frame off the socket, ignoring control frames
    async fn recv(&mut self) -> UpstreamResult<Inbound> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(frame = %text, "<- controller");
                    return serde_json::from_str(&text)
                        .map_err(|e| UpstreamError::Protocol(format!("unparseable frame: {}", e)));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Controller sent close");
                    return Err(UpstreamError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(UpstreamError::Closed),
            }
        }
    }

    /// Next frame, draining anything buffered during a request first
    pub async fn next_inbound(&mut self) -> UpstreamResult<Inbound> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None => self.recv().await,
        }
    }

    /// Wait for the controller's opening `auth_required`
    pub async fn await_auth_challenge(&mut self, timeout: Duration) -> UpstreamResult<()> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Err(_) => Err(UpstreamError::AuthTimeout(timeout)),
            Ok(Ok(Inbound::AuthRequired)) => Ok(()),
            Ok(Ok(other)) => Err(UpstreamError::Protocol(format!(
                "expected auth_required, got {:?}",
                other
            ))),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Send the one auth message and wait for the verdict
    pub async fn authenticate(&mut self, token: &str, timeout: Duration) -> UpstreamResult<()> {
        self.send(&protocol::auth(token)).await?;

        match tokio::time::timeout(timeout, self.recv()).await {
            Err(_) => Err(UpstreamError::AuthTimeout(timeout)),
            Ok(Ok(Inbound::AuthOk)) => Ok(()),
            Ok(Ok(Inbound::AuthInvalid { message })) => Err(UpstreamError::AuthRejected(message)),
            Ok(Ok(other)) => Err(UpstreamError::Protocol(format!(
                "expected auth_ok, got {:?}",
                other
            ))),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Send a frame built around a fresh id and wait for its `result`.
    ///
    /// Returns the id together with the result payload. A negative
    /// acknowledgement becomes [`UpstreamError::RequestFailed`].
    pub async fn request<F>(&mut self, build: F, timeout: Duration) -> UpstreamResult<(u64, Value)>
    where
        F: FnOnce(u64) -> Value,
    {
        let id = self.next_id();
        self.send(&build(id)).await?;

        let ack = tokio::time::timeout(timeout, async {
            loop {
                match self.recv().await? {
                    Inbound::Result {
                        id: acked,
                        success,
                        result,
                        error,
                    } if acked == id => return Ok::<_, UpstreamError>((success, result, error)),
                    other => self.pending.push_back(other),
                }
            }
        })
        .await
        .map_err(|_| UpstreamError::RequestTimeout { id })??;

        match ack {
            (true, result, _) => Ok((id, result)),
            (false, _, error) => Err(UpstreamError::RequestFailed {
                id,
                message: ErrorBody::describe(&error),
            }),
        }
    }

    /// Send a close frame; errors are irrelevant at this point
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Close frame not delivered");
        }
    }
}

/// Open a session with the full handshake already done
pub async fn open_session(config: &ControllerConfig) -> UpstreamResult<UpstreamSession> {
    let url = config.websocket_url();
    let mut session = tokio::time::timeout(config.request_timeout(), UpstreamSession::connect(&url))
        .await
        .map_err(|_| UpstreamError::ConnectTimeout(config.request_timeout()))??;
    session.await_auth_challenge(config.auth_timeout()).await?;
    session.authenticate(&config.token, config.auth_timeout()).await?;
    Ok(session)
}

/// One-off round trip returning the controller's persistent notifications
pub async fn fetch_notifications(config: &ControllerConfig) -> UpstreamResult<Value> {
    let mut session = open_session(config).await?;
    let outcome = session
        .request(
            |id| protocol::command(id, "persistent_notification/get"),
            config.request_timeout(),
        )
        .await;
    session.close().await;

    let (_, result) = outcome?;
    Ok(result)
}
