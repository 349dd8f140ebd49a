//! Upstream connection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Connection closed by controller")]
    Closed,

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("No auth challenge or reply within {0:?}")]
    AuthTimeout(std::time::Duration),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Request {id} timed out")]
    RequestTimeout { id: u64 },

    #[error("Request {id} failed: {message}")]
    RequestFailed { id: u64, message: String },

    #[error("Subscription to {event_type} failed: {message}")]
    SubscriptionFailed { event_type: String, message: String },

    #[error("Liveness ping {id} went unanswered")]
    HeartbeatTimeout { id: u64 },
}

impl UpstreamError {
    /// Socket, TLS and close errors; everything else is a peer misbehaving
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Connect(_)
                | UpstreamError::Tls(_)
                | UpstreamError::Closed
                | UpstreamError::ConnectTimeout(_)
        )
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
