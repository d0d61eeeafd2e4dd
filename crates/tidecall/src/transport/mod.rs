//! Signaling transport: a persistent, message-oriented text connection to
//! the coordinator.
//!
//! Inbound frames are delivered through an ordered event channel, one
//! receiver per connection; the negotiation engine consumes that stream and
//! holds the transport only by reference for sending.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod pair;
pub mod websocket;

/// Close code and reason used for graceful teardown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
pub const NORMAL_CLOSE_REASON: &str = "Normal Shutdown";

/// Close code used when the engine abandons a failed session.
pub const FAILURE_CLOSE_CODE: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

/// Events surfaced by a transport, in arrival order. `Closed` is terminal
/// and emitted exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound UTF-8 text frame.
    Frame(String),
    Closed {
        code: Option<u16>,
        reason: String,
        /// True when the connection ended with a close handshake rather
        /// than a transport error.
        graceful: bool,
    },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid signaling endpoint {endpoint}: {detail}")]
    InvalidEndpoint { endpoint: String, detail: String },
    #[error("secure endpoint requires an explicit trust policy")]
    TrustPolicyUnspecified,
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport is not open (status {status:?})")]
    NotOpen { status: ConnectionStatus },
    #[error("transport writer is gone")]
    ChannelClosed,
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Queue one UTF-8 text frame for delivery. Fails unless the
    /// connection is Open; a send never blocks past queueing.
    async fn send_text(&self, text: &str) -> Result<(), SendError>;

    /// Take the ordered inbound event stream. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    fn status(&self) -> ConnectionStatus;

    /// Idempotent shutdown: repeated calls are no-ops and the underlying
    /// resources are released even when the peer never answers the close.
    async fn close(&self, code: u16, reason: &str);
}
