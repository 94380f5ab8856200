//! Bidirectional text transport for streaming sessions.
//!
//! A [`Connector`] performs the handshake for one session and hands back a
//! [`Connection`]: a sink for outbound frames and a stream of inbound frames.
//! The session client never touches a socket directly, so the same session
//! logic runs over a real WebSocket or an in-process peer.
//!
//! - [`WsConnector`]: WebSocket endpoint of the assistant backend
//! - [`LoopbackConnector`]: in-process peer, driven through a [`LoopbackAcceptor`]

mod loopback;
mod websocket;

pub use loopback::{LoopbackAcceptor, LoopbackConnector, LoopbackPeer};
pub use websocket::{StreamEndpoint, WsConnector};

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Sink;
use futures::stream::BoxStream;
use thiserror::Error;

/// Close code sent for an ordinary client-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Parameters of one streaming connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Thread the conversation belongs to.
    pub thread_id: String,
    /// Assistant answering on the thread.
    pub assistant_id: String,
    /// Bearer token of the logged-in user.
    pub token: String,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("thread_id", &self.thread_id)
            .field("assistant_id", &self.assistant_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// One fragment of assistant text (or a control marker).
    Text(String),
    /// The server closed the connection.
    Closed {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },
}

/// Frame sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Raw user message text.
    Text(String),
    /// Graceful close.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Transport-level failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The handshake was refused or could not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The handshake did not complete within the configured bound.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Protocol or I/O error on an established connection.
    #[error("transport error: {0}")]
    Protocol(String),
    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<OutboundFrame, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = BoxStream<'static, Result<InboundFrame, TransportError>>;

/// An established connection.
pub struct Connection {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server, in arrival order.
    pub stream: FrameStream,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens streaming connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake for `request`.
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError>;
}
