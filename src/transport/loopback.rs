//! In-process connector.
//!
//! Every successful `connect` hands a [`LoopbackPeer`] to the paired
//! [`LoopbackAcceptor`]. The peer plays the server: it pushes fragments,
//! closes, injects transport errors, and observes what the client sent.
//!
//! This is a supported transport, not only a test double: embed a local or
//! scripted assistant by serving peers from the acceptor.
//!
//! ```rust
//! use assistant_stream_client::transport::{LoopbackConnector, OutboundFrame};
//! use assistant_stream_client::{SessionIdentity, SessionSettings, StreamingSessionClient};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> assistant_stream_client::Result<()> {
//! let (connector, mut acceptor) = LoopbackConnector::pair();
//! tokio::spawn(async move {
//!     while let Some(mut peer) = acceptor.accept().await {
//!         tokio::spawn(async move {
//!             while let Some(OutboundFrame::Text(_)) = peer.recv().await {
//!                 peer.send_text("echo");
//!                 peer.send_text("[DONE]");
//!             }
//!         });
//!     }
//! });
//!
//! let client = StreamingSessionClient::new(connector, SessionSettings::default());
//! client.open(SessionIdentity::new("local", "echo"), "").await?;
//! client.send("hi")?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::{ConnectRequest, Connection, Connector, InboundFrame, OutboundFrame, TransportError};

/// Client side of the loopback pair.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    inner: Arc<LoopbackInner>,
}

#[derive(Debug)]
struct LoopbackInner {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse_next: Mutex<Option<String>>,
    handshake_delay: Mutex<Option<Duration>>,
}

/// Server side of the loopback pair; yields one peer per connection.
#[derive(Debug)]
pub struct LoopbackAcceptor {
    peers: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackConnector {
    /// Create a connector and the acceptor that receives its connections.
    pub fn pair() -> (Self, LoopbackAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(LoopbackInner {
                peers: tx,
                refuse_next: Mutex::new(None),
                handshake_delay: Mutex::new(None),
            }),
        };
        (connector, LoopbackAcceptor { peers: rx })
    }

    /// Fail the next handshake with `reason`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        *self
            .inner
            .refuse_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Delay every handshake by `delay` (`None` to complete immediately).
    pub fn set_handshake_delay(&self, delay: Option<Duration>) {
        *self
            .inner
            .handshake_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        let delay = *self
            .inner
            .handshake_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let refused = self
            .inner
            .refuse_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = refused {
            return Err(TransportError::Handshake(reason));
        }

        let (to_client, client_inbound) = frames::unbounded();
        let (client_outbound, from_client) = frames::unbounded();

        let peer = LoopbackPeer {
            request: request.clone(),
            to_client,
            from_client,
        };
        self.inner
            .peers
            .send(peer)
            .map_err(|_dropped| TransportError::Handshake("no loopback acceptor".to_string()))?;

        debug!(
            name: "transport.loopback.connected",
            thread_id = %request.thread_id,
            "Loopback connection established"
        );

        Ok(Connection {
            sink: Box::pin(client_outbound.sink_map_err(|_closed| TransportError::ConnectionClosed)),
            stream: client_inbound.boxed(),
        })
    }
}

impl LoopbackAcceptor {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.peers.recv().await
    }

    /// Take an already established connection, if any.
    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server end of one loopback connection.
#[derive(Debug)]
pub struct LoopbackPeer {
    request: ConnectRequest,
    to_client: frames::UnboundedSender<Result<InboundFrame, TransportError>>,
    from_client: frames::UnboundedReceiver<OutboundFrame>,
}

impl LoopbackPeer {
    /// The request the client connected with.
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Push a text frame. Returns `false` once the client has gone away.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .unbounded_send(Ok(InboundFrame::Text(text.into())))
            .is_ok()
    }

    /// Close from the server side.
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) -> bool {
        self.to_client
            .unbounded_send(Ok(InboundFrame::Closed {
                code,
                reason: reason.into(),
            }))
            .is_ok()
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Next frame sent by the client; `None` once the client dropped its sink.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.next().await
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.from_client.try_next().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            thread_id: "t".to_string(),
            assistant_id: "a".to_string(),
            token: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let mut conn = connector.connect(&request()).await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.request().thread_id, "t");

        conn.sink
            .send(OutboundFrame::Text("hi".to_string()))
            .await
            .unwrap();
        assert_eq!(peer.recv().await, Some(OutboundFrame::Text("hi".to_string())));

        assert!(peer.send_text("Hel"));
        assert_eq!(
            conn.stream.next().await,
            Some(Ok(InboundFrame::Text("Hel".to_string())))
        );
    }

    #[tokio::test]
    async fn test_refuse_next_is_one_shot() {
        let (connector, _acceptor) = LoopbackConnector::pair();
        connector.refuse_next("nope");

        let err = connector.connect(&request()).await.unwrap_err();
        assert_eq!(err, TransportError::Handshake("nope".to_string()));
        assert!(connector.connect(&request()).await.is_ok());
    }

    #[test]
    fn test_request_debug_redacts_token() {
        let rendered = format!("{:?}", request());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
