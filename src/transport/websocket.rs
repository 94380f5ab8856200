//! WebSocket connector for the assistant backend.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};
use url::Url;

use super::{ConnectRequest, Connection, Connector, InboundFrame, OutboundFrame, TransportError};

/// Path of the streaming endpoint, relative to the stream base URL.
const STREAM_PATH: [&str; 3] = ["api", "assistants", "ws"];

/// Streaming endpoint of the backend.
///
/// The base URL may carry a path prefix (for deployments behind a proxy);
/// `http`/`https` bases are mapped to `ws`/`wss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    base: Url,
}

impl StreamEndpoint {
    /// Parse a stream base URL such as `ws://localhost:8000`.
    pub fn parse(base: impl AsRef<str>) -> Result<Self, url::ParseError> {
        let raw = base.as_ref().trim();
        let normalized = if let Some(rest) = raw.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = raw.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            raw.to_string()
        };
        Ok(Self {
            base: Url::parse(&normalized)?,
        })
    }

    /// The base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full connection URL for a session.
    pub fn url_for(&self, request: &ConnectRequest) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::Handshake(format!("cannot build endpoint from {}", self.base))
            })?
            .pop_if_empty()
            .extend(STREAM_PATH);
        url.query_pairs_mut()
            .append_pair("token", &request.token)
            .append_pair("thread_id", &request.thread_id)
            .append_pair("assistant_id", &request.assistant_id);
        Ok(url)
    }
}

/// Opens WebSocket connections to a [`StreamEndpoint`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: StreamEndpoint,
}

impl WsConnector {
    /// Create a connector for the given endpoint.
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self { endpoint }
    }

    /// The endpoint this connector dials.
    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        let url = self.endpoint.url_for(request)?;
        debug!(
            name: "transport.ws.connecting",
            host = ?url.host_str(),
            thread_id = %request.thread_id,
            assistant_id = %request.assistant_id,
            "Opening WebSocket"
        );

        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        info!(
            name: "transport.ws.connected",
            status = response.status().as_u16(),
            thread_id = %request.thread_id,
            "WebSocket handshake complete"
        );

        let (write, read) = ws.split();

        let stream = read
            .filter_map(|item| future::ready(inbound_from_ws(item)))
            .boxed();

        let sink = write
            .sink_map_err(|e| TransportError::Protocol(e.to_string()))
            .with(|frame: OutboundFrame| future::ready(Ok::<_, TransportError>(outbound_to_ws(frame))));

        Ok(Connection {
            sink: Box::pin(sink),
            stream,
        })
    }
}

fn inbound_from_ws(
    item: Result<WsMessage, WsError>,
) -> Option<Result<InboundFrame, TransportError>> {
    match item {
        Ok(WsMessage::Text(text)) => Some(Ok(InboundFrame::Text(text))),
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(Ok(InboundFrame::Text(text))),
            Err(e) => {
                warn!(name: "transport.ws.binary_dropped", error = %e, "Dropping non-UTF-8 binary frame");
                None
            }
        },
        Ok(WsMessage::Close(frame)) => Some(Ok(match frame {
            Some(frame) => InboundFrame::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => InboundFrame::Closed {
                code: None,
                reason: String::new(),
            },
        })),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(e) => Some(Err(TransportError::Protocol(e.to_string()))),
    }
}

fn outbound_to_ws(frame: OutboundFrame) -> WsMessage {
    match frame {
        OutboundFrame::Text(text) => WsMessage::Text(text),
        OutboundFrame::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            thread_id: "thread_abc".to_string(),
            assistant_id: "asst_1".to_string(),
            token: "tok en&1".to_string(),
        }
    }

    #[test]
    fn test_url_for_appends_path_and_query() {
        let endpoint = StreamEndpoint::parse("ws://localhost:8000").unwrap();
        let url = endpoint.url_for(&request()).unwrap();

        assert_eq!(url.path(), "/api/assistants/ws");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "tok en&1".to_string()),
                ("thread_id".to_string(), "thread_abc".to_string()),
                ("assistant_id".to_string(), "asst_1".to_string()),
            ]
        );
    }

    #[test]
    fn test_url_for_keeps_path_prefix() {
        let endpoint = StreamEndpoint::parse("wss://example.com/backend/").unwrap();
        let url = endpoint.url_for(&request()).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/backend/api/assistants/ws");
    }

    #[test]
    fn test_http_schemes_are_mapped() {
        let plain = StreamEndpoint::parse("http://localhost:8000").unwrap();
        assert_eq!(plain.base().scheme(), "ws");

        let tls = StreamEndpoint::parse("https://example.com").unwrap();
        assert_eq!(tls.base().scheme(), "wss");
    }

    #[test]
    fn test_close_frame_mapping() {
        let inbound = inbound_from_ws(Ok(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(1008),
            reason: Cow::Borrowed("Invalid authentication token."),
        }))));
        assert_eq!(
            inbound,
            Some(Ok(InboundFrame::Closed {
                code: Some(1008),
                reason: "Invalid authentication token.".to_string(),
            }))
        );

        assert_eq!(inbound_from_ws(Ok(WsMessage::Ping(vec![1, 2]))), None);
        assert_eq!(inbound_from_ws(Err(WsError::ConnectionClosed)), None);
    }

    #[test]
    fn test_binary_utf8_is_text() {
        let inbound = inbound_from_ws(Ok(WsMessage::Binary(b"Hel".to_vec())));
        assert_eq!(inbound, Some(Ok(InboundFrame::Text("Hel".to_string()))));

        assert_eq!(inbound_from_ws(Ok(WsMessage::Binary(vec![0xff, 0xfe]))), None);
    }
}
