//! Streaming sessions over a real WebSocket against an in-process backend.

use std::collections::HashMap;
use std::time::Duration;

use assistant_stream_client::session::SessionSnapshot;
use assistant_stream_client::transport::TransportError;
use assistant_stream_client::{
    ConnectionState, Error, Role, SessionIdentity, SessionSettings, StreamEndpoint,
    StreamingSessionClient, WsConnector,
};
use axum::{
    Router,
    extract::{
        Query,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

const TOKEN: &str = "jwt-1";

async fn ws_handler(ws: WebSocketUpgrade, Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("token").map(String::as_str) != Some(TOKEN) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let (Some(thread_id), Some(_assistant_id)) = (query.get("thread_id"), query.get("assistant_id"))
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let thread_id = thread_id.clone();
    ws.on_upgrade(move |socket| serve(socket, thread_id))
}

/// Replies to every message with `<thread>: <text>` in three fragments,
/// followed by the end-of-turn marker.
async fn serve(mut socket: WebSocket, thread_id: String) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                if text.as_str() == "close please" {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 4000,
                            reason: "bye".into(),
                        })))
                        .await;
                    break;
                }
                let prefix = format!("{thread_id}: ");
                for fragment in [prefix.as_str(), text.as_str(), "[DONE]"] {
                    if socket.send(Message::Text(fragment.into())).await.is_err() {
                        return;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn spawn_backend() -> anyhow::Result<StreamEndpoint> {
    let app = Router::new().route("/api/assistants/ws", get(ws_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(StreamEndpoint::parse(format!("ws://{addr}"))?)
}

async fn session() -> anyhow::Result<StreamingSessionClient<WsConnector>> {
    let endpoint = spawn_backend().await?;
    Ok(StreamingSessionClient::new(
        WsConnector::new(endpoint),
        SessionSettings::default(),
    ))
}

async fn eventually(
    client: &StreamingSessionClient<WsConnector>,
    check: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    for _ in 0..250 {
        let snapshot = client.snapshot();
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached: {:?}", client.snapshot());
}

fn reply_done(snapshot: &SessionSnapshot, len: usize) -> bool {
    snapshot.transcript.len() == len && snapshot.transcript[len - 1].is_complete
}

#[tokio::test]
async fn test_streamed_reply_over_websocket() -> anyhow::Result<()> {
    let client = session().await?;
    client
        .open(SessionIdentity::new("thread_a", "asst_1"), TOKEN)
        .await?;
    assert!(client.connection_state().is_open());

    client.send("hello")?;
    let snapshot = eventually(&client, |s| reply_done(s, 2)).await;
    assert_eq!(snapshot.transcript[0].role, Role::User);
    assert_eq!(snapshot.transcript[1].role, Role::Assistant);
    assert_eq!(snapshot.transcript[1].content, "thread_a: hello");
    assert!(!snapshot.awaiting_reply);

    client.send("again")?;
    let snapshot = eventually(&client, |s| reply_done(s, 4)).await;
    assert_eq!(snapshot.transcript[3].content, "thread_a: again");

    client.close();
    assert!(matches!(client.connection_state(), ConnectionState::Closed { .. }));
    Ok(())
}

#[tokio::test]
async fn test_switching_threads_starts_fresh() -> anyhow::Result<()> {
    let client = session().await?;
    client
        .open(SessionIdentity::new("thread_a", "asst_1"), TOKEN)
        .await?;
    client.send("one")?;
    eventually(&client, |s| reply_done(s, 2)).await;

    client
        .open(SessionIdentity::new("thread_b", "asst_1"), TOKEN)
        .await?;
    assert!(client.transcript().is_empty());

    client.send("two")?;
    let snapshot = eventually(&client, |s| reply_done(s, 2)).await;
    assert_eq!(snapshot.transcript[1].content, "thread_b: two");
    Ok(())
}

#[tokio::test]
async fn test_rejected_handshake_is_errored() -> anyhow::Result<()> {
    let client = session().await?;
    let err = client
        .open(SessionIdentity::new("thread_a", "asst_1"), "bogus")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(TransportError::Handshake(_))));
    assert!(matches!(client.connection_state(), ConnectionState::Errored { .. }));
    Ok(())
}

#[tokio::test]
async fn test_server_close_is_reported() -> anyhow::Result<()> {
    let client = session().await?;
    client
        .open(SessionIdentity::new("thread_a", "asst_1"), TOKEN)
        .await?;

    client.send("close please")?;
    let snapshot = eventually(&client, |s| s.connection.is_terminal()).await;
    assert_eq!(
        snapshot.connection,
        ConnectionState::Closed {
            code: Some(4000),
            reason: "bye".to_string()
        }
    );
    assert!(!snapshot.awaiting_reply);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_backend_is_errored() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = StreamEndpoint::parse(format!("ws://{addr}")).unwrap();
    let client = StreamingSessionClient::new(WsConnector::new(endpoint), SessionSettings::default());
    let result = client
        .open(SessionIdentity::new("thread_a", "asst_1"), TOKEN)
        .await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert!(matches!(client.connection_state(), ConnectionState::Errored { .. }));
}
