//! Streaming session client.
//!
//! Owns one connection at a time, merges streamed fragments into the
//! transcript, gates sends on turn-taking, and pushes every change to
//! subscribers.
//!
//! Each connection gets a writer task (outbound channel to sink) and a reader
//! task (stream to accumulator). A generation counter, bumped by every `open`
//! and `close`, turns anything a stale connection reports into a no-op.
//!
//! `send`, `close` and the observer accessors are synchronous and may be
//! called from any thread; tasks are spawned on the runtime that ran `open`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, SendRejected};
use crate::transport::{
    ConnectRequest, Connection, Connector, InboundFrame, NORMAL_CLOSURE, OutboundFrame,
    TransportError,
};

use super::message::{FragmentOutcome, Transcript};
use super::state::{ConnectionState, SessionEvent, SessionIdentity, SessionSnapshot};

/// Control frame that ends an assistant turn.
pub const DEFAULT_END_OF_TURN_MARKER: &str = "[DONE]";

/// Default bound on the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Behaviour of a [`StreamingSessionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Inbound payload that marks the end of an assistant turn (`None` disables).
    pub end_of_turn_marker: Option<String>,
    /// Handshake bound (`None` waits forever).
    pub connect_timeout: Option<Duration>,
    /// How long to wait for the first reply fragment (`None` waits forever).
    pub reply_timeout: Option<Duration>,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            end_of_turn_marker: Some(DEFAULT_END_OF_TURN_MARKER.to_string()),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            reply_timeout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Client for one streamed chat session.
pub struct StreamingSessionClient<C> {
    connector: C,
    shared: Arc<Shared>,
}

struct Shared {
    settings: SessionSettings,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct SessionState {
    identity: Option<SessionIdentity>,
    connection: ConnectionState,
    transcript: Transcript,
    awaiting_reply: bool,
    generation: u64,
    turn: u64,
    link: Option<Link>,
}

/// Handles to the tasks serving the current connection.
struct Link {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
    /// Runtime the connection tasks run on.
    runtime: Handle,
}

impl Link {
    /// Queue a close frame and stop reading. The writer flushes the frame
    /// and exits once the channel drains.
    fn shutdown(self, code: u16, reason: String) {
        let _ = self.outbound.send(OutboundFrame::Close { code, reason });
        self.cancel.cancel();
    }
}

impl<C> fmt::Debug for StreamingSessionClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("StreamingSessionClient")
            .field("identity", &state.identity)
            .field("connection", &state.connection)
            .field("messages", &state.transcript.len())
            .field("awaiting_reply", &state.awaiting_reply)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> StreamingSessionClient<C> {
    /// Create a client that opens connections through `connector`.
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            connector,
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(SessionState::default()),
                events,
            }),
        }
    }

    /// Open a session for `identity`, replacing any current connection.
    ///
    /// The transcript is reset before the handshake starts. A failed
    /// handshake leaves the state `Errored`; nothing is retried.
    pub async fn open(&self, identity: SessionIdentity, auth_token: &str) -> Result<()> {
        let generation = {
            let mut state = self.shared.lock();
            if let Some(link) = state.link.take() {
                info!(
                    name: "session.replaced",
                    previous = ?state.identity,
                    next = %identity,
                    "Closing previous connection"
                );
                link.shutdown(NORMAL_CLOSURE, String::new());
            }
            state.generation += 1;
            state.identity = Some(identity.clone());
            if !state.transcript.is_empty() {
                state.transcript.clear();
                self.shared.emit_transcript(&state);
            }
            self.shared.set_awaiting(&mut state, false);
            self.shared.set_connection(&mut state, ConnectionState::Connecting);
            state.generation
        };
        let mut attempt_guard = OpenAttempt {
            shared: &self.shared,
            generation,
            settled: false,
        };

        info!(
            name: "session.open",
            thread_id = %identity.thread_id,
            assistant_id = %identity.assistant_id,
            "Opening streaming session"
        );

        let request = ConnectRequest {
            thread_id: identity.thread_id.clone(),
            assistant_id: identity.assistant_id.clone(),
            token: auth_token.to_string(),
        };
        let attempt = self.connector.connect(&request);
        let result = match self.shared.settings.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => attempt.await,
        };

        attempt_guard.settled = true;
        let mut state = self.shared.lock();
        if state.generation != generation {
            drop(state);
            debug!(name: "session.superseded", session = %identity, "Discarding superseded connection");
            if let Ok(connection) = result {
                tokio::spawn(close_unused(connection));
            }
            return Err(Error::Superseded);
        }

        match result {
            Ok(connection) => {
                state.link = Some(Shared::spawn_link(&self.shared, generation, connection));
                self.shared.set_connection(&mut state, ConnectionState::Open);
                info!(name: "session.opened", session = %identity, "Streaming session open");
                Ok(())
            }
            Err(e) => {
                warn!(name: "session.open_failed", session = %identity, error = %e, "Handshake failed");
                self.shared.set_connection(
                    &mut state,
                    ConnectionState::Errored {
                        message: e.to_string(),
                    },
                );
                Err(Error::Transport(e))
            }
        }
    }
}

impl<C> StreamingSessionClient<C> {
    /// Send a user message.
    ///
    /// Checks, in order: non-empty after trimming, connection `Open`, no turn
    /// pending. On success the text is appended to the transcript and
    /// transmitted verbatim.
    pub fn send(&self, text: &str) -> std::result::Result<(), SendRejected> {
        if text.trim().is_empty() {
            return Err(SendRejected::EmptyInput);
        }

        let mut state = self.shared.lock();
        if !state.connection.is_open() {
            return Err(SendRejected::NotConnected);
        }
        if state.awaiting_reply {
            return Err(SendRejected::TurnPending);
        }
        let Some(link) = state.link.as_ref() else {
            return Err(SendRejected::NotConnected);
        };
        if link
            .outbound
            .send(OutboundFrame::Text(text.to_string()))
            .is_err()
        {
            return Err(SendRejected::NotConnected);
        }
        let timer_token = link.cancel.child_token();
        let runtime = link.runtime.clone();

        state.transcript.push_user(text);
        state.turn += 1;
        self.shared.emit_transcript(&state);
        self.shared.set_awaiting(&mut state, true);
        debug!(name: "session.sent", turn = state.turn, chars = text.chars().count(), "User message sent");

        if let Some(limit) = self.shared.settings.reply_timeout {
            let shared = Arc::clone(&self.shared);
            let (generation, turn) = (state.generation, state.turn);
            runtime.spawn(async move {
                tokio::select! {
                    () = timer_token.cancelled() => {}
                    () = tokio::time::sleep(limit) => shared.on_reply_timeout(generation, turn, limit),
                }
            });
        }
        Ok(())
    }

    /// Close with a normal closure code. Idempotent.
    pub fn close(&self) {
        self.close_with(None, None);
    }

    /// Close with an explicit code and reason. Idempotent; safe before any
    /// `open`. A reply in progress stays incomplete.
    pub fn close_with(&self, code: Option<u16>, reason: Option<&str>) {
        let code = code.unwrap_or(NORMAL_CLOSURE);
        let reason = reason.unwrap_or_default().to_string();

        let mut state = self.shared.lock();
        state.generation += 1;
        if let Some(link) = state.link.take() {
            info!(
                name: "session.closed",
                session = ?state.identity,
                code,
                "Closing streaming session"
            );
            link.shutdown(code, reason.clone());
        }
        if !matches!(state.connection, ConnectionState::Closed { .. }) {
            self.shared.set_connection(
                &mut state,
                ConnectionState::Closed {
                    code: Some(code),
                    reason,
                },
            );
        }
        self.shared.set_awaiting(&mut state, false);
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Current view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        Shared::snapshot_of(&self.shared.lock())
    }

    /// A snapshot and a receiver that starts right after it: no change is
    /// missed and none is reported twice.
    pub fn subscribe_with_snapshot(&self) -> (SessionSnapshot, broadcast::Receiver<SessionEvent>) {
        self.shared.subscribe_with_snapshot()
    }

    /// Cloneable read-only handle for observers running on other tasks or
    /// threads.
    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.shared.lock().transcript.clone()
    }

    pub fn awaiting_reply(&self) -> bool {
        self.shared.lock().awaiting_reply
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.shared.lock().identity.clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }
}

impl<C> Drop for StreamingSessionClient<C> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.generation += 1;
        if let Some(link) = state.link.take() {
            debug!(name: "session.disposed", session = ?state.identity, "Session client dropped");
            link.shutdown(NORMAL_CLOSURE, String::new());
        }
    }
}

/// Read-only view of a session, detached from the client's lifetime.
#[derive(Clone)]
pub struct SessionObserver {
    shared: Arc<Shared>,
}

impl fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObserver").finish_non_exhaustive()
    }
}

impl SessionObserver {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        Shared::snapshot_of(&self.shared.lock())
    }

    /// See [`StreamingSessionClient::subscribe_with_snapshot`].
    pub fn subscribe_with_snapshot(&self) -> (SessionSnapshot, broadcast::Receiver<SessionEvent>) {
        self.shared.subscribe_with_snapshot()
    }
}

/// Settles the state of an `open` whose future is dropped mid-handshake.
struct OpenAttempt<'a> {
    shared: &'a Shared,
    generation: u64,
    settled: bool,
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.on_open_abandoned(self.generation);
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            identity: state.identity.clone(),
            connection: state.connection.clone(),
            transcript: state.transcript.to_vec(),
            awaiting_reply: state.awaiting_reply,
        }
    }

    // Events are emitted under the state lock, so subscribing under it
    // lines the receiver up with the snapshot.
    fn subscribe_with_snapshot(&self) -> (SessionSnapshot, broadcast::Receiver<SessionEvent>) {
        let state = self.lock();
        let events = self.events.subscribe();
        (Self::snapshot_of(&state), events)
    }

    fn on_open_abandoned(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.connection != ConnectionState::Connecting {
            return;
        }
        warn!(name: "session.open_abandoned", session = ?state.identity, "Connection attempt dropped");
        self.set_connection(
            &mut state,
            ConnectionState::Errored {
                message: "connection attempt abandoned".to_string(),
            },
        );
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_transcript(&self, state: &SessionState) {
        self.emit(SessionEvent::Transcript(state.transcript.to_vec()));
    }

    fn set_connection(&self, state: &mut SessionState, next: ConnectionState) {
        if state.connection != next {
            state.connection = next.clone();
            self.emit(SessionEvent::Connection(next));
        }
    }

    fn set_awaiting(&self, state: &mut SessionState, awaiting: bool) {
        if state.awaiting_reply != awaiting {
            state.awaiting_reply = awaiting;
            self.emit(SessionEvent::AwaitingReply(awaiting));
        }
    }

    fn spawn_link(shared: &Arc<Self>, generation: u64, connection: Connection) -> Link {
        let Connection {
            mut sink,
            mut stream,
        } = connection;
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let cancel = CancellationToken::new();
        let runtime = Handle::current();

        // Writer: one frame per send, in order; a close frame ends it.
        let writer = Arc::clone(shared);
        runtime.spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let closing = matches!(frame, OutboundFrame::Close { .. });
                if let Err(e) = sink.send(frame).await {
                    writer.on_transport_error(generation, &e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: fragments are applied strictly in arrival order.
        let reader = Arc::clone(shared);
        let token = cancel.clone();
        runtime.spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    frame = stream.next() => frame,
                };
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => reader.on_fragment(generation, &text),
                    Some(Ok(InboundFrame::Closed { code, reason })) => {
                        reader.on_remote_close(generation, code, reason);
                        break;
                    }
                    Some(Err(e)) => {
                        reader.on_transport_error(generation, &e);
                        break;
                    }
                    None => {
                        reader.on_remote_close(generation, None, String::new());
                        break;
                    }
                }
            }
        });

        Link {
            outbound,
            cancel,
            runtime,
        }
    }

    fn on_fragment(&self, generation: u64, text: &str) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(name: "session.stale_fragment", "Ignoring fragment from a replaced connection");
            return;
        }

        if self.settings.end_of_turn_marker.as_deref() == Some(text) {
            if let Some(message_id) = state.transcript.complete_tail() {
                debug!(name: "session.turn_completed", %message_id, "Assistant turn complete");
                self.emit(SessionEvent::TurnCompleted { message_id });
                self.emit_transcript(&state);
            }
            self.set_awaiting(&mut state, false);
            return;
        }

        let outcome = state.transcript.apply_fragment(text);
        self.emit(SessionEvent::Fragment {
            message_id: outcome.message_id(),
            text: text.to_string(),
        });
        // Appends travel as `Fragment` alone; a new message is structural.
        if matches!(outcome, FragmentOutcome::Started(_)) {
            self.emit_transcript(&state);
        }
        self.set_awaiting(&mut state, false);
    }

    fn on_remote_close(&self, generation: u64, code: Option<u16>, reason: String) {
        let mut state = self.lock();
        if state.generation != generation || state.link.take().is_none() {
            return;
        }
        info!(
            name: "session.remote_close",
            session = ?state.identity,
            code = ?code,
            reason = %reason,
            "Server closed the connection"
        );
        self.set_connection(&mut state, ConnectionState::Closed { code, reason });
        self.set_awaiting(&mut state, false);
    }

    fn on_transport_error(&self, generation: u64, error: &TransportError) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let Some(link) = state.link.take() else {
            return;
        };
        link.cancel.cancel();
        warn!(
            name: "session.transport_error",
            session = ?state.identity,
            error = %error,
            "Connection failed"
        );
        self.set_connection(
            &mut state,
            ConnectionState::Errored {
                message: error.to_string(),
            },
        );
        self.set_awaiting(&mut state, false);
    }

    fn on_reply_timeout(&self, generation: u64, turn: u64, limit: Duration) {
        let mut state = self.lock();
        if state.generation != generation || state.turn != turn || !state.awaiting_reply {
            return;
        }
        warn!(name: "session.reply_timeout", turn, timeout = ?limit, "No reply within timeout");
        self.set_awaiting(&mut state, false);
        self.emit(SessionEvent::ReplyTimedOut);
    }
}

/// Gracefully close a connection that lost the race to a newer `open`.
async fn close_unused(connection: Connection) {
    let mut sink = connection.sink;
    let _ = sink
        .send(OutboundFrame::Close {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        })
        .await;
    let _ = sink.close().await;
}
