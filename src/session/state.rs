//! Connection state, session identity and observer events.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::message::Message;

/// The (thread, assistant) pairing that defines a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionIdentity {
    /// Externally issued thread id.
    pub thread_id: String,
    /// Externally issued assistant id.
    pub assistant_id: String,
}

impl SessionIdentity {
    pub fn new(thread_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.thread_id, self.assistant_id)
    }
}

/// Lifecycle of the session's connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never opened.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Ready to send and receive.
    Open,
    /// Closed by either side.
    Closed {
        /// Close code, when one was exchanged.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },
    /// Handshake or transport failure.
    Errored {
        /// Human-readable failure.
        message: String,
    },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// `Closed` or `Errored`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Errored { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed { code: Some(code), reason } if !reason.is_empty() => {
                write!(f, "closed ({code}: {reason})")
            }
            Self::Closed { code: Some(code), .. } => write!(f, "closed ({code})"),
            Self::Closed { code: None, .. } => write!(f, "closed"),
            Self::Errored { message } => write!(f, "error: {message}"),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current pairing, if a session was ever opened.
    pub identity: Option<SessionIdentity>,
    pub connection: ConnectionState,
    pub transcript: Vec<Message>,
    /// A user message was sent and no reply fragment has arrived yet.
    pub awaiting_reply: bool,
}

/// Change notifications pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection state changed.
    Connection(ConnectionState),
    /// A message was added, or the transcript was reset or completed.
    /// Carries the full new transcript. Appends to a streaming reply arrive
    /// as [`SessionEvent::Fragment`] only.
    Transcript(Vec<Message>),
    /// The awaiting-reply flag changed.
    AwaitingReply(bool),
    /// A fragment was merged into `message_id`.
    Fragment {
        /// Message the text went into.
        message_id: Uuid,
        /// The fragment as received.
        text: String,
    },
    /// The end-of-turn marker closed `message_id`.
    TurnCompleted {
        /// The completed assistant message.
        message_id: Uuid,
    },
    /// No reply fragment arrived within the configured reply timeout.
    ReplyTimedOut,
}
