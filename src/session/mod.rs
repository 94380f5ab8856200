//! Streamed chat sessions.
//!
//! A session is one (thread, assistant) pairing served over one
//! bidirectional connection. Assistant replies arrive as text fragments and
//! are merged into the tail of the transcript as they stream.
//!
//! # Architecture
//!
//! - [`StreamingSessionClient`]: connection lifecycle, send gating, fragment accumulation
//! - [`Transcript`]: ordered messages; only the tail is mutable
//! - [`SessionEvent`]: change notifications for UI observers
//! - [`SessionObserver`]: read-only handle; pairs a snapshot with a receiver
//!   so a lagging observer can resync
//!
//! # Example
//!
//! ```rust
//! use assistant_stream_client::session::{Role, Transcript};
//!
//! let mut transcript = Transcript::new();
//! transcript.push_user("hi");
//! transcript.apply_fragment("Hel");
//! transcript.apply_fragment("lo");
//!
//! assert_eq!(transcript.len(), 2);
//! let reply = transcript.last().unwrap();
//! assert_eq!(reply.role, Role::Assistant);
//! assert_eq!(reply.content, "Hello");
//! ```

mod client;
mod message;
mod state;

pub use client::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_END_OF_TURN_MARKER, DEFAULT_EVENT_CAPACITY, SessionObserver,
    SessionSettings, StreamingSessionClient,
};
pub use message::{FragmentOutcome, Message, Role, Transcript};
pub use state::{ConnectionState, SessionEvent, SessionIdentity, SessionSnapshot};
