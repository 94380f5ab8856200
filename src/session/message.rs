//! Transcript messages and the fragment accumulation rule.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The assistant.
    Assistant,
}

/// A message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity; preserved while streamed text is appended.
    pub id: Uuid,
    /// Sender role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// `false` while an assistant reply is still streaming.
    pub is_complete: bool,
}

impl Message {
    /// A user message; always complete.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            is_complete: true,
        }
    }

    /// A freshly started (incomplete) assistant message.
    pub fn assistant_fragment(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            is_complete: false,
        }
    }

    /// Whether streamed text may still be appended to this message.
    pub fn accepts_fragments(&self) -> bool {
        self.role == Role::Assistant && !self.is_complete
    }
}

/// Where a fragment landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Appended to the existing tail message.
    Extended(Uuid),
    /// Started a new assistant message.
    Started(Uuid),
}

impl FragmentOutcome {
    /// Id of the message the fragment went into.
    pub fn message_id(self) -> Uuid {
        match self {
            Self::Extended(id) | Self::Started(id) => id,
        }
    }
}

/// Ordered message history of one session.
///
/// Append-only from the outside; only the last message can change, and only
/// by having streamed text appended or being marked complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// An empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The newest message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a user message and return its id.
    pub fn push_user(&mut self, content: impl Into<String>) -> Uuid {
        let message = Message::user(content);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Merge one inbound fragment.
    ///
    /// Concatenated onto the tail when the tail is an incomplete assistant
    /// message, otherwise a new assistant message is started. No separator,
    /// no deduplication.
    pub fn apply_fragment(&mut self, text: &str) -> FragmentOutcome {
        if let Some(last) = self.messages.last_mut() {
            if last.accepts_fragments() {
                last.content.push_str(text);
                return FragmentOutcome::Extended(last.id);
            }
        }
        let message = Message::assistant_fragment(text);
        let id = message.id;
        self.messages.push(message);
        FragmentOutcome::Started(id)
    }

    /// Mark a streaming tail message complete. Returns its id if one was open.
    pub fn complete_tail(&mut self) -> Option<Uuid> {
        let last = self.messages.last_mut()?;
        if !last.accepts_fragments() {
            return None;
        }
        last.is_complete = true;
        Some(last.id)
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Owned copy of the messages.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
