//! Ordered, deduplicated message collection for one session.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use livechat_proto::codec::CodecError;
use livechat_proto::entry::{ConversationEntry, ParticipantRole};

/// Who a message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent by the local end user.
    User,
    /// Sent by a bot or human agent.
    Agent,
    /// Generated notice (joins, leaves, session end).
    System,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A stored chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Backend id for inbound messages, `local-<uuid>` for local ones.
    pub id: String,
    /// Who the message is attributed to.
    pub kind: MessageKind,
    /// Plain-text content.
    pub content: String,
    /// When the message was created, not necessarily when it arrived.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a locally generated message with a fresh collision-resistant id.
    #[must_use]
    pub fn local(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: format!("local-{}", Uuid::now_v7()),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a system notice.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::local(MessageKind::System, content)
    }

    /// Converts a backend message entry, keeping the backend's identifier.
    ///
    /// Returns `Ok(None)` if the entry has no plain text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the entry payload cannot be decoded.
    pub fn from_entry(entry: &ConversationEntry) -> Result<Option<Self>, CodecError> {
        let Some(content) = entry.text()? else {
            return Ok(None);
        };
        let kind = match entry.sender.role {
            ParticipantRole::EndUser => MessageKind::User,
            ParticipantRole::Chatbot | ParticipantRole::Agent => MessageKind::Agent,
            ParticipantRole::System | ParticipantRole::Other(_) => MessageKind::System,
        };
        let timestamp = entry
            .client_timestamp
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        Ok(Some(Self {
            id: entry.identifier.clone(),
            kind,
            content,
            timestamp,
        }))
    }
}

/// Shared view of the backend message ids a store has ingested.
///
/// The polling transport holds a clone to skip entries already shown.
#[derive(Debug, Clone, Default)]
pub struct KnownIds(Arc<RwLock<HashSet<String>>>);

impl KnownIds {
    /// Whether `id` has been ingested.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.read().contains(id)
    }

    /// Records `id`, returning `false` if it was already present.
    pub fn insert(&self, id: &str) -> bool {
        self.0.write().insert(id.to_owned())
    }

    /// Forgets `id`.
    pub fn remove(&self, id: &str) {
        self.0.write().remove(id);
    }

    /// Number of ids recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether no ids are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

/// Messages of one session in arrival order.
///
/// # Invariants
///
/// - No two entries share an `id`.
/// - Order equals insertion order; entries are only removed by
///   [`MessageStore::remove`] (optimistic-send rollback) or
///   [`MessageStore::clear`] (teardown).
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    known: KnownIds,
}

impl MessageStore {
    /// Creates an empty store with its own id set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a backend message unless its id was already ingested.
    ///
    /// Returns `false` for a duplicate, which is dropped silently: both
    /// transports may legitimately redeliver.
    pub fn ingest(&mut self, message: Message) -> bool {
        if !self.known.insert(&message.id) {
            tracing::trace!(message_id = %message.id, "dropping duplicate message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Appends a locally generated message. Local ids are never checked
    /// against backend ids.
    pub fn push_local(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Removes the message with `id`, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        self.known.remove(id);
        Some(self.messages.remove(index))
    }

    /// Whether a message with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// All messages in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Handle to the ingested-id set, for the polling transport.
    #[must_use]
    pub fn known_ids(&self) -> KnownIds {
        self.known.clone()
    }
}
