//! In-memory conversation registry.
//!
//! Each conversation keeps its entries (for the polling listing), a log of
//! every labeled event it emitted (for `Last-Event-Id` replay) and a
//! broadcast channel feeding live event-stream subscribers.

use std::collections::HashMap;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use livechat_proto::credentials::InitializeResponse;
use livechat_proto::entry::{ConversationEntry, EntryType};
use livechat_proto::stream::{StreamEventData, StreamLabel};

/// Capacity of each conversation's broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Organization id reported by the stub.
pub const STUB_ORG_ID: &str = "stub-org";

/// Errors returned to clients of the stub.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StubError {
    /// Missing or unknown bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// No conversation with this id (or not owned by the token).
    #[error("unknown conversation {0}")]
    UnknownConversation(String),

    /// The conversation has been closed.
    #[error("conversation {0} is closed")]
    ConversationClosed(String),

    /// An entry could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// One labeled event as emitted on the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    /// Event id, monotonically increasing per conversation from 1.
    pub id: u64,
    /// Event label.
    pub label: StreamLabel,
    /// Encoded [`StreamEventData`].
    pub data: String,
}

struct Conversation {
    token: String,
    entries: Vec<ConversationEntry>,
    log: Vec<LoggedEvent>,
    events: Option<broadcast::Sender<LoggedEvent>>,
    agent_joined: bool,
}

impl Conversation {
    fn new(token: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            token,
            entries: Vec::new(),
            log: Vec::new(),
            events: Some(events),
            agent_joined: false,
        }
    }

    const fn is_closed(&self) -> bool {
        self.events.is_none()
    }
}

#[derive(Default)]
struct Registry {
    conversations: HashMap<String, Conversation>,
    /// Maps access token to conversation id.
    tokens: HashMap<String, String>,
}

impl Registry {
    fn owned(&mut self, token: &str, conversation_id: &str) -> Result<&mut Conversation, StubError> {
        let conversation = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StubError::UnknownConversation(conversation_id.to_owned()))?;
        if conversation.token != token {
            return Err(StubError::Unauthorized);
        }
        Ok(conversation)
    }
}

/// Every conversation the stub knows about.
#[derive(Default)]
pub struct ConversationStore {
    inner: RwLock<Registry>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new conversation and returns its credentials.
    pub async fn create(&self) -> InitializeResponse {
        let token = format!("stub-token-{}", Uuid::now_v7());
        let conversation_id = format!("conv-{}", Uuid::now_v7());
        let mut inner = self.inner.write().await;
        inner.tokens.insert(token.clone(), conversation_id.clone());
        inner
            .conversations
            .insert(conversation_id.clone(), Conversation::new(token.clone()));
        InitializeResponse {
            access_token: Some(token),
            conversation_id: Some(conversation_id),
            org_id: Some(STUB_ORG_ID.to_owned()),
            last_event_id: Some(String::new()),
        }
    }

    /// Resolves a bearer token to its conversation id.
    ///
    /// # Errors
    ///
    /// Returns [`StubError::Unauthorized`] for an unknown token.
    pub async fn authorize(&self, token: &str) -> Result<String, StubError> {
        self.inner
            .read()
            .await
            .tokens
            .get(token)
            .cloned()
            .ok_or(StubError::Unauthorized)
    }

    /// Appends an event to a conversation and broadcasts it.
    ///
    /// Message and participant entries are also kept for the polling
    /// listing; typing indicators are transient.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation is unknown or closed.
    pub async fn append(
        &self,
        conversation_id: &str,
        label: StreamLabel,
        entry: ConversationEntry,
    ) -> Result<LoggedEvent, StubError> {
        let data = serde_json::to_string(&StreamEventData {
            conversation_entry: entry.clone(),
        })
        .map_err(|e| StubError::Encode(e.to_string()))?;

        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StubError::UnknownConversation(conversation_id.to_owned()))?;
        let Some(events) = &conversation.events else {
            return Err(StubError::ConversationClosed(conversation_id.to_owned()));
        };

        let event = LoggedEvent {
            id: conversation.log.len() as u64 + 1,
            label,
            data,
        };
        // No receivers is fine; the event is still logged for replay.
        let _ = events.send(event.clone());
        conversation.log.push(event.clone());
        if matches!(entry.entry_type, EntryType::Message | EntryType::ParticipantChanged) {
            conversation.entries.push(entry);
        }
        Ok(event)
    }

    /// Subscribes to a conversation's events.
    ///
    /// Returns the logged events after `after` (all of them when `None`)
    /// and a receiver for everything emitted from now on. Both are taken
    /// under one lock so nothing falls between them.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown token or a closed conversation.
    pub async fn subscribe(
        &self,
        token: &str,
        after: Option<u64>,
    ) -> Result<(Vec<LoggedEvent>, broadcast::Receiver<LoggedEvent>), StubError> {
        let inner = self.inner.read().await;
        let conversation_id = inner.tokens.get(token).ok_or(StubError::Unauthorized)?;
        let conversation = inner
            .conversations
            .get(conversation_id)
            .ok_or_else(|| StubError::UnknownConversation(conversation_id.clone()))?;
        let Some(events) = &conversation.events else {
            return Err(StubError::ConversationClosed(conversation_id.clone()));
        };
        let after = after.unwrap_or(0);
        let replay = conversation
            .log
            .iter()
            .filter(|e| e.id > after)
            .cloned()
            .collect();
        Ok((replay, events.subscribe()))
    }

    /// Lists the message and participant entries of a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not own the conversation.
    pub async fn entries(&self, token: &str, conversation_id: &str) -> Result<Vec<ConversationEntry>, StubError> {
        let mut inner = self.inner.write().await;
        Ok(inner.owned(token, conversation_id)?.entries.clone())
    }

    /// Checks that `token` owns an open `conversation_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not own the conversation or it
    /// has been closed.
    pub async fn ensure_open(&self, token: &str, conversation_id: &str) -> Result<(), StubError> {
        let mut inner = self.inner.write().await;
        if inner.owned(token, conversation_id)?.is_closed() {
            return Err(StubError::ConversationClosed(conversation_id.to_owned()));
        }
        Ok(())
    }

    /// Closes a conversation, ending every live event stream. Closing an
    /// already closed conversation succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not own the conversation.
    pub async fn close(&self, token: &str, conversation_id: &str) -> Result<(), StubError> {
        let mut inner = self.inner.write().await;
        inner.owned(token, conversation_id)?.events = None;
        Ok(())
    }

    /// Whether the conversation has been closed. `None` if unknown.
    pub async fn is_closed(&self, conversation_id: &str) -> Option<bool> {
        self.inner
            .read()
            .await
            .conversations
            .get(conversation_id)
            .map(Conversation::is_closed)
    }

    /// Records that the agent joined; returns `true` the first time only.
    pub async fn mark_agent_joined(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(conversation_id) {
            Some(conversation) if !conversation.agent_joined => {
                conversation.agent_joined = true;
                true
            }
            _ => false,
        }
    }

    /// Number of live event-stream subscribers of a conversation.
    pub async fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .read()
            .await
            .conversations
            .get(conversation_id)
            .and_then(|c| c.events.as_ref())
            .map_or(0, broadcast::Sender::receiver_count)
    }
}
