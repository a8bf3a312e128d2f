//! In-process backend for testing.
//!
//! [`MemoryBackend`] keeps the conversation in memory and lets a test
//! script every side of it: push labeled stream events, append entries for
//! the polling listing, inject failures per operation and add latency.
//! Sent messages are recorded and echoed back as end-user entries the way
//! the real proxy does.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use livechat_proto::credentials::Credentials;
use livechat_proto::entry::{
    ConversationEntry, EntryType, Participant, ParticipantChange, ParticipantOperation,
    ParticipantRole, Sender, message_payload, participant_payload,
};
use livechat_proto::stream::{StreamEventData, StreamLabel};

use super::{Backend, BackendError, EventByteStream};

/// Identifies a backend operation for failure and latency injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`Backend::initialize`].
    Initialize,
    /// [`Backend::send_message`].
    Send,
    /// [`Backend::close_chat`].
    Close,
    /// [`Backend::subscribe`].
    Subscribe,
    /// [`Backend::fetch_entries`].
    FetchEntries,
}

type Subscriber = mpsc::UnboundedSender<Result<Vec<u8>, BackendError>>;

#[derive(Default)]
struct MemoryState {
    failures: HashMap<Operation, String>,
    delays: HashMap<Operation, Duration>,
    calls: HashMap<Operation, usize>,
    entries: Vec<ConversationEntry>,
    sent: Vec<String>,
    subscribers: Vec<Subscriber>,
    last_subscribe_cursor: Option<String>,
    next_conversation: u32,
    next_event_id: u64,
    next_entry_id: u64,
}

/// Scriptable in-memory [`Backend`].
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Creates a backend where every operation succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` fail with `reason` until cleared.
    pub fn fail(&self, operation: Operation, reason: &str) {
        self.state.lock().failures.insert(operation, reason.to_owned());
    }

    /// Clears an injected failure.
    pub fn succeed(&self, operation: Operation) {
        self.state.lock().failures.remove(&operation);
    }

    /// Delays every call of `operation` by `delay` before it resolves.
    pub fn delay(&self, operation: Operation, delay: Duration) {
        self.state.lock().delays.insert(operation, delay);
    }

    /// Number of times `operation` has been invoked.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Contents of every successfully sent message, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Resume cursor passed to the most recent subscribe call.
    #[must_use]
    pub fn last_subscribe_cursor(&self) -> Option<String> {
        self.state.lock().last_subscribe_cursor.clone()
    }

    /// Number of stream subscribers still attached.
    #[must_use]
    pub fn live_subscribers(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Appends an entry to the listing returned by `fetch_entries`.
    pub fn add_entry(&self, entry: ConversationEntry) {
        self.state.lock().entries.push(entry);
    }

    /// Pushes a labeled event carrying `entry` to every stream subscriber.
    pub fn push_event(&self, label: &StreamLabel, entry: ConversationEntry) {
        let data = StreamEventData {
            conversation_entry: entry,
        };
        let body = serde_json::to_string(&data).unwrap_or_default();
        let mut state = self.state.lock();
        state.next_event_id += 1;
        let frame = format!(
            "event: {label}\nid: {}\ndata: {body}\n\n",
            state.next_event_id
        );
        broadcast(&mut state, frame.into_bytes());
    }

    /// Pushes raw bytes to every stream subscriber, bypassing encoding.
    pub fn push_raw(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        broadcast(&mut state, bytes.to_vec());
    }

    /// Fails every open stream with `reason` and detaches the subscribers.
    pub fn break_streams(&self, reason: &str) {
        let mut state = self.state.lock();
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(Err(BackendError::Stream(reason.to_owned())));
        }
    }

    /// Ends every open stream cleanly.
    pub fn end_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    async fn enter(&self, operation: Operation) -> Result<(), BackendError> {
        let delay = {
            let mut state = self.state.lock();
            *state.calls.entry(operation).or_default() += 1;
            state.delays.get(&operation).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().failures.get(&operation) {
            Some(reason) => Err(BackendError::Status {
                status: 500,
                body: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Builds an agent-side message entry.
#[must_use]
pub fn agent_message(id: &str, text: &str) -> ConversationEntry {
    ConversationEntry {
        identifier: id.to_owned(),
        entry_type: EntryType::Message,
        sender: Sender {
            role: ParticipantRole::Chatbot,
        },
        sender_display_name: Some("Agent".into()),
        entry_payload: message_payload(text),
        client_timestamp: Some(chrono::Utc::now().timestamp_millis().unsigned_abs()),
    }
}

/// Builds a participant-changed entry from `(operation, role, display name)` triples.
#[must_use]
pub fn participant_entry(
    id: &str,
    changes: &[(ParticipantOperation, ParticipantRole, &str)],
) -> ConversationEntry {
    let changes: Vec<ParticipantChange> = changes
        .iter()
        .map(|(operation, role, name)| ParticipantChange {
            operation: *operation,
            participant: Participant { role: role.clone() },
            display_name: (*name).to_owned(),
        })
        .collect();
    ConversationEntry {
        identifier: id.to_owned(),
        entry_type: EntryType::ParticipantChanged,
        sender: Sender {
            role: ParticipantRole::System,
        },
        sender_display_name: None,
        entry_payload: participant_payload(&changes),
        client_timestamp: None,
    }
}

/// Builds a typing indicator entry.
#[must_use]
pub fn typing_entry(id: &str, started: bool) -> ConversationEntry {
    ConversationEntry {
        identifier: id.to_owned(),
        entry_type: if started {
            EntryType::TypingStartedIndicator
        } else {
            EntryType::TypingStoppedIndicator
        },
        sender: Sender {
            role: ParticipantRole::Agent,
        },
        sender_display_name: None,
        entry_payload: serde_json::Value::Null,
        client_timestamp: None,
    }
}

fn broadcast(state: &mut MemoryState, bytes: Vec<u8>) {
    state
        .subscribers
        .retain(|tx| tx.send(Ok(bytes.clone())).is_ok());
}

impl Backend for MemoryBackend {
    async fn initialize(&self) -> Result<Credentials, BackendError> {
        self.enter(Operation::Initialize).await?;
        let mut state = self.state.lock();
        state.next_conversation += 1;
        Ok(Credentials {
            access_token: format!("token-{}", state.next_conversation),
            conversation_id: format!("conversation-{}", state.next_conversation),
            org_id: "org-memory".into(),
            last_event_id: String::new(),
        })
    }

    async fn send_message(&self, _credentials: &Credentials, content: &str) -> Result<(), BackendError> {
        self.enter(Operation::Send).await?;
        let mut state = self.state.lock();
        state.next_entry_id += 1;
        let echo = ConversationEntry {
            identifier: format!("user-{}", state.next_entry_id),
            entry_type: EntryType::Message,
            sender: Sender {
                role: ParticipantRole::EndUser,
            },
            sender_display_name: None,
            entry_payload: message_payload(content),
            client_timestamp: None,
        };
        state.sent.push(content.to_owned());
        state.entries.push(echo);
        Ok(())
    }

    async fn close_chat(&self, _credentials: &Credentials) -> Result<(), BackendError> {
        self.enter(Operation::Close).await
    }

    async fn subscribe(&self, credentials: &Credentials) -> Result<EventByteStream, BackendError> {
        self.enter(Operation::Subscribe).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.last_subscribe_cursor = Some(credentials.last_event_id.clone());
            state.subscribers.push(tx);
        }
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn fetch_entries(&self, _credentials: &Credentials) -> Result<Vec<ConversationEntry>, BackendError> {
        self.enter(Operation::FetchEntries).await?;
        Ok(self.state.lock().entries.clone())
    }
}
