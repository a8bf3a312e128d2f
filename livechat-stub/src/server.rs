//! Stub server core: shared state, HTTP handlers and the scripted agent.
//!
//! Implements the proxy endpoints the client uses (`/initialize`, `/send`,
//! `/close`, `/events`, `/entries`) over a [`ConversationStore`]. Tests and
//! local runs drive the agent side through `/inject` or
//! [`StubState::inject`]; optionally every user message gets a canned
//! reply after a short typing indicator.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use livechat_proto::credentials::{CloseRequest, InitializeResponse, SendRequest};
use livechat_proto::entry::{
    ConversationEntry, EntriesResponse, EntryType, Participant, ParticipantChange,
    ParticipantOperation, ParticipantRole, Sender, message_payload, participant_payload,
};
use livechat_proto::stream::StreamLabel;

use crate::store::{ConversationStore, LoggedEvent, StubError};

/// Canned agent behavior for local runs.
#[derive(Debug, Clone)]
pub struct AutoReply {
    /// Prepended to the user's text to form the reply.
    pub prefix: String,
    /// How long the agent "types" before replying.
    pub delay: Duration,
    /// Display name announced when the agent joins.
    pub agent_name: String,
}

/// Shared stub server state.
#[derive(Default)]
pub struct StubState {
    /// Every conversation the stub knows about.
    pub store: ConversationStore,
    auto_reply: Option<AutoReply>,
}

/// Something the agent side does in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Injection {
    /// The agent sends a message.
    AgentMessage {
        /// Message text.
        text: String,
        /// Sender name, if any.
        #[serde(default)]
        display_name: Option<String>,
    },
    /// A participant joins or leaves.
    Participant {
        /// Join or leave.
        operation: ParticipantOperation,
        /// Role of the participant.
        role: ParticipantRole,
        /// Name shown to the end user.
        display_name: String,
    },
    /// The agent starts typing.
    TypingStarted,
    /// The agent stops typing.
    TypingStopped,
}

/// Body of the `/inject` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectRequest {
    /// Target conversation.
    pub conversation_id: String,
    /// What happens.
    #[serde(flatten)]
    pub injection: Injection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntriesQuery {
    conversation_id: String,
}

impl StubState {
    /// Creates a state without auto-replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state that answers every user message.
    #[must_use]
    pub fn with_auto_reply(auto_reply: AutoReply) -> Self {
        Self {
            store: ConversationStore::new(),
            auto_reply: Some(auto_reply),
        }
    }

    /// Applies an agent-side action to a conversation and broadcasts it.
    ///
    /// Returns the identifier of the entry that was emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation is unknown or closed.
    pub async fn inject(&self, conversation_id: &str, injection: Injection) -> Result<String, StubError> {
        let (label, entry) = match injection {
            Injection::AgentMessage { text, display_name } => {
                let mut entry = new_entry(EntryType::Message, ParticipantRole::Chatbot, message_payload(&text));
                entry.sender_display_name = display_name;
                (StreamLabel::Message, entry)
            }
            Injection::Participant {
                operation,
                role,
                display_name,
            } => {
                let change = ParticipantChange {
                    operation,
                    participant: Participant { role },
                    display_name,
                };
                let payload = participant_payload(&[change]);
                (
                    StreamLabel::ParticipantChanged,
                    new_entry(EntryType::ParticipantChanged, ParticipantRole::System, payload),
                )
            }
            Injection::TypingStarted => (
                StreamLabel::TypingStarted,
                new_entry(EntryType::TypingStartedIndicator, ParticipantRole::Chatbot, serde_json::Value::Null),
            ),
            Injection::TypingStopped => (
                StreamLabel::TypingStopped,
                new_entry(EntryType::TypingStoppedIndicator, ParticipantRole::Chatbot, serde_json::Value::Null),
            ),
        };
        let identifier = entry.identifier.clone();
        self.store.append(conversation_id, label, entry).await?;
        Ok(identifier)
    }
}

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownConversation(_) => StatusCode::NOT_FOUND,
            Self::ConversationClosed(_) => StatusCode::CONFLICT,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn new_entry(entry_type: EntryType, role: ParticipantRole, payload: serde_json::Value) -> ConversationEntry {
    ConversationEntry {
        identifier: Uuid::now_v7().to_string(),
        entry_type,
        sender: Sender { role },
        sender_display_name: None,
        entry_payload: payload,
        client_timestamp: Some(now_millis()),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, StubError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StubError::Unauthorized)
}

fn resume_cursor(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn to_sse(event: LoggedEvent) -> Event {
    Event::default()
        .event(event.label.as_str())
        .id(event.id.to_string())
        .data(event.data)
}

async fn initialize(State(state): State<Arc<StubState>>) -> Json<InitializeResponse> {
    let response = state.store.create().await;
    tracing::info!(conversation_id = ?response.conversation_id, "conversation opened");
    Json(response)
}

async fn send(
    State(state): State<Arc<StubState>>,
    Json(request): Json<SendRequest>,
) -> Result<StatusCode, StubError> {
    state
        .store
        .ensure_open(&request.access_token, &request.conversation_id)
        .await?;
    let entry = new_entry(
        EntryType::Message,
        ParticipantRole::EndUser,
        message_payload(&request.message),
    );
    state
        .store
        .append(&request.conversation_id, StreamLabel::Message, entry)
        .await?;
    tracing::debug!(conversation_id = %request.conversation_id, "user message received");

    if state.auto_reply.is_some() {
        tokio::spawn(auto_reply(
            Arc::clone(&state),
            request.conversation_id,
            request.message,
        ));
    }
    Ok(StatusCode::ACCEPTED)
}

async fn close(
    State(state): State<Arc<StubState>>,
    Json(request): Json<CloseRequest>,
) -> Result<StatusCode, StubError> {
    state
        .store
        .close(&request.access_token, &request.conversation_id)
        .await?;
    tracing::info!(conversation_id = %request.conversation_id, "conversation closed");
    Ok(StatusCode::NO_CONTENT)
}

async fn events(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StubError> {
    let token = bearer_token(&headers)?;
    let (replay, rx) = state.store.subscribe(token, resume_cursor(&headers)).await?;
    tracing::debug!(replayed = replay.len(), "event stream subscribed");

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let stream = stream::iter(replay)
        .chain(live)
        .map(|event| Ok(to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn entries(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, StubError> {
    let token = bearer_token(&headers)?;
    let conversation_entries = state.store.entries(token, &query.conversation_id).await?;
    Ok(Json(EntriesResponse {
        conversation_entries,
    }))
}

async fn inject(
    State(state): State<Arc<StubState>>,
    Json(request): Json<InjectRequest>,
) -> Result<Json<serde_json::Value>, StubError> {
    let identifier = state
        .inject(&request.conversation_id, request.injection)
        .await?;
    Ok(Json(serde_json::json!({ "identifier": identifier })))
}

/// Background task: announce the agent once, "type", then echo the message.
async fn auto_reply(state: Arc<StubState>, conversation_id: String, text: String) {
    let Some(reply) = state.auto_reply.clone() else {
        return;
    };

    if state.store.mark_agent_joined(&conversation_id).await {
        let joined = Injection::Participant {
            operation: ParticipantOperation::Add,
            role: ParticipantRole::Chatbot,
            display_name: reply.agent_name.clone(),
        };
        if let Err(e) = state.inject(&conversation_id, joined).await {
            tracing::debug!(error = %e, "auto-reply skipped");
            return;
        }
    }

    let script = [
        Injection::TypingStarted,
        Injection::AgentMessage {
            text: format!("{}{text}", reply.prefix),
            display_name: Some(reply.agent_name.clone()),
        },
        Injection::TypingStopped,
    ];
    for (step, injection) in script.into_iter().enumerate() {
        if step == 1 {
            tokio::time::sleep(reply.delay).await;
        }
        if let Err(e) = state.inject(&conversation_id, injection).await {
            tracing::debug!(error = %e, "auto-reply skipped");
            return;
        }
    }
}

/// Builds the stub router.
pub fn router(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/initialize", post(initialize))
        .route("/send", post(send))
        .route("/close", post(close))
        .route("/events", get(events))
        .route("/entries", get(entries))
        .route("/inject", post(inject))
        .with_state(state)
}

/// Starts the stub server on the given address with a default state.
///
/// Returns the actual bound address (useful when binding to port 0) and
/// a [`tokio::task::JoinHandle`] for the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StubState::new())).await
}

/// Starts the stub server with a pre-configured [`StubState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "stub server error");
        }
    });

    Ok((bound_addr, handle))
}
