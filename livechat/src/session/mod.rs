//! Session lifecycle management.
//!
//! [`SessionController`] owns everything tied to one chat session: the
//! credentials, the transport, the message store, the roster and the
//! inactivity watchdog. All mutation goes through `&mut self`, so transport
//! events and user operations are serialized by whoever drives the
//! controller (see [`crate::net::spawn_session`]).

pub mod roster;
pub mod store;
pub mod watchdog;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use livechat_proto::credentials::Credentials;

use crate::backend::Backend;
use crate::transport::{DomainEvent, SessionTransport, Transport, TransportConfig, TransportKind};

use roster::Roster;
use store::{Message, MessageKind, MessageStore};
use watchdog::{DEFAULT_INACTIVITY_TIMEOUT, Watchdog};

/// Notice appended when the watchdog closes an idle session.
pub const INACTIVITY_NOTICE: &str = "Chat ended due to inactivity";

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No session has been started.
    #[default]
    Idle,
    /// Credentials are being acquired or the transport is connecting.
    Initializing,
    /// The transport is open and events are flowing.
    Active,
    /// A user-requested close is in progress.
    Closing,
    /// The session ended, by request or by inactivity.
    Closed,
    /// The session could not be started.
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failures surfaced by the session controller.
///
/// Every variant is caught where the operation was issued and turned into
/// the controller's `error` field plus a status transition; none of them
/// stops the session loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Credentials could not be acquired. Not retried.
    #[error("could not start chat: {0}")]
    Initialization(String),

    /// The transport lost its connection. History is kept.
    #[error("connection problem: {0}")]
    Transport(String),

    /// A message was rejected and rolled back.
    #[error("message not sent: {0}")]
    Send(String),

    /// The backend close call failed. Local teardown still happened.
    #[error("could not close chat: {0}")]
    Close(String),

    /// An inbound event could not be decoded and was dropped.
    #[error("malformed event: {0}")]
    Parse(String),
}

/// Tuning for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transport selection and tuning.
    pub transport: TransportConfig,
    /// Idle time after which the session is closed.
    pub inactivity_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }
}

/// Snapshot of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    /// Messages in arrival order.
    pub messages: Vec<Message>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Whether the transport currently has a working connection.
    pub connected: bool,
    /// Whether the UI should show a progress indicator.
    pub loading: bool,
    /// Whether the agent is typing.
    pub typing: bool,
    /// Whether a sent message is still awaiting a reply.
    pub response_pending: bool,
    /// Display name of the agent in the conversation.
    pub current_agent: Option<String>,
    /// Last surfaced error.
    pub error: Option<String>,
}

/// One unit of work for the controller, produced by [`SessionController::next_input`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// The transport delivered an event.
    Event(DomainEvent),
    /// The transport's event sequence finished.
    TransportEnded,
    /// The inactivity watchdog fired.
    InactivityTimeout,
}

/// Controller for one chat session.
pub struct SessionController<B: Backend> {
    backend: Arc<B>,
    config: SessionConfig,
    status: SessionStatus,
    credentials: Option<Credentials>,
    transport: Option<SessionTransport<B>>,
    store: MessageStore,
    roster: Roster,
    watchdog: Watchdog,
    connected: bool,
    typing: bool,
    response_pending: bool,
    error: Option<SessionError>,
    last_activity_at: Option<DateTime<Utc>>,
    observer: Option<watch::Sender<SessionView>>,
}

impl<B: Backend> SessionController<B> {
    /// Creates an idle controller. Nothing touches the backend until
    /// [`SessionController::start`].
    #[must_use]
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        let watchdog = Watchdog::new(config.inactivity_timeout);
        Self {
            backend,
            config,
            status: SessionStatus::Idle,
            credentials: None,
            transport: None,
            store: MessageStore::new(),
            roster: Roster::new(),
            watchdog,
            connected: false,
            typing: false,
            response_pending: false,
            error: None,
            last_activity_at: None,
            observer: None,
        }
    }

    /// Publishes a [`SessionView`] on `observer` after every state change.
    #[must_use]
    pub fn with_observer(mut self, observer: watch::Sender<SessionView>) -> Self {
        observer.send_replace(self.view());
        self.observer = Some(observer);
        self
    }

    /// Starts a fresh session.
    ///
    /// Any existing transport is closed first and all session-derived state
    /// is cleared; a restart never resumes the previous session. The
    /// session becomes [`SessionStatus::Active`] once the transport reports
    /// [`DomainEvent::ConnectionOpened`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Initialization`] if credentials could not be
    /// acquired; the status is then [`SessionStatus::Failed`].
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.stop_transport();
        self.watchdog.cancel();
        self.credentials = None;
        self.reset_derived();
        self.status = SessionStatus::Initializing;
        self.notify();

        let credentials = match self.backend.initialize().await {
            Ok(credentials) => credentials,
            Err(e) => {
                let err = SessionError::Initialization(e.to_string());
                tracing::warn!(error = %e, "session initialization failed");
                self.status = SessionStatus::Failed;
                self.error = Some(err.clone());
                self.notify();
                return Err(err);
            }
        };

        tracing::info!(
            conversation_id = %credentials.conversation_id,
            transport = %self.config.transport.kind,
            "session initialized"
        );
        let mut transport = SessionTransport::new(
            &self.config.transport,
            Arc::clone(&self.backend),
            credentials.clone(),
            self.store.known_ids(),
        );
        transport.open();
        self.transport = Some(transport);
        self.credentials = Some(credentials);
        self.notify();
        Ok(())
    }

    /// Sends a message, showing it optimistically until the backend answers.
    ///
    /// Does nothing without active credentials or for blank content. On
    /// failure the optimistic message is removed by its local id, so the
    /// store is left exactly as it was before the call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Send`] if the backend rejected the message.
    pub async fn send(&mut self, content: &str) -> Result<(), SessionError> {
        let Some(credentials) = self.credentials.clone() else {
            tracing::debug!(status = %self.status, "ignoring send without an active session");
            return Ok(());
        };
        if content.trim().is_empty() {
            return Ok(());
        }

        self.touch_activity();
        let message = Message::local(MessageKind::User, content);
        let local_id = message.id.clone();
        self.store.push_local(message);
        self.response_pending = true;
        self.notify();

        match self.backend.send_message(&credentials, content).await {
            Ok(()) => {
                tracing::debug!(message_id = %local_id, "message sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(message_id = %local_id, error = %e, "send failed, rolling back");
                self.store.remove(&local_id);
                self.response_pending = false;
                let err = SessionError::Send(e.to_string());
                self.error = Some(err.clone());
                self.notify();
                Err(err)
            }
        }
    }

    /// Ends the session and invokes `on_closed` once local state is gone.
    ///
    /// The transport is stopped before the backend is contacted, so no
    /// event is accepted once closing begins. The backend close call is
    /// best effort: local teardown and the callback happen whether or not
    /// it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Close`] if the backend close call failed.
    /// The session is [`SessionStatus::Closed`] regardless.
    pub async fn close(&mut self, on_closed: impl FnOnce()) -> Result<(), SessionError> {
        if matches!(self.status, SessionStatus::Idle | SessionStatus::Closed) {
            self.stop_transport();
            self.watchdog.cancel();
            self.credentials = None;
            self.reset_derived();
            on_closed();
            self.notify();
            return Ok(());
        }

        self.status = SessionStatus::Closing;
        self.stop_transport();
        self.watchdog.cancel();
        self.notify();

        let result = match self.credentials.take() {
            Some(credentials) => {
                tracing::info!(conversation_id = %credentials.conversation_id, "closing session");
                self.backend
                    .close_chat(&credentials)
                    .await
                    .map_err(|e| SessionError::Close(e.to_string()))
            }
            None => Ok(()),
        };

        self.reset_derived();
        self.status = SessionStatus::Closed;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "backend close failed, local state cleared anyway");
            self.error = Some(err.clone());
        }
        on_closed();
        self.notify();
        result
    }

    /// Waits for the next transport event or watchdog expiry.
    ///
    /// Returns `None` immediately when there is nothing to wait for (no
    /// transport and a disarmed watchdog). Cancel-safe.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        let watchdog = &self.watchdog;
        match self.transport.as_mut() {
            Some(transport) => {
                tokio::select! {
                    event = transport.next_event() => {
                        Some(event.map_or(SessionInput::TransportEnded, SessionInput::Event))
                    }
                    () = watchdog.expired() => Some(SessionInput::InactivityTimeout),
                }
            }
            None if watchdog.is_armed() => {
                watchdog.expired().await;
                Some(SessionInput::InactivityTimeout)
            }
            None => None,
        }
    }

    /// Applies one input produced by [`SessionController::next_input`].
    pub async fn apply(&mut self, input: SessionInput) {
        match input {
            SessionInput::Event(event) => {
                if let Err(err) = self.handle_event(event) {
                    tracing::warn!(error = %err, "dropping inbound event");
                }
            }
            SessionInput::TransportEnded => self.on_transport_ended(),
            SessionInput::InactivityTimeout => self.on_inactivity().await,
        }
    }

    /// Waits for and applies exactly one input.
    ///
    /// Returns `false` if there was nothing to wait for.
    pub async fn step(&mut self) -> bool {
        match self.next_input().await {
            Some(input) => {
                self.apply(input).await;
                true
            }
            None => false,
        }
    }

    /// Applies one transport event to the session state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Parse`] if a message entry could not be
    /// decoded. The event is dropped and no state changes.
    pub fn handle_event(&mut self, event: DomainEvent) -> Result<(), SessionError> {
        let result = match event {
            DomainEvent::ConnectionOpened => {
                self.on_connection_opened();
                Ok(())
            }
            DomainEvent::ConnectionFailed(reason) => {
                self.on_connection_failed(reason);
                Ok(())
            }
            DomainEvent::MessageReceived(entry) => match Message::from_entry(&entry) {
                Ok(Some(message)) => {
                    self.on_message(message);
                    Ok(())
                }
                Ok(None) => {
                    tracing::debug!(message_id = %entry.identifier, "skipping message without text");
                    Ok(())
                }
                Err(e) => Err(SessionError::Parse(format!("message {}: {e}", entry.identifier))),
            },
            DomainEvent::ParticipantChanged(changes) => {
                for change in &changes {
                    if let Some(notice) = self.roster.apply(change) {
                        self.store.push_local(Message::system(notice));
                    }
                }
                Ok(())
            }
            DomainEvent::TypingStarted => {
                self.touch_activity();
                if !self.response_pending {
                    self.typing = true;
                }
                Ok(())
            }
            DomainEvent::TypingStopped => {
                self.touch_activity();
                self.typing = false;
                Ok(())
            }
        };
        self.sync_cursor();
        self.notify();
        result
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while initializing or while a sent message awaits a reply.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Initializing || self.response_pending
    }

    #[must_use]
    pub const fn is_typing(&self) -> bool {
        self.typing
    }

    #[must_use]
    pub const fn is_response_pending(&self) -> bool {
        self.response_pending
    }

    #[must_use]
    pub fn current_agent(&self) -> Option<&str> {
        self.roster.current_agent()
    }

    /// Last surfaced error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// When the last inbound or outbound activity happened.
    #[must_use]
    pub const fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_activity_at
    }

    /// Credentials of the live session.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Strategy of the live transport, if one is running.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(Transport::kind)
    }

    /// Whether the inactivity watchdog is armed.
    #[must_use]
    pub const fn watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            messages: self.store.messages().to_vec(),
            status: self.status,
            connected: self.connected,
            loading: self.is_loading(),
            typing: self.typing,
            response_pending: self.response_pending,
            current_agent: self.roster.current_agent().map(str::to_owned),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }

    fn on_connection_opened(&mut self) {
        self.connected = true;
        if matches!(self.error, Some(SessionError::Transport(_))) {
            self.error = None;
        }
        if self.status == SessionStatus::Initializing {
            tracing::info!("session active");
            self.status = SessionStatus::Active;
            self.watchdog.reset();
        }
    }

    fn on_connection_failed(&mut self, reason: String) {
        self.connected = false;
        tracing::warn!(status = %self.status, reason = %reason, "transport connection failed");
        if self.status == SessionStatus::Initializing {
            self.stop_transport();
            self.watchdog.cancel();
            self.credentials = None;
            self.status = SessionStatus::Failed;
        }
        self.error = Some(SessionError::Transport(reason));
    }

    fn on_message(&mut self, message: Message) {
        self.touch_activity();
        match message.kind {
            // The optimistic copy is already shown.
            MessageKind::User => {
                tracing::trace!(message_id = %message.id, "skipping end-user echo");
            }
            MessageKind::Agent => {
                self.typing = false;
                self.response_pending = false;
                self.store.ingest(message);
            }
            MessageKind::System => {
                self.store.ingest(message);
            }
        }
    }

    fn on_transport_ended(&mut self) {
        tracing::debug!("transport event sequence finished");
        self.transport = None;
        self.connected = false;
        if self.status == SessionStatus::Initializing {
            self.watchdog.cancel();
            self.credentials = None;
            self.status = SessionStatus::Failed;
            self.error = Some(SessionError::Transport("connection closed before opening".into()));
        }
        self.notify();
    }

    async fn on_inactivity(&mut self) {
        self.watchdog.cancel();
        let Some(credentials) = self.credentials.clone() else {
            return;
        };
        tracing::info!(
            conversation_id = %credentials.conversation_id,
            timeout_secs = self.watchdog.timeout().as_secs(),
            "closing inactive session"
        );
        match self.backend.close_chat(&credentials).await {
            Ok(()) => {
                self.stop_transport();
                self.credentials = None;
                self.connected = false;
                self.typing = false;
                self.response_pending = false;
                self.status = SessionStatus::Closed;
                self.store.push_local(Message::system(INACTIVITY_NOTICE));
            }
            Err(e) => {
                tracing::warn!(error = %e, "inactivity close failed");
                self.error = Some(SessionError::Close(e.to_string()));
            }
        }
        self.notify();
    }

    fn touch_activity(&mut self) {
        self.last_activity_at = Some(Utc::now());
        if self.status == SessionStatus::Active {
            self.watchdog.reset();
        }
    }

    fn sync_cursor(&mut self) {
        if let (Some(transport), Some(credentials)) = (&self.transport, &mut self.credentials)
            && let Some(cursor) = transport.cursor()
        {
            credentials.last_event_id = cursor;
        }
    }

    fn stop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    fn reset_derived(&mut self) {
        self.store = MessageStore::new();
        self.roster.clear();
        self.connected = false;
        self.typing = false;
        self.response_pending = false;
        self.error = None;
        self.last_activity_at = None;
    }

    fn notify(&self) {
        if let Some(observer) = &self.observer {
            observer.send_replace(self.view());
        }
    }
}
