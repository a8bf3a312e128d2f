//! Transport layer for receiving conversation events.
//!
//! Defines the [`Transport`] trait that both delivery strategies satisfy.
//! Concrete implementations:
//! - [`stream::StreamTransport`]: one long-lived server-push connection
//! - [`poll::PollTransport`]: fixed-interval pulls of recent entries
//!
//! [`SessionTransport`] wraps whichever strategy the configuration selects,
//! so the session controller holds a single type and never branches on the
//! variant in use.

pub mod poll;
pub mod stream;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use livechat_proto::credentials::Credentials;
use livechat_proto::entry::{ConversationEntry, ParticipantChange};

use crate::backend::{Backend, BackendError};
use crate::session::store::KnownIds;

use poll::PollTransport;
use stream::StreamTransport;

/// Normalized notification produced by a transport, independent of the
/// underlying delivery mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// The transport is ready to deliver events.
    ConnectionOpened,
    /// The transport lost (or could not establish) its connection.
    ConnectionFailed(String),
    /// A conversation message arrived.
    MessageReceived(ConversationEntry),
    /// Participants joined or left, in backend order.
    ParticipantChanged(Vec<ParticipantChange>),
    /// The remote side started typing.
    TypingStarted,
    /// The remote side stopped typing.
    TypingStopped,
}

/// Which delivery strategy a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Server-push event stream.
    #[default]
    Stream,
    /// Interval polling of recent entries.
    Poll,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Errors reported by transports as [`DomainEvent::ConnectionFailed`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server-push connection could not be opened.
    #[error("subscribe failed: {0}")]
    Subscribe(BackendError),

    /// Reading the server-push connection failed.
    #[error("event stream failed: {0}")]
    Stream(BackendError),

    /// The server closed the event stream.
    #[error("event stream ended")]
    StreamEnded,

    /// A poll cycle failed.
    #[error("poll failed: {0}")]
    Poll(BackendError),
}

/// Default interval between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default capacity of the transport event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Transport selection and tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Delivery strategy.
    pub kind: TransportKind,
    /// Interval between poll cycles (poll strategy only).
    pub poll_interval: Duration,
    /// Capacity of the channel between the background task and the consumer.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// A pluggable strategy for receiving conversation events.
///
/// # Invariant
///
/// Once [`Transport::close`] has been called, [`Transport::next_event`]
/// returns `None` forever, even if requests issued before the close resolve
/// afterwards. `close` may be called any number of times.
pub trait Transport: Send {
    /// Start delivering events. Calling `open` more than once has no effect.
    fn open(&mut self);

    /// Wait for the next event. Returns `None` once the transport is closed
    /// or its background task has finished.
    fn next_event(&mut self) -> impl std::future::Future<Output = Option<DomainEvent>> + Send;

    /// Stop delivering events and cancel any in-flight work.
    fn close(&mut self);

    /// Whether [`Transport::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Resume cursor of the last event seen, for strategies that have one.
    fn cursor(&self) -> Option<String> {
        None
    }

    /// Which strategy this is.
    fn kind(&self) -> TransportKind;
}

/// Sending half held by a transport's background task.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<DomainEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    /// Deliver an event unless the transport has been closed.
    ///
    /// Returns `false` when the consumer is gone and the task should stop.
    pub(crate) async fn emit(&self, event: DomainEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }
}

/// Receiving half owned by the transport, plus the background task handle.
pub(crate) struct EventQueue {
    rx: mpsc::Receiver<DomainEvent>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl EventQueue {
    pub(crate) fn new(buffer: usize) -> (Self, EventSink) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let sink = EventSink {
            tx,
            closed: Arc::clone(&closed),
        };
        let queue = Self {
            rx,
            closed,
            task: None,
        };
        (queue, sink)
    }

    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    pub(crate) async fn next(&mut self) -> Option<DomainEvent> {
        if self.is_closed() {
            return None;
        }
        let event = self.rx.recv().await;
        if self.is_closed() { None } else { event }
    }

    pub(crate) fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// The transport of one session, whichever strategy was selected.
pub enum SessionTransport<B: Backend> {
    /// Server-push strategy.
    Stream(StreamTransport<B>),
    /// Polling strategy.
    Poll(PollTransport<B>),
}

impl<B: Backend> SessionTransport<B> {
    /// Builds the transport selected by `config` for one session.
    ///
    /// `known_ids` is the message store's view of ingested message ids;
    /// the polling strategy consults it to skip entries already shown.
    #[must_use]
    pub fn new(
        config: &TransportConfig,
        backend: Arc<B>,
        credentials: Credentials,
        known_ids: KnownIds,
    ) -> Self {
        match config.kind {
            TransportKind::Stream => {
                Self::Stream(StreamTransport::new(backend, credentials, config.event_buffer))
            }
            TransportKind::Poll => Self::Poll(PollTransport::new(
                backend,
                credentials,
                known_ids,
                config.poll_interval,
                config.event_buffer,
            )),
        }
    }
}

impl<B: Backend> Transport for SessionTransport<B> {
    fn open(&mut self) {
        match self {
            Self::Stream(t) => t.open(),
            Self::Poll(t) => t.open(),
        }
    }

    async fn next_event(&mut self) -> Option<DomainEvent> {
        match self {
            Self::Stream(t) => t.next_event().await,
            Self::Poll(t) => t.next_event().await,
        }
    }

    fn close(&mut self) {
        match self {
            Self::Stream(t) => t.close(),
            Self::Poll(t) => t.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::Stream(t) => t.is_closed(),
            Self::Poll(t) => t.is_closed(),
        }
    }

    fn cursor(&self) -> Option<String> {
        match self {
            Self::Stream(t) => t.cursor(),
            Self::Poll(t) => t.cursor(),
        }
    }

    fn kind(&self) -> TransportKind {
        match self {
            Self::Stream(t) => t.kind(),
            Self::Poll(t) => t.kind(),
        }
    }
}
