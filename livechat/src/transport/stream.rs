//! Server-push transport.
//!
//! Opens one long-lived `text/event-stream` connection per session. Every
//! labeled frame is normalized into at most one [`DomainEvent`]; frames
//! with unrecognized labels are skipped and malformed bodies are logged
//! and dropped without affecting the connection.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;

use livechat_proto::credentials::Credentials;
use livechat_proto::sse::{SseDecoder, SseFrame};
use livechat_proto::stream::StreamEvent;

use super::{DomainEvent, EventQueue, EventSink, Transport, TransportError, TransportKind};
use crate::backend::Backend;
use crate::normalize::normalize_stream_event;

/// [`Transport`] over the backend's server-push connection.
pub struct StreamTransport<B: Backend> {
    backend: Arc<B>,
    credentials: Credentials,
    queue: EventQueue,
    /// Held until [`Transport::open`] hands it to the reader task.
    sink: Option<EventSink>,
    /// Id of the last frame seen, shared with the reader task.
    cursor: Arc<Mutex<Option<String>>>,
}

impl<B: Backend> StreamTransport<B> {
    /// Creates a stream transport for one session. Nothing is sent until
    /// [`Transport::open`] is called.
    #[must_use]
    pub fn new(backend: Arc<B>, credentials: Credentials, event_buffer: usize) -> Self {
        let (queue, sink) = EventQueue::new(event_buffer);
        let cursor = (!credentials.last_event_id.is_empty())
            .then(|| credentials.last_event_id.clone());
        Self {
            backend,
            credentials,
            queue,
            sink: Some(sink),
            cursor: Arc::new(Mutex::new(cursor)),
        }
    }
}

impl<B: Backend> Transport for StreamTransport<B> {
    fn open(&mut self) {
        let Some(sink) = self.sink.take() else {
            tracing::debug!("stream transport already opened");
            return;
        };
        let task = tokio::spawn(run_stream(
            Arc::clone(&self.backend),
            self.credentials.clone(),
            sink,
            Arc::clone(&self.cursor),
        ));
        self.queue.attach(task);
    }

    async fn next_event(&mut self) -> Option<DomainEvent> {
        self.queue.next().await
    }

    fn close(&mut self) {
        if !self.queue.is_closed() {
            tracing::debug!(
                conversation_id = %self.credentials.conversation_id,
                "closing event stream"
            );
        }
        self.sink = None;
        self.queue.close();
    }

    fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    fn cursor(&self) -> Option<String> {
        self.cursor.lock().clone()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }
}

/// Background task: read the event stream until it ends or fails.
async fn run_stream<B: Backend>(
    backend: Arc<B>,
    credentials: Credentials,
    sink: EventSink,
    cursor: Arc<Mutex<Option<String>>>,
) {
    let mut stream = match backend.subscribe(&credentials).await {
        Ok(stream) => stream,
        Err(e) => {
            let err = TransportError::Subscribe(e);
            tracing::warn!(error = %err, "event stream could not be opened");
            sink.emit(DomainEvent::ConnectionFailed(err.to_string())).await;
            return;
        }
    };

    tracing::info!(conversation_id = %credentials.conversation_id, "event stream connected");
    if !sink.emit(DomainEvent::ConnectionOpened).await {
        return;
    }

    let mut decoder = SseDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let err = TransportError::Stream(e);
                tracing::warn!(error = %err, "event stream read failed");
                sink.emit(DomainEvent::ConnectionFailed(err.to_string())).await;
                return;
            }
        };
        for frame in decoder.push(&chunk) {
            if !forward_frame(frame, &sink, &cursor).await {
                return;
            }
        }
    }

    if let Some(frame) = decoder.finish()
        && !forward_frame(frame, &sink, &cursor).await
    {
        return;
    }

    tracing::info!(conversation_id = %credentials.conversation_id, "event stream ended");
    sink.emit(DomainEvent::ConnectionFailed(
        TransportError::StreamEnded.to_string(),
    ))
    .await;
}

/// Normalize one frame and hand it to the consumer.
///
/// Returns `false` when the consumer is gone.
async fn forward_frame(frame: SseFrame, sink: &EventSink, cursor: &Mutex<Option<String>>) -> bool {
    let event = StreamEvent::from_frame(frame);
    if let Some(ref id) = event.id {
        *cursor.lock() = Some(id.clone());
    }

    match normalize_stream_event(&event) {
        Ok(Some(domain_event)) => sink.emit(domain_event).await,
        Ok(None) => {
            tracing::debug!(label = %event.label, "ignoring unrecognized stream event");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed stream event");
            true
        }
    }
}
