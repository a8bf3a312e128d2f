//! Polling transport.
//!
//! Pulls the recent-entries listing once immediately and then on a fixed
//! interval. Entries not seen before are surfaced as
//! [`DomainEvent::MessageReceived`]; polling has no typing or presence
//! capability, so those events are simply never produced.
//!
//! There is no handshake: the transport reports
//! [`DomainEvent::ConnectionOpened`] as soon as polling begins. A failing
//! cycle reports [`DomainEvent::ConnectionFailed`] once, polling continues,
//! and the next successful cycle reports the connection open again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use livechat_proto::credentials::Credentials;

use super::{DomainEvent, EventQueue, EventSink, Transport, TransportError, TransportKind};
use crate::backend::Backend;
use crate::normalize::normalize_polled_entry;
use crate::session::store::KnownIds;

/// Lower bound on the poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// [`Transport`] that repeatedly pulls the entries listing.
pub struct PollTransport<B: Backend> {
    backend: Arc<B>,
    credentials: Credentials,
    known_ids: KnownIds,
    interval: Duration,
    queue: EventQueue,
    /// Held until [`Transport::open`] hands it to the poll task.
    sink: Option<EventSink>,
}

impl<B: Backend> PollTransport<B> {
    /// Creates a poll transport for one session. Nothing is fetched until
    /// [`Transport::open`] is called.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        credentials: Credentials,
        known_ids: KnownIds,
        interval: Duration,
        event_buffer: usize,
    ) -> Self {
        let (queue, sink) = EventQueue::new(event_buffer);
        Self {
            backend,
            credentials,
            known_ids,
            interval: interval.max(MIN_POLL_INTERVAL),
            queue,
            sink: Some(sink),
        }
    }

    /// Effective interval between poll cycles.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl<B: Backend> Transport for PollTransport<B> {
    fn open(&mut self) {
        let Some(sink) = self.sink.take() else {
            tracing::debug!("poll transport already opened");
            return;
        };
        let task = tokio::spawn(run_poll(
            Arc::clone(&self.backend),
            self.credentials.clone(),
            sink,
            self.known_ids.clone(),
            self.interval,
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
                "stopping poll loop"
            );
        }
        self.sink = None;
        self.queue.close();
    }

    fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }
}

/// Background task: poll until the consumer goes away or the task is aborted.
async fn run_poll<B: Backend>(
    backend: Arc<B>,
    credentials: Credentials,
    sink: EventSink,
    known_ids: KnownIds,
    interval: Duration,
) {
    if !sink.emit(DomainEvent::ConnectionOpened).await {
        return;
    }
    tracing::info!(
        conversation_id = %credentials.conversation_id,
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "polling started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Ids already handed to the consumer by this transport. Entries the
    // session chose not to store (end-user echoes) are never in the store's
    // id set, so this keeps them from being re-emitted every cycle.
    let mut emitted: HashSet<String> = HashSet::new();
    let mut failing = false;

    loop {
        // The first tick completes immediately.
        ticker.tick().await;

        match backend.fetch_entries(&credentials).await {
            Ok(entries) => {
                if failing {
                    failing = false;
                    tracing::info!("poll recovered");
                    if !sink.emit(DomainEvent::ConnectionOpened).await {
                        return;
                    }
                }
                for entry in entries {
                    if emitted.contains(&entry.identifier) || known_ids.contains(&entry.identifier) {
                        continue;
                    }
                    emitted.insert(entry.identifier.clone());
                    if let Some(event) = normalize_polled_entry(&entry)
                        && !sink.emit(event).await
                    {
                        return;
                    }
                }
            }
            Err(e) => {
                let err = TransportError::Poll(e);
                tracing::warn!(error = %err, "poll cycle failed");
                if !failing {
                    failing = true;
                    if !sink.emit(DomainEvent::ConnectionFailed(err.to_string())).await {
                        return;
                    }
                }
            }
        }
    }
}
