//! Event normalization.
//!
//! Maps transport-specific raw input into [`DomainEvent`]s. Everything
//! downstream of this module sees only the normalized union and never
//! inspects stream labels or listing shapes.

use livechat_proto::codec::CodecError;
use livechat_proto::entry::{ConversationEntry, EntryType};
use livechat_proto::stream::{StreamEvent, StreamLabel};

use crate::transport::DomainEvent;

/// A labeled stream event whose body could not be decoded.
///
/// The single event is dropped; the transport and session carry on.
#[derive(Debug, thiserror::Error)]
#[error("malformed {label} event: {source}")]
pub struct ParseFailure {
    /// Label of the offending event.
    pub label: String,
    /// Underlying decode error.
    #[source]
    pub source: CodecError,
}

impl ParseFailure {
    fn new(label: &StreamLabel, source: CodecError) -> Self {
        Self {
            label: label.to_string(),
            source,
        }
    }
}

/// Normalizes one labeled server-push event.
///
/// Returns `Ok(None)` for labels this client does not handle; those are
/// ignored rather than treated as errors. Typing indicators carry no
/// information beyond their label, so their bodies are not decoded.
///
/// # Errors
///
/// Returns [`ParseFailure`] if a message or participant-changed body is
/// malformed.
pub fn normalize_stream_event(event: &StreamEvent) -> Result<Option<DomainEvent>, ParseFailure> {
    match &event.label {
        StreamLabel::Message => {
            let entry = event
                .entry()
                .map_err(|e| ParseFailure::new(&event.label, e))?;
            Ok(Some(DomainEvent::MessageReceived(entry)))
        }
        StreamLabel::ParticipantChanged => {
            let changes = event
                .entry()
                .and_then(|entry| entry.participant_changes())
                .map_err(|e| ParseFailure::new(&event.label, e))?;
            Ok(Some(DomainEvent::ParticipantChanged(changes)))
        }
        StreamLabel::TypingStarted => Ok(Some(DomainEvent::TypingStarted)),
        StreamLabel::TypingStopped => Ok(Some(DomainEvent::TypingStopped)),
        StreamLabel::Unrecognized(_) => Ok(None),
    }
}

/// Normalizes one entry returned by the polling listing.
///
/// Only message entries are surfaced; polling has no typing or presence
/// capability.
#[must_use]
pub fn normalize_polled_entry(entry: &ConversationEntry) -> Option<DomainEvent> {
    match entry.entry_type {
        EntryType::Message => Some(DomainEvent::MessageReceived(entry.clone())),
        _ => None,
    }
}
