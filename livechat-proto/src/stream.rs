//! Labeled events delivered on the server-push connection.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::entry::ConversationEntry;
use crate::sse::SseFrame;

/// Category label of a server-push event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamLabel {
    /// A conversation message.
    Message,
    /// Participants joined or left.
    ParticipantChanged,
    /// Remote typing started.
    TypingStarted,
    /// Remote typing stopped.
    TypingStopped,
    /// Any other label. Ignored by the client.
    Unrecognized(String),
}

impl StreamLabel {
    /// Wire name of the message label.
    pub const MESSAGE: &'static str = "CONVERSATION_MESSAGE";
    /// Wire name of the participant-changed label.
    pub const PARTICIPANT_CHANGED: &'static str = "CONVERSATION_PARTICIPANT_CHANGED";
    /// Wire name of the typing-started label.
    pub const TYPING_STARTED: &'static str = "CONVERSATION_TYPING_STARTED_INDICATOR";
    /// Wire name of the typing-stopped label.
    pub const TYPING_STOPPED: &'static str = "CONVERSATION_TYPING_STOPPED_INDICATOR";

    /// Parses a wire label.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            Self::MESSAGE => Self::Message,
            Self::PARTICIPANT_CHANGED => Self::ParticipantChanged,
            Self::TYPING_STARTED => Self::TypingStarted,
            Self::TYPING_STOPPED => Self::TypingStopped,
            other => Self::Unrecognized(other.to_owned()),
        }
    }

    /// Returns the wire name of this label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => Self::MESSAGE,
            Self::ParticipantChanged => Self::PARTICIPANT_CHANGED,
            Self::TypingStarted => Self::TYPING_STARTED,
            Self::TypingStopped => Self::TYPING_STOPPED,
            Self::Unrecognized(other) => other,
        }
    }
}

impl std::fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body carried in the `data:` field of every labeled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventData {
    /// The entry this event announces.
    pub conversation_entry: ConversationEntry,
}

/// A labeled server-push event with its still-encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Event category.
    pub label: StreamLabel,
    /// Event id used as the resume cursor, if the server sent one.
    pub id: Option<String>,
    /// Raw JSON body.
    pub data: String,
}

impl StreamEvent {
    /// Builds a stream event from a decoded SSE frame.
    ///
    /// Frames without an `event:` field carry the SSE default label
    /// `message`, which is not one of ours and so maps to
    /// [`StreamLabel::Unrecognized`].
    #[must_use]
    pub fn from_frame(frame: SseFrame) -> Self {
        let label = StreamLabel::parse(frame.event.as_deref().unwrap_or("message"));
        Self {
            label,
            id: frame.id,
            data: frame.data,
        }
    }

    /// Decodes the conversation entry carried by this event.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the body is not a valid [`StreamEventData`].
    pub fn entry(&self) -> Result<ConversationEntry, CodecError> {
        let data: StreamEventData = codec::decode_str(&self.data)?;
        Ok(data.conversation_entry)
    }
}
