//! Conversation entries: the backend's unit of conversation history.
//!
//! Both delivery strategies ultimately carry [`ConversationEntry`] values.
//! The stream wraps one entry per labeled event; the entries listing returns
//! a batch of them. The entry payload is kept as raw JSON and decoded on
//! demand, since its shape depends on [`EntryType`].

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CodecError;

/// Kind of a conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
    /// A chat message with text content.
    Message,
    /// One or more participants joined or left.
    ParticipantChanged,
    /// The remote side started typing.
    TypingStartedIndicator,
    /// The remote side stopped typing.
    TypingStoppedIndicator,
    /// Any entry type this client does not interpret.
    Other(String),
}

impl From<String> for EntryType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Message" => Self::Message,
            "ParticipantChanged" => Self::ParticipantChanged,
            "TypingStartedIndicator" => Self::TypingStartedIndicator,
            "TypingStoppedIndicator" => Self::TypingStoppedIndicator,
            _ => Self::Other(value),
        }
    }
}

impl From<EntryType> for String {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::Message => "Message".into(),
            EntryType::ParticipantChanged => "ParticipantChanged".into(),
            EntryType::TypingStartedIndicator => "TypingStartedIndicator".into(),
            EntryType::TypingStoppedIndicator => "TypingStoppedIndicator".into(),
            EntryType::Other(other) => other,
        }
    }
}

/// Role of a conversation participant. Parsed case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParticipantRole {
    /// The person using this client.
    EndUser,
    /// An automated bot.
    Chatbot,
    /// A human support agent.
    Agent,
    /// The messaging platform itself.
    System,
    /// Any other role, kept verbatim. Empty when the backend sent none.
    Other(String),
}

impl Default for ParticipantRole {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl ParticipantRole {
    /// Whether this role is on the agent side of the conversation
    /// (bot or human agent).
    #[must_use]
    pub const fn is_agent_side(&self) -> bool {
        matches!(self, Self::Chatbot | Self::Agent)
    }
}

impl From<String> for ParticipantRole {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "enduser" | "end_user" => Self::EndUser,
            "chatbot" | "bot" => Self::Chatbot,
            "agent" => Self::Agent,
            "system" => Self::System,
            _ => Self::Other(value),
        }
    }
}

impl From<ParticipantRole> for String {
    fn from(value: ParticipantRole) -> Self {
        match value {
            ParticipantRole::Other(other) => other,
            known => known.to_string(),
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndUser => write!(f, "EndUser"),
            Self::Chatbot => write!(f, "Chatbot"),
            Self::Agent => write!(f, "Agent"),
            Self::System => write!(f, "System"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Sender of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Role of the sender.
    #[serde(default)]
    pub role: ParticipantRole,
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    /// Backend-assigned identifier, unique within the conversation.
    pub identifier: String,
    /// What kind of entry this is.
    pub entry_type: EntryType,
    /// Who produced the entry.
    #[serde(default)]
    pub sender: Sender,
    /// Display name of the sender, if the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    /// Type-specific payload. May be an object or an embedded JSON string.
    #[serde(default)]
    pub entry_payload: Value,
    /// Milliseconds since the UNIX epoch, as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<u64>,
}

/// Join or leave operation in a participant change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantOperation {
    /// The participant joined.
    #[serde(alias = "Add", alias = "ADD")]
    Add,
    /// The participant left.
    #[serde(alias = "Remove", alias = "REMOVE")]
    Remove,
}

/// The participant affected by a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Role of the participant.
    #[serde(default)]
    pub role: ParticipantRole,
}

/// One join/leave operation inside a participant-changed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantChange {
    /// Whether the participant joined or left.
    pub operation: ParticipantOperation,
    /// The affected participant.
    #[serde(default)]
    pub participant: Participant,
    /// Human-readable name shown to the end user.
    #[serde(default)]
    pub display_name: String,
}

/// Response of the entries listing used by the polling strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesResponse {
    /// Recent entries in the order the backend created them.
    #[serde(default)]
    pub conversation_entries: Vec<ConversationEntry>,
}

#[derive(Deserialize)]
struct ParticipantChangedPayload {
    entries: Vec<ParticipantChange>,
}

/// Builds a message payload object with the given text.
#[must_use]
pub fn message_payload(text: &str) -> Value {
    serde_json::json!({ "abstractMessage": { "staticContent": { "text": text } } })
}

/// Builds a participant-changed payload object.
#[must_use]
pub fn participant_payload(changes: &[ParticipantChange]) -> Value {
    serde_json::json!({ "entries": changes })
}

impl ConversationEntry {
    /// Returns the payload as a JSON object, unwrapping an embedded JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if the payload is a string that
    /// does not contain valid JSON.
    pub fn payload(&self) -> Result<Cow<'_, Value>, CodecError> {
        match &self.entry_payload {
            Value::String(raw) => Ok(Cow::Owned(serde_json::from_str(raw)?)),
            other => Ok(Cow::Borrowed(other)),
        }
    }

    /// Extracts the text of a message entry.
    ///
    /// Returns `Ok(None)` when the payload has no static text (for example
    /// rich content this client does not render).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload cannot be decoded.
    pub fn text(&self) -> Result<Option<String>, CodecError> {
        let payload = self.payload()?;
        Ok(payload
            .pointer("/abstractMessage/staticContent/text")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    /// Decodes the ordered participant operations of a participant-changed entry.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload does not contain an `entries` list.
    pub fn participant_changes(&self) -> Result<Vec<ParticipantChange>, CodecError> {
        let payload = self.payload()?;
        let parsed: ParticipantChangedPayload = serde_json::from_value(payload.into_owned())?;
        Ok(parsed.entries)
    }
}
