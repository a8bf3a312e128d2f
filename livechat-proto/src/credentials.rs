//! Session credentials and request bodies for the proxy backend.

use serde::{Deserialize, Serialize};

/// Raw response of the `initialize` operation.
///
/// Every field is optional on the wire so that a partially populated
/// response can be reported precisely instead of as a generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResponse {
    /// Bearer token for all subsequent calls.
    pub access_token: Option<String>,
    /// Identifier of the conversation created for this session.
    pub conversation_id: Option<String>,
    /// Organization the conversation belongs to.
    pub org_id: Option<String>,
    /// Resume cursor for the server-push stream.
    pub last_event_id: Option<String>,
}

/// A required field was absent (or empty) in an `initialize` response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("initialize response is missing required field `{0}`")]
pub struct MissingField(pub &'static str);

/// Validated credentials for one chat session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token for all subsequent calls.
    pub access_token: String,
    /// Identifier of the active conversation.
    pub conversation_id: String,
    /// Organization the conversation belongs to.
    pub org_id: String,
    /// Last server-push event id seen. Empty before the first event.
    pub last_event_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("conversation_id", &self.conversation_id)
            .field("org_id", &self.org_id)
            .field("last_event_id", &self.last_event_id)
            .finish()
    }
}

impl InitializeResponse {
    /// Validates the response into [`Credentials`].
    ///
    /// `lastEventId` is optional; the other three fields must be present
    /// and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] naming the first absent required field.
    pub fn into_credentials(self) -> Result<Credentials, MissingField> {
        fn required(value: Option<String>, name: &'static str) -> Result<String, MissingField> {
            value.filter(|v| !v.is_empty()).ok_or(MissingField(name))
        }

        Ok(Credentials {
            access_token: required(self.access_token, "accessToken")?,
            conversation_id: required(self.conversation_id, "conversationId")?,
            org_id: required(self.org_id, "orgId")?,
            last_event_id: self.last_event_id.unwrap_or_default(),
        })
    }
}

/// Body of the `send` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Bearer token of the session.
    pub access_token: String,
    /// Target conversation.
    pub conversation_id: String,
    /// Plain-text message content.
    pub message: String,
}

/// Body of the `close` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    /// Bearer token of the session.
    pub access_token: String,
    /// Conversation to close.
    pub conversation_id: String,
}
