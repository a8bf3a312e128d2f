//! Backend abstraction for the chat proxy.
//!
//! Defines the [`Backend`] trait the session controller talks to.
//! Implementations:
//! - [`http::HttpBackend`]: the proxy endpoints over HTTP
//! - [`memory::MemoryBackend`]: in-process scriptable backend for testing

pub mod http;
pub mod memory;

use futures_util::stream::BoxStream;

use livechat_proto::codec::CodecError;
use livechat_proto::credentials::{Credentials, MissingField};
use livechat_proto::entry::ConversationEntry;

/// Raw byte chunks of a server-push (`text/event-stream`) response.
pub type EventByteStream = BoxStream<'static, Result<Vec<u8>, BackendError>>;

/// Errors returned by backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request could not be sent or no response was received.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The initialize response lacked a required field.
    #[error(transparent)]
    MissingField(#[from] MissingField),

    /// Reading the server-push stream failed.
    #[error("stream read failed: {0}")]
    Stream(String),
}

impl From<CodecError> for BackendError {
    fn from(err: CodecError) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Async operations exposed by the chat proxy.
///
/// The controller treats the backend as opaque: authentication and
/// conversation creation happen behind [`Backend::initialize`].
pub trait Backend: Send + Sync + 'static {
    /// Acquire credentials and create a conversation.
    ///
    /// Fails if any required credential field is absent.
    fn initialize(
        &self,
    ) -> impl std::future::Future<Output = Result<Credentials, BackendError>> + Send;

    /// Post a plain-text message into the conversation.
    fn send_message(
        &self,
        credentials: &Credentials,
        content: &str,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// End the conversation on the backend.
    fn close_chat(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Open the server-push connection, resuming after
    /// `credentials.last_event_id` when it is non-empty.
    fn subscribe(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<EventByteStream, BackendError>> + Send;

    /// List recent conversation entries, oldest first.
    fn fetch_entries(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationEntry>, BackendError>> + Send;
}
