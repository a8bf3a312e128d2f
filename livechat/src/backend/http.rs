//! HTTP client for the chat proxy endpoints.
//!
//! Endpoint layout, relative to the configured base URL:
//!
//! | operation | request |
//! |---|---|
//! | initialize | `POST initialize` |
//! | send | `POST send` with [`SendRequest`] |
//! | close | `POST close` with [`CloseRequest`] |
//! | subscribe | `GET events` (`text/event-stream`) |
//! | fetch entries | `GET entries?conversationId=…` |

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, header};
use url::Url;

use livechat_proto::credentials::{CloseRequest, Credentials, InitializeResponse, SendRequest};
use livechat_proto::entry::{ConversationEntry, EntriesResponse};

use super::{Backend, BackendError, EventByteStream};

/// Maximum number of characters of an error body surfaced to callers.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Header carrying the organization id on the event stream request.
const ORG_ID_HEADER: &str = "X-Org-Id";

/// Header carrying the resume cursor on the event stream request.
const LAST_EVENT_ID_HEADER: &str = "Last-Event-Id";

/// [`Backend`] implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Creates a client for the proxy rooted at `base_url`.
    ///
    /// `request_timeout` bounds every request except the long-lived event
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Request`] if `base_url` is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| BackendError::Request(format!("invalid base url: {e}")))?;
        // `Url::join` replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    /// Returns the normalised base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Request(format!("invalid endpoint {path}: {e}")))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body: sanitize_error_body(&body),
    })
}

fn sanitize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_owned();
    }
    let mut truncated: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push('…');
    truncated
}

impl Backend for HttpBackend {
    async fn initialize(&self) -> Result<Credentials, BackendError> {
        let request = self
            .client
            .post(self.endpoint("initialize")?)
            .timeout(self.request_timeout);
        let response = self.execute(request).await?;
        let body: InitializeResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.into_credentials()?)
    }

    async fn send_message(&self, credentials: &Credentials, content: &str) -> Result<(), BackendError> {
        let body = SendRequest {
            access_token: credentials.access_token.clone(),
            conversation_id: credentials.conversation_id.clone(),
            message: content.to_owned(),
        };
        let request = self
            .client
            .post(self.endpoint("send")?)
            .timeout(self.request_timeout)
            .json(&body);
        self.execute(request).await.map(drop)
    }

    async fn close_chat(&self, credentials: &Credentials) -> Result<(), BackendError> {
        let body = CloseRequest {
            access_token: credentials.access_token.clone(),
            conversation_id: credentials.conversation_id.clone(),
        };
        let request = self
            .client
            .post(self.endpoint("close")?)
            .timeout(self.request_timeout)
            .json(&body);
        self.execute(request).await.map(drop)
    }

    async fn subscribe(&self, credentials: &Credentials) -> Result<EventByteStream, BackendError> {
        let mut request = self
            .client
            .get(self.endpoint("events")?)
            .bearer_auth(&credentials.access_token)
            .header(header::ACCEPT, "text/event-stream")
            .header(ORG_ID_HEADER, &credentials.org_id);
        if !credentials.last_event_id.is_empty() {
            request = request.header(LAST_EVENT_ID_HEADER, &credentials.last_event_id);
        }

        let response = self.execute(request).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| BackendError::Stream(e.to_string()))
            })
            .boxed();
        Ok(stream)
    }

    async fn fetch_entries(&self, credentials: &Credentials) -> Result<Vec<ConversationEntry>, BackendError> {
        let request = self
            .client
            .get(self.endpoint("entries")?)
            .timeout(self.request_timeout)
            .bearer_auth(&credentials.access_token)
            .query(&[("conversationId", credentials.conversation_id.as_str())]);
        let response = self.execute(request).await?;
        let body: EntriesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.conversation_entries)
    }
}
