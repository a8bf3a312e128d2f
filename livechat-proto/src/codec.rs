//! JSON encoding and decoding for the `LiveChat` wire format.
//!
//! Every payload exchanged with the proxy backend is JSON. These helpers
//! wrap `serde_json` so callers see a single [`CodecError`] type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The payload decoded but did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Encodes a value as a JSON byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a value from a JSON byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes a value from a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not valid JSON for `T`.
pub fn decode_str<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}
