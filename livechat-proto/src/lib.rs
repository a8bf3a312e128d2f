//! Shared wire definitions for the `LiveChat` proxy backend.

pub mod codec;
pub mod credentials;
pub mod entry;
pub mod sse;
pub mod stream;
