//! `LiveChat` development backend library.
//!
//! Exposes the stub server for use in tests and local runs. The server
//! keeps every conversation in memory and implements the proxy endpoints
//! the client talks to, plus an `/inject` endpoint for scripting the agent
//! side of a conversation.

pub mod config;
pub mod server;
pub mod store;
