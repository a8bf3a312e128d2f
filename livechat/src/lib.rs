//! Client-side session controller for live support chat.
//!
//! Reconciles a server-push stream and interval polling into one view of
//! a conversation: ordered messages, connection status, typing and the
//! current agent.

pub mod backend;
pub mod config;
pub mod net;
pub mod normalize;
pub mod session;
pub mod transport;
