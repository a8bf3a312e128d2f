//! `livechat-stub`: in-memory development backend for `livechat`.
//!
//! Serves the chat proxy endpoints on a local address and, unless
//! disabled, answers every user message with a canned reply.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8787
//! cargo run --bin livechat-stub
//!
//! # Run on custom address without auto replies
//! cargo run --bin livechat-stub -- --bind 127.0.0.1:9000 --no-auto-reply
//! ```

use std::sync::Arc;

use clap::Parser;
use livechat_stub::config::{StubCliArgs, StubConfig};
use livechat_stub::server::{self, StubState};

#[tokio::main]
async fn main() {
    let cli = StubCliArgs::parse();

    let config = match StubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, auto_reply = config.auto_reply.is_some(), "starting livechat stub");

    let state = Arc::new(match config.auto_reply {
        Some(reply) => StubState::with_auto_reply(reply),
        None => StubState::new(),
    });

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "stub server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start stub server");
            std::process::exit(1);
        }
    }
}
