//! Terminal client for live support chat.
//!
//! Starts a session against the configured chat proxy, prints the
//! conversation as it happens and sends every line typed on stdin.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/livechat/config.toml`).
//!
//! ```bash
//! # Against a local dev backend
//! cargo run --bin livechat-stub &
//! cargo run --bin livechat -- --base-url http://127.0.0.1:8787/
//!
//! # Interval polling instead of the event stream
//! LIVECHAT_TRANSPORT=poll cargo run --bin livechat
//! ```
//!
//! Type `/quit` to end the chat, `/restart` to start a fresh one.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tracing_appender::non_blocking::WorkerGuard;

use livechat::backend::http::HttpBackend;
use livechat::config::{CliArgs, ClientConfig};
use livechat::net::{SessionHandle, spawn_session};
use livechat::session::{SessionStatus, SessionView};

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    // Logs go to a file so they never interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(base_url = %config.base_url, transport = %config.transport, "livechat starting");

    let backend = match HttpBackend::new(&config.base_url, config.request_timeout) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let handle = spawn_session(backend, config.to_session_config());
    let printer = tokio::spawn(print_updates(handle.subscribe(), config.timestamp_format.clone()));

    if let Err(e) = handle.start().await {
        eprintln!("{e}");
    }

    let result = read_input(&handle).await;

    handle.shutdown().await;
    printer.abort();
    tracing::info!("livechat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which carries the chat).
/// Returns a guard that must be held for the lifetime of the program.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("livechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Read stdin lines until `/quit` or EOF.
async fn read_input(handle: &SessionHandle) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/restart" => {
                if let Err(e) = handle.start().await {
                    eprintln!("{e}");
                }
            }
            _ => {
                if let Err(e) = handle.send(line.as_str()).await {
                    eprintln!("{e}");
                }
            }
        }
    }

    let (done_tx, done_rx) = oneshot::channel();
    let close = handle.close(move || {
        let _ = done_tx.send(());
    });
    if let Err(e) = close.await {
        eprintln!("{e}");
    }
    if done_rx.await.is_ok() {
        println!("Chat closed.");
    }
    Ok(())
}

/// Print new messages and status changes as they are published.
async fn print_updates(mut views: watch::Receiver<SessionView>, timestamp_format: String) {
    let mut printed: HashSet<String> = HashSet::new();
    let mut last = SessionView::default();

    while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();

        if view.status != last.status {
            print_status(view.status, view.current_agent.as_deref());
        }
        for message in &view.messages {
            if printed.insert(message.id.clone()) {
                let at = format_timestamp(message.timestamp, &timestamp_format);
                println!("[{at}] {} {}", message.kind, message.content);
            }
        }
        if view.typing && !last.typing {
            println!("... agent is typing");
        }
        if view.connected != last.connected && view.status == SessionStatus::Active {
            println!("{}", if view.connected { "(connected)" } else { "(disconnected)" });
        }
        if view.error != last.error
            && let Some(error) = &view.error
        {
            eprintln!("! {error}");
        }
        last = view;
    }
}

/// Format a timestamp in local time, tolerating a bad format string.
fn format_timestamp(at: DateTime<Utc>, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", at.with_timezone(&Local).format(format)).is_err() {
        return "??:??".to_string();
    }
    out
}

fn print_status(status: SessionStatus, agent: Option<&str>) {
    match status {
        SessionStatus::Initializing => println!("Connecting..."),
        SessionStatus::Active => match agent {
            Some(name) => println!("Connected. You are chatting with {name}."),
            None => println!("Connected. Type a message and press enter."),
        },
        SessionStatus::Closed => println!("Session ended."),
        SessionStatus::Failed => println!("Could not start the chat."),
        SessionStatus::Idle | SessionStatus::Closing => {}
    }
}
