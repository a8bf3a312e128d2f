//! Session task for wiring a UI to the session controller.
//!
//! [`spawn_session`] moves a [`SessionController`] onto one background
//! tokio task. The UI talks to it through a [`SessionHandle`]: commands go
//! in over an mpsc channel, state comes out as [`SessionView`] snapshots on
//! a watch channel.
//!
//! # Architecture
//!
//! ```text
//! UI  ─── SessionCommand ──→  session task  ←── DomainEvent ─── transport
//!     ←── SessionView ──────  (one select! loop)  ←── expiry ─── watchdog
//! ```
//!
//! The loop handles one command, transport event or watchdog expiry at a
//! time, so user operations and transport events never interleave inside
//! a handler.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::session::{SessionConfig, SessionController, SessionError, SessionView};

/// Default capacity of the command channel.
const DEFAULT_COMMAND_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<(), SessionError>>;

/// Commands sent from the UI to the session task.
pub enum SessionCommand {
    /// Start (or restart) the session.
    Start {
        /// Receives the outcome of initialization.
        reply: Reply,
    },
    /// Send a message.
    Send {
        /// Message text.
        content: String,
        /// Receives the outcome of the backend call.
        reply: Reply,
    },
    /// Close the session and run `on_closed` after local teardown.
    Close {
        /// Completion callback.
        on_closed: Box<dyn FnOnce() + Send>,
        /// Receives the outcome of the backend close call.
        reply: Reply,
    },
    /// Stop the session task without contacting the backend.
    Shutdown,
}

impl fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { .. } => f.write_str("Start"),
            Self::Send { content, .. } => f.debug_struct("Send").field("content", content).finish(),
            Self::Close { .. } => f.write_str("Close"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Errors returned by [`SessionHandle`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The session task is no longer running.
    #[error("session task has stopped")]
    Stopped,

    /// The controller reported a failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// UI-side handle to a running session task.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Starts (or restarts) the session.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Session`] if initialization failed, or
    /// [`HandleError::Stopped`] if the task is gone.
    pub async fn start(&self) -> Result<(), HandleError> {
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Session`] if the backend rejected the
    /// message, or [`HandleError::Stopped`] if the task is gone.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), HandleError> {
        let content = content.into();
        self.request(|reply| SessionCommand::Send { content, reply }).await
    }

    /// Closes the session; `on_closed` runs on the session task once local
    /// state has been cleared.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Session`] if the backend close call failed
    /// (local teardown still happened), or [`HandleError::Stopped`] if the
    /// task is gone.
    pub async fn close(&self, on_closed: impl FnOnce() + Send + 'static) -> Result<(), HandleError> {
        let on_closed = Box::new(on_closed);
        self.request(|reply| SessionCommand::Close { on_closed, reply }).await
    }

    /// A receiver that is notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// The latest state snapshot.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Stops the session task and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session task did not finish cleanly");
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> SessionCommand) -> Result<(), HandleError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HandleError::Stopped)?;
        response.await.map_err(|_| HandleError::Stopped)?.map_err(HandleError::from)
    }
}

/// Spawn a session task for `backend` and return its handle.
///
/// The session stays [`crate::session::SessionStatus::Idle`] until
/// [`SessionHandle::start`] is called.
pub fn spawn_session<B: Backend>(backend: Arc<B>, config: SessionConfig) -> SessionHandle {
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let (cmd_tx, cmd_rx) = mpsc::channel(DEFAULT_COMMAND_CAPACITY);
    let controller = SessionController::new(backend, config).with_observer(view_tx);
    let task = tokio::spawn(run_session(controller, cmd_rx));
    SessionHandle {
        commands: cmd_tx,
        view: view_rx,
        task,
    }
}

/// Background task: serialize commands with transport events and expiries.
async fn run_session<B: Backend>(
    mut controller: SessionController<B>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("all session handles dropped");
                    break;
                };
                if !handle_command(&mut controller, command).await {
                    break;
                }
            }
            Some(input) = controller.next_input() => controller.apply(input).await,
        }
    }
    tracing::info!("session task shutting down");
}

/// Returns `false` when the loop should stop.
async fn handle_command<B: Backend>(
    controller: &mut SessionController<B>,
    command: SessionCommand,
) -> bool {
    match command {
        SessionCommand::Start { reply } => {
            let _ = reply.send(controller.start().await);
        }
        SessionCommand::Send { content, reply } => {
            let _ = reply.send(controller.send(&content).await);
        }
        SessionCommand::Close { on_closed, reply } => {
            let _ = reply.send(controller.close(on_closed).await);
        }
        SessionCommand::Shutdown => return false,
    }
    true
}
