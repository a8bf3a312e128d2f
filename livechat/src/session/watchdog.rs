//! Resettable inactivity timer.

use std::time::Duration;

use tokio::time::Instant;

/// Default inactivity timeout before a session is closed.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A single deadline, re-armed on activity and cancelled on teardown.
///
/// The watchdog owns no task; the session loop awaits [`Watchdog::expired`]
/// alongside its other inputs, so a cancelled watchdog can never fire
/// against a stale session.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Creates a disarmed watchdog.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Cancels any pending fire and re-arms from now.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Disarms the watchdog.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Completes when the armed deadline passes. Never completes while
    /// disarmed. Cancel-safe.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_INACTIVITY_TIMEOUT)
    }
}
