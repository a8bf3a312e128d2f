//! Inactivity watchdog behavior on a paused clock.
//!
//! Verifies that an active session with no traffic is closed after the
//! inactivity timeout (and not a moment earlier), that inbound and outbound
//! activity re-arm the timer while presence and connection events do not,
//! and what the session looks like afterwards.
//!
//! Verification command: `cargo test --test inactivity_watchdog`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout};

use livechat::backend::memory::{
    MemoryBackend, Operation, agent_message, participant_entry, typing_entry,
};
use livechat::net::spawn_session;
use livechat::session::store::MessageKind;
use livechat::session::{INACTIVITY_NOTICE, SessionConfig, SessionController, SessionStatus};
use livechat::transport::{DomainEvent, TransportConfig, TransportKind};
use livechat_proto::entry::{ParticipantOperation, ParticipantRole};
use livechat_proto::stream::StreamLabel;

const TIMEOUT: Duration = Duration::from_secs(300);
const EPSILON: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(kind: TransportKind) -> SessionConfig {
    SessionConfig {
        transport: TransportConfig {
            kind,
            ..TransportConfig::default()
        },
        inactivity_timeout: TIMEOUT,
    }
}

async fn active_session() -> (Arc<MemoryBackend>, SessionController<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let mut controller = SessionController::new(Arc::clone(&backend), config(TransportKind::Stream));
    controller.start().await.unwrap();
    assert!(controller.step().await);
    assert_eq!(controller.status(), SessionStatus::Active);
    (backend, controller)
}

/// Step the controller, giving up after `limit`. Returns whether an input
/// was applied in time.
async fn step_within(controller: &mut SessionController<MemoryBackend>, limit: Duration) -> bool {
    timeout(limit, controller.step()).await.is_ok()
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn does_not_fire_before_timeout() {
    let (backend, mut controller) = active_session().await;
    assert!(!step_within(&mut controller, TIMEOUT - EPSILON).await);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(backend.calls(Operation::Close), 0);
}

#[tokio::test(start_paused = true)]
async fn fires_at_timeout_and_closes_session() {
    let (backend, mut controller) = active_session().await;
    let started = Instant::now();

    assert!(controller.step().await);
    let elapsed = started.elapsed();
    assert!(elapsed >= TIMEOUT, "fired early after {elapsed:?}");
    assert!(elapsed < TIMEOUT + Duration::from_secs(1), "fired late after {elapsed:?}");

    assert_eq!(controller.status(), SessionStatus::Closed);
    assert_eq!(backend.calls(Operation::Close), 1);
    assert!(!controller.has_credentials());
    assert!(!controller.is_connected());
    assert!(!controller.watchdog_armed());
    assert_eq!(controller.transport_kind(), None);

    let notice = controller.messages().last().unwrap();
    assert_eq!(notice.kind, MessageKind::System);
    assert_eq!(notice.content, INACTIVITY_NOTICE);
}

#[tokio::test(start_paused = true)]
async fn inbound_message_rearms_timer() {
    let (backend, mut controller) = active_session().await;

    assert!(!step_within(&mut controller, Duration::from_secs(200)).await);
    backend.push_event(&StreamLabel::Message, agent_message("m1", "still there?"));
    assert!(controller.step().await);
    let rearmed = Instant::now();

    // The original deadline (100s from here) passes without firing.
    assert!(!step_within(&mut controller, TIMEOUT - EPSILON).await);
    assert_eq!(controller.status(), SessionStatus::Active);

    assert!(controller.step().await);
    assert!(rearmed.elapsed() >= TIMEOUT);
    assert_eq!(controller.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_rearms_timer() {
    let (backend, mut controller) = active_session().await;

    assert!(!step_within(&mut controller, Duration::from_secs(250)).await);
    backend.push_event(&StreamLabel::TypingStarted, typing_entry("t1", true));
    assert!(controller.step().await);

    assert!(!step_within(&mut controller, Duration::from_secs(200)).await);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(backend.calls(Operation::Close), 0);
}

#[tokio::test(start_paused = true)]
async fn outbound_send_rearms_timer() {
    let (backend, mut controller) = active_session().await;

    assert!(!step_within(&mut controller, Duration::from_secs(299)).await);
    controller.send("one more thing").await.unwrap();

    assert!(!step_within(&mut controller, TIMEOUT - EPSILON).await);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(backend.calls(Operation::Close), 0);
}

#[tokio::test(start_paused = true)]
async fn presence_and_connection_events_do_not_rearm_timer() {
    let (backend, mut controller) = active_session().await;
    let started = Instant::now();

    assert!(!step_within(&mut controller, Duration::from_secs(200)).await);
    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p1", &[(ParticipantOperation::Add, ParticipantRole::Agent, "Ana")]),
    );
    assert!(controller.step().await);
    assert_eq!(controller.current_agent(), Some("Ana"));

    controller
        .handle_event(DomainEvent::ConnectionFailed("blip".into()))
        .unwrap();
    controller.handle_event(DomainEvent::ConnectionOpened).unwrap();
    assert!(controller.is_connected());

    // Fires at the original deadline, not 300s after the events above.
    assert!(controller.step().await);
    let elapsed = started.elapsed();
    assert!(elapsed >= TIMEOUT, "fired early after {elapsed:?}");
    assert!(elapsed < TIMEOUT + Duration::from_secs(1), "deadline moved to {elapsed:?}");
    assert_eq!(controller.status(), SessionStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn watchdog_is_not_armed_before_connection_opens() {
    let backend = Arc::new(MemoryBackend::new());
    backend.delay(Operation::Subscribe, TIMEOUT * 2);
    let mut controller = SessionController::new(Arc::clone(&backend), config(TransportKind::Stream));
    controller.start().await.unwrap();

    assert!(!controller.watchdog_armed());
    assert!(!step_within(&mut controller, TIMEOUT + Duration::from_secs(10)).await);
    assert_eq!(controller.status(), SessionStatus::Initializing);
    assert_eq!(backend.calls(Operation::Close), 0);
}

// ---------------------------------------------------------------------------
// After expiry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn messages_survive_inactivity_close() {
    let (backend, mut controller) = active_session().await;
    controller.send("hello").await.unwrap();
    backend.push_event(&StreamLabel::Message, agent_message("m1", "hi"));
    assert!(controller.step().await);

    assert!(controller.step().await);
    let contents: Vec<&str> = controller.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["hello", "hi", INACTIVITY_NOTICE]);
}

#[tokio::test(start_paused = true)]
async fn send_after_inactivity_close_is_noop() {
    let (backend, mut controller) = active_session().await;
    assert!(controller.step().await);
    assert_eq!(controller.status(), SessionStatus::Closed);
    let before = controller.messages().to_vec();

    controller.send("anyone?").await.unwrap();
    assert_eq!(controller.messages(), before.as_slice());
    assert_eq!(backend.calls(Operation::Send), 0);
    assert!(!controller.is_response_pending());
}

#[tokio::test(start_paused = true)]
async fn failed_inactivity_close_keeps_status() {
    let (backend, mut controller) = active_session().await;
    backend.fail(Operation::Close, "backend down");

    assert!(controller.step().await);
    assert_eq!(backend.calls(Operation::Close), 1);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert!(controller.has_credentials());
    assert!(!controller.watchdog_armed());
    assert!(controller.view().error.unwrap().contains("backend down"));
    assert!(controller.messages().iter().all(|m| m.content != INACTIVITY_NOTICE));
}

#[tokio::test(start_paused = true)]
async fn user_close_cancels_watchdog() {
    let (backend, mut controller) = active_session().await;
    controller.close(|| {}).await.unwrap();
    assert!(!controller.watchdog_armed());

    // Nothing left to wait for: no transport, no deadline.
    assert!(!controller.step().await);
    tokio::time::sleep(TIMEOUT * 2).await;
    assert_eq!(backend.calls(Operation::Close), 1);
}

#[tokio::test(start_paused = true)]
async fn session_task_publishes_inactivity_close() {
    let backend = Arc::new(MemoryBackend::new());
    let handle = spawn_session(Arc::clone(&backend), config(TransportKind::Poll));
    let mut view = handle.subscribe();

    handle.start().await.unwrap();
    view.wait_for(|v| v.status == SessionStatus::Active).await.unwrap();

    let closed = view
        .wait_for(|v| v.status == SessionStatus::Closed)
        .await
        .unwrap()
        .clone();
    assert_eq!(closed.messages.last().unwrap().content, INACTIVITY_NOTICE);
    assert!(!closed.connected);
    assert_eq!(backend.calls(Operation::Close), 1);

    handle.shutdown().await;
}
