//! End-to-end session scenarios against the in-memory backend.
//!
//! Drives a [`SessionController`] over the stream transport the way the
//! session task does: user operations are called directly and transport
//! events are applied one at a time with `step()`.
//!
//! Verification command: `cargo test --test session_scenarios`

use std::sync::Arc;

use livechat::backend::memory::{MemoryBackend, Operation, agent_message, participant_entry, typing_entry};
use livechat::session::store::MessageKind;
use livechat::session::{SessionConfig, SessionController, SessionError, SessionStatus};
use livechat::transport::{TransportConfig, TransportKind};
use livechat_proto::entry::{ParticipantOperation, ParticipantRole};
use livechat_proto::stream::StreamLabel;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stream_config() -> SessionConfig {
    SessionConfig {
        transport: TransportConfig {
            kind: TransportKind::Stream,
            ..TransportConfig::default()
        },
        ..SessionConfig::default()
    }
}

/// Start a session and apply the transport's `ConnectionOpened`.
async fn active_session() -> (Arc<MemoryBackend>, SessionController<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let mut controller = SessionController::new(Arc::clone(&backend), stream_config());
    controller.start().await.unwrap();
    assert!(controller.step().await);
    assert_eq!(controller.status(), SessionStatus::Active);
    (backend, controller)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_confirm_and_deduplicated_reply() {
    let (backend, mut controller) = active_session().await;

    controller.send("Hi").await.unwrap();
    let optimistic = controller.messages()[0].clone();
    assert_eq!(optimistic.kind, MessageKind::User);
    assert_eq!(optimistic.content, "Hi");
    assert_eq!(backend.sent_messages(), ["Hi"]);

    // The same agent reply is delivered twice.
    backend.push_event(&StreamLabel::Message, agent_message("m1", "Hello, how can I help?"));
    backend.push_event(&StreamLabel::Message, agent_message("m1", "Hello, how can I help?"));
    assert!(controller.step().await);
    assert!(controller.step().await);

    assert_eq!(controller.messages()[0], optimistic);
    assert_eq!(controller.messages().iter().filter(|m| m.id == "m1").count(), 1);
    assert_eq!(controller.messages().len(), 2);
    assert!(!controller.is_response_pending());
}

#[tokio::test]
async fn agent_join_and_leave_are_announced() {
    let (backend, mut controller) = active_session().await;

    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p1", &[(ParticipantOperation::Add, ParticipantRole::Chatbot, "Agent Smith")]),
    );
    assert!(controller.step().await);
    assert_eq!(controller.current_agent(), Some("Agent Smith"));
    let joined = controller.messages().last().unwrap();
    assert_eq!(joined.kind, MessageKind::System);
    assert_eq!(joined.content, "Agent Smith has joined the chat");

    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p2", &[(ParticipantOperation::Remove, ParticipantRole::Agent, "Agent Smith")]),
    );
    assert!(controller.step().await);
    assert_eq!(controller.current_agent(), None);
    let left = controller.messages().last().unwrap();
    assert_eq!(left.kind, MessageKind::System);
    assert_eq!(left.content, "Agent Smith has left the chat");
    assert_eq!(controller.messages().len(), 2);
}

#[tokio::test]
async fn batched_participant_changes_apply_in_order() {
    let (backend, mut controller) = active_session().await;

    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry(
            "p1",
            &[
                (ParticipantOperation::Add, ParticipantRole::EndUser, "Me"),
                (ParticipantOperation::Add, ParticipantRole::Chatbot, "Bot"),
                (ParticipantOperation::Remove, ParticipantRole::Chatbot, "Bot"),
                (ParticipantOperation::Add, ParticipantRole::Agent, "Ana"),
            ],
        ),
    );
    assert!(controller.step().await);

    let notices: Vec<&str> = controller.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(notices, ["Bot has joined the chat", "Ana has joined the chat"]);
    assert_eq!(controller.current_agent(), Some("Ana"));
}

#[tokio::test]
async fn bot_leaving_after_handoff_keeps_human_agent() {
    let (backend, mut controller) = active_session().await;

    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p1", &[(ParticipantOperation::Add, ParticipantRole::Chatbot, "Bot")]),
    );
    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p2", &[(ParticipantOperation::Add, ParticipantRole::Agent, "Ana")]),
    );
    backend.push_event(
        &StreamLabel::ParticipantChanged,
        participant_entry("p3", &[(ParticipantOperation::Remove, ParticipantRole::Chatbot, "Bot")]),
    );
    for _ in 0..3 {
        assert!(controller.step().await);
    }

    assert_eq!(controller.current_agent(), Some("Ana"));
    assert_eq!(controller.view().current_agent.as_deref(), Some("Ana"));
    assert!(controller.messages().iter().all(|m| m.content != "Bot has left the chat"));
    assert_eq!(controller.messages().len(), 2);
}

#[tokio::test]
async fn typing_indicator_respects_pending_send() {
    let (backend, mut controller) = active_session().await;

    controller.send("question").await.unwrap();
    backend.push_event(&StreamLabel::TypingStarted, typing_entry("t1", true));
    assert!(controller.step().await);
    assert!(!controller.is_typing(), "typing hidden while the send is pending");

    backend.push_event(&StreamLabel::Message, agent_message("m1", "answer"));
    assert!(controller.step().await);
    assert!(!controller.is_response_pending());

    backend.push_event(&StreamLabel::TypingStarted, typing_entry("t2", true));
    assert!(controller.step().await);
    assert!(controller.is_typing());

    // No explicit stop: the message itself clears the indicator.
    backend.push_event(&StreamLabel::Message, agent_message("m2", "follow-up"));
    assert!(controller.step().await);
    assert!(!controller.is_typing());
}

#[tokio::test]
async fn unrecognized_and_malformed_events_are_skipped() {
    let (backend, mut controller) = active_session().await;

    backend.push_raw(b"event: CONVERSATION_READ_ACKNOWLEDGEMENT\ndata: {}\n\n");
    backend.push_raw(b"event: CONVERSATION_MESSAGE\ndata: {broken\n\n");
    backend.push_event(&StreamLabel::Message, agent_message("m1", "still here"));
    assert!(controller.step().await);

    assert_eq!(controller.messages().len(), 1);
    assert_eq!(controller.messages()[0].content, "still here");
    assert!(controller.is_connected());
    assert!(controller.error().is_none());
}

#[tokio::test]
async fn rejected_send_rolls_back_and_session_stays_active() {
    let (backend, mut controller) = active_session().await;
    backend.push_event(&StreamLabel::Message, agent_message("m1", "welcome"));
    assert!(controller.step().await);
    let before = controller.messages().to_vec();

    backend.fail(Operation::Send, "rate limited");
    let err = controller.send("hello?").await.unwrap_err();

    assert!(matches!(err, SessionError::Send(_)));
    assert_eq!(controller.messages(), before.as_slice());
    assert!(!controller.is_response_pending());
    assert_eq!(controller.status(), SessionStatus::Active);
    assert!(controller.view().error.unwrap().contains("rate limited"));
}

#[tokio::test]
async fn broken_stream_marks_disconnected_but_keeps_history() {
    let (backend, mut controller) = active_session().await;
    backend.push_event(&StreamLabel::Message, agent_message("m1", "hi"));
    assert!(controller.step().await);

    backend.break_streams("connection reset");
    assert!(controller.step().await);
    assert!(!controller.is_connected());
    assert_eq!(controller.status(), SessionStatus::Active);
    assert_eq!(controller.messages().len(), 1);
    assert!(matches!(controller.error(), Some(SessionError::Transport(_))));
}

#[tokio::test]
async fn close_from_active_clears_everything() {
    let (backend, mut controller) = active_session().await;
    controller.send("bye").await.unwrap();
    backend.push_event(&StreamLabel::Message, agent_message("m1", "goodbye"));
    assert!(controller.step().await);

    let mut closed = 0;
    controller.close(|| closed += 1).await.unwrap();

    assert_eq!(closed, 1);
    assert_eq!(controller.status(), SessionStatus::Closed);
    assert!(controller.messages().is_empty());
    assert!(!controller.is_connected());
    assert!(!controller.is_loading());
    assert_eq!(backend.calls(Operation::Close), 1);

    // Events pushed after close are never accepted.
    backend.push_event(&StreamLabel::Message, agent_message("m2", "too late"));
    assert!(!controller.step().await);
    assert!(controller.messages().is_empty());
}

#[tokio::test]
async fn close_during_initialization_tears_down() {
    let backend = Arc::new(MemoryBackend::new());
    let mut controller = SessionController::new(Arc::clone(&backend), stream_config());
    controller.start().await.unwrap();
    assert_eq!(controller.status(), SessionStatus::Initializing);

    controller.close(|| {}).await.unwrap();
    assert_eq!(controller.status(), SessionStatus::Closed);
    assert!(!controller.has_credentials());
    assert_eq!(backend.calls(Operation::Close), 1);
    assert!(!controller.step().await);
}

#[tokio::test]
async fn restart_after_failure_starts_clean() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail(Operation::Initialize, "maintenance");
    let mut controller = SessionController::new(Arc::clone(&backend), stream_config());

    assert!(controller.start().await.is_err());
    assert_eq!(controller.status(), SessionStatus::Failed);
    assert!(controller.view().error.is_some());

    backend.succeed(Operation::Initialize);
    controller.start().await.unwrap();
    assert!(controller.error().is_none());
    assert!(controller.step().await);
    assert_eq!(controller.status(), SessionStatus::Active);
}

#[tokio::test]
async fn credentials_follow_stream_cursor() {
    let backend = Arc::new(MemoryBackend::new());
    let mut controller = SessionController::new(Arc::clone(&backend), stream_config());
    controller.start().await.unwrap();
    assert!(controller.step().await);

    backend.push_event(&StreamLabel::Message, agent_message("m1", "one"));
    backend.push_event(&StreamLabel::Message, agent_message("m2", "two"));
    assert!(controller.step().await);
    assert!(controller.step().await);
    assert_eq!(controller.credentials().unwrap().last_event_id, "2");
}
