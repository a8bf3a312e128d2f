//! End-to-end tests over HTTP against an in-process stub proxy.
//!
//! Starts `livechat-stub` on an ephemeral port, points an [`HttpBackend`]
//! at it and drives real sessions over both transports: messages sent by
//! the user, agent messages and presence injected on the stub side, and
//! teardown reaching the server.
//!
//! Verification command: `cargo test --test http_end_to_end`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use livechat::backend::http::HttpBackend;
use livechat::net::spawn_session;
use livechat::session::store::MessageKind;
use livechat::session::{SessionConfig, SessionController, SessionStatus};
use livechat::transport::{TransportConfig, TransportKind};
use livechat_proto::entry::{ParticipantOperation, ParticipantRole};
use livechat_stub::server::{AutoReply, Injection, StubState, start_server_with_state};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start a stub on an ephemeral port and return a backend pointed at it.
async fn stub(state: Arc<StubState>) -> (Arc<StubState>, Arc<HttpBackend>) {
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("stub server should start");
    let backend = HttpBackend::new(&format!("http://{addr}/"), Duration::from_secs(5))
        .expect("backend should build");
    (state, Arc::new(backend))
}

fn config(kind: TransportKind) -> SessionConfig {
    SessionConfig {
        transport: TransportConfig {
            kind,
            poll_interval: Duration::from_millis(100),
            ..TransportConfig::default()
        },
        ..SessionConfig::default()
    }
}

async fn active_controller(
    backend: &Arc<HttpBackend>,
    kind: TransportKind,
) -> (SessionController<HttpBackend>, String) {
    let mut controller = SessionController::new(Arc::clone(backend), config(kind));
    controller.start().await.expect("session should initialize");
    step(&mut controller).await;
    assert_eq!(controller.status(), SessionStatus::Active);
    let conversation_id = controller
        .credentials()
        .expect("active session has credentials")
        .conversation_id
        .clone();
    (controller, conversation_id)
}

async fn step(controller: &mut SessionController<HttpBackend>) {
    let stepped = timeout(WAIT, controller.step()).await.expect("no input within timeout");
    assert!(stepped, "session has nothing left to wait for");
}

/// Step until `done` holds or the timeout elapses.
async fn step_until(
    controller: &mut SessionController<HttpBackend>,
    done: impl Fn(&SessionController<HttpBackend>) -> bool,
) {
    while !done(controller) {
        step(controller).await;
    }
}

fn agent_says(text: &str) -> Injection {
    Injection::AgentMessage {
        text: text.to_owned(),
        display_name: Some("Agent Smith".into()),
    }
}

// ---------------------------------------------------------------------------
// Stream transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_session_round_trip() {
    let (state, backend) = stub(Arc::new(StubState::new())).await;
    let (mut controller, conversation_id) = active_controller(&backend, TransportKind::Stream).await;

    controller.send("Hi").await.unwrap();
    assert!(controller.is_response_pending());

    state.inject(&conversation_id, agent_says("Hello, how can I help?")).await.unwrap();
    step_until(&mut controller, |c| !c.is_response_pending()).await;

    let kinds: Vec<MessageKind> = controller.messages().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, [MessageKind::User, MessageKind::Agent]);
    assert_eq!(controller.messages()[1].content, "Hello, how can I help?");
    assert!(controller.is_connected());
}

#[tokio::test]
async fn stream_presence_and_typing() {
    let (state, backend) = stub(Arc::new(StubState::new())).await;
    let (mut controller, conversation_id) = active_controller(&backend, TransportKind::Stream).await;

    let joined = Injection::Participant {
        operation: ParticipantOperation::Add,
        role: ParticipantRole::Chatbot,
        display_name: "Agent Smith".into(),
    };
    state.inject(&conversation_id, joined).await.unwrap();
    step(&mut controller).await;
    assert_eq!(controller.current_agent(), Some("Agent Smith"));
    assert_eq!(controller.messages()[0].content, "Agent Smith has joined the chat");

    state.inject(&conversation_id, Injection::TypingStarted).await.unwrap();
    step(&mut controller).await;
    assert!(controller.is_typing());

    state.inject(&conversation_id, Injection::TypingStopped).await.unwrap();
    step(&mut controller).await;
    assert!(!controller.is_typing());

    let left = Injection::Participant {
        operation: ParticipantOperation::Remove,
        role: ParticipantRole::Agent,
        display_name: "Agent Smith".into(),
    };
    state.inject(&conversation_id, left).await.unwrap();
    step(&mut controller).await;
    assert_eq!(controller.current_agent(), None);
    assert_eq!(
        controller.messages().last().unwrap().content,
        "Agent Smith has left the chat"
    );
}

#[tokio::test]
async fn close_reaches_the_server() {
    let (state, backend) = stub(Arc::new(StubState::new())).await;
    let (mut controller, conversation_id) = active_controller(&backend, TransportKind::Stream).await;

    let mut closed = false;
    controller.close(|| closed = true).await.unwrap();
    assert!(closed);
    assert_eq!(controller.status(), SessionStatus::Closed);
    assert_eq!(state.store.is_closed(&conversation_id).await, Some(true));

    // Injections into a closed conversation are rejected by the stub and
    // the controller has nothing left to wait for.
    assert!(state.inject(&conversation_id, agent_says("late")).await.is_err());
    assert!(!controller.step().await);
}

// ---------------------------------------------------------------------------
// Poll transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_session_round_trip() {
    let (state, backend) = stub(Arc::new(StubState::new())).await;
    let (mut controller, conversation_id) = active_controller(&backend, TransportKind::Poll).await;

    controller.send("Hi").await.unwrap();
    state.inject(&conversation_id, agent_says("Hello from polling")).await.unwrap();
    step_until(&mut controller, |c| !c.is_response_pending()).await;

    let contents: Vec<&str> = controller.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["Hi", "Hello from polling"]);

    // Later cycles list the same entries again without duplicating them.
    let _ = timeout(Duration::from_millis(350), controller.step()).await;
    assert_eq!(controller.messages().len(), 2);
}

#[tokio::test]
async fn poll_ignores_presence_and_typing() {
    let (state, backend) = stub(Arc::new(StubState::new())).await;
    let (mut controller, conversation_id) = active_controller(&backend, TransportKind::Poll).await;

    state.inject(&conversation_id, Injection::TypingStarted).await.unwrap();
    state.inject(&conversation_id, agent_says("only this")).await.unwrap();
    step_until(&mut controller, |c| !c.messages().is_empty()).await;

    assert_eq!(controller.messages().len(), 1);
    assert!(!controller.is_typing());
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_task_with_auto_reply() {
    let auto_reply = AutoReply {
        prefix: "You said: ".into(),
        delay: Duration::from_millis(50),
        agent_name: "Stub Agent".into(),
    };
    let (_state, backend) = stub(Arc::new(StubState::with_auto_reply(auto_reply))).await;
    let handle = spawn_session(backend, config(TransportKind::Stream));
    let mut view = handle.subscribe();

    handle.start().await.unwrap();
    timeout(WAIT, view.wait_for(|v| v.status == SessionStatus::Active))
        .await
        .expect("session should become active")
        .unwrap();

    handle.send("ping").await.unwrap();
    let answered = timeout(
        WAIT,
        view.wait_for(|v| v.messages.iter().any(|m| m.content == "You said: ping") && !v.typing),
    )
    .await
    .expect("auto-reply should arrive")
    .unwrap()
    .clone();

    assert_eq!(answered.current_agent.as_deref(), Some("Stub Agent"));
    assert!(!answered.response_pending);
    let contents: Vec<&str> = answered.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        ["ping", "Stub Agent has joined the chat", "You said: ping"]
    );

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    handle
        .close(move || {
            let _ = done_tx.send(());
        })
        .await
        .unwrap();
    done_rx.await.unwrap();
    assert_eq!(handle.view().status, SessionStatus::Closed);
    assert!(handle.view().messages.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_backend_fails_initialization() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = Arc::new(HttpBackend::new(&format!("http://{addr}/"), Duration::from_secs(2)).unwrap());
    let mut controller = SessionController::new(backend, config(TransportKind::Stream));
    assert!(controller.start().await.is_err());
    assert_eq!(controller.status(), SessionStatus::Failed);
    assert!(controller.view().error.is_some());
}
