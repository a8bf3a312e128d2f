//! Property-based tests for session state.
//!
//! Uses proptest to verify:
//! 1. Ingesting messages is idempotent: any delivery sequence, duplicates
//!    included, stores each id exactly once in first-arrival order.
//! 2. A rejected send leaves the message list exactly as it was, for any
//!    interleaving of accepted and rejected sends.
//! 3. An agent message always clears the typing indicator.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use livechat::backend::memory::{MemoryBackend, Operation, agent_message};
use livechat::session::{SessionConfig, SessionController};
use livechat::transport::DomainEvent;

fn idle_controller() -> SessionController<MemoryBackend> {
    SessionController::new(Arc::new(MemoryBackend::new()), SessionConfig::default())
}

/// Strategy for deliveries drawn from a small id space so duplicates are common.
fn arb_deliveries() -> impl Strategy<Value = Vec<(u8, String)>> {
    prop::collection::vec((0u8..6, "[a-z ]{1,12}"), 0..40)
}

#[derive(Debug, Clone)]
enum Input {
    TypingStarted,
    TypingStopped,
    AgentMessage(u8),
}

fn arb_input() -> impl Strategy<Value = Input> {
    prop_oneof![
        Just(Input::TypingStarted),
        Just(Input::TypingStopped),
        (0u8..20).prop_map(Input::AgentMessage),
    ]
}

proptest! {
    #[test]
    fn ingestion_is_idempotent(deliveries in arb_deliveries()) {
        let mut controller = idle_controller();
        let mut expected: Vec<(String, String)> = Vec::new();
        let mut seen = HashSet::new();

        for (id, text) in &deliveries {
            let id = format!("m{id}");
            if seen.insert(id.clone()) {
                expected.push((id.clone(), text.clone()));
            }
            let event = DomainEvent::MessageReceived(agent_message(&id, text));
            prop_assert!(controller.handle_event(event).is_ok());
        }

        let stored: Vec<(String, String)> = controller
            .messages()
            .iter()
            .map(|m| (m.id.clone(), m.content.clone()))
            .collect();
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn rejected_sends_roll_back_exactly(sends in prop::collection::vec(("[a-z]{1,10}", any::<bool>()), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut controller = SessionController::new(Arc::clone(&backend), SessionConfig::default());
            controller.start().await.unwrap();

            for (text, accepted) in &sends {
                if *accepted {
                    backend.succeed(Operation::Send);
                } else {
                    backend.fail(Operation::Send, "rejected");
                }
                let before = controller.messages().to_vec();
                let result = controller.send(text).await;

                if *accepted {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(controller.messages().len(), before.len() + 1);
                    prop_assert_eq!(&controller.messages()[..before.len()], before.as_slice());
                    prop_assert_eq!(&controller.messages()[before.len()].content, text);
                } else {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(controller.messages(), before.as_slice());
                    prop_assert!(!controller.is_response_pending());
                }
            }

            let accepted = sends.iter().filter(|(_, ok)| *ok).count();
            prop_assert_eq!(backend.sent_messages().len(), accepted);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn agent_message_clears_typing(inputs in prop::collection::vec(arb_input(), 1..30)) {
        let mut controller = idle_controller();
        for input in inputs {
            match input {
                Input::TypingStarted => {
                    prop_assert!(controller.handle_event(DomainEvent::TypingStarted).is_ok());
                }
                Input::TypingStopped => {
                    prop_assert!(controller.handle_event(DomainEvent::TypingStopped).is_ok());
                    prop_assert!(!controller.is_typing());
                }
                Input::AgentMessage(n) => {
                    let event = DomainEvent::MessageReceived(agent_message(&format!("m{n}"), "reply"));
                    prop_assert!(controller.handle_event(event).is_ok());
                    prop_assert!(!controller.is_typing());
                }
            }
        }
    }
}
