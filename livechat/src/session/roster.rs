//! Tracks which agent the end user is currently talking to.

use livechat_proto::entry::{ParticipantChange, ParticipantOperation, ParticipantRole};

/// Agent-side presence for one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Roster {
    current_agent: Option<String>,
}

impl Roster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one participant operation.
    ///
    /// Returns the announcement to show. A bot or agent joining becomes the
    /// current agent; only a human agent leaving clears it. A bot leaving
    /// after a handoff, and every end-user or system change, is ignored.
    pub fn apply(&mut self, change: &ParticipantChange) -> Option<String> {
        let role = &change.participant.role;
        let relevant = match change.operation {
            ParticipantOperation::Add => role.is_agent_side(),
            ParticipantOperation::Remove => *role == ParticipantRole::Agent,
        };
        if !relevant {
            return None;
        }
        let name = if change.display_name.trim().is_empty() {
            change.participant.role.to_string()
        } else {
            change.display_name.clone()
        };
        match change.operation {
            ParticipantOperation::Add => {
                self.current_agent = Some(name.clone());
                Some(format!("{name} has joined the chat"))
            }
            ParticipantOperation::Remove => {
                self.current_agent = None;
                Some(format!("{name} has left the chat"))
            }
        }
    }

    /// Display name of the agent currently in the conversation.
    #[must_use]
    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    /// Forgets the current agent.
    pub fn clear(&mut self) {
        self.current_agent = None;
    }
}
