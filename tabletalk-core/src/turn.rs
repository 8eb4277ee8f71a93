//! Conversation history: turns and the append-only turn log.

use crate::query::QueryDescriptor;
use crate::result::ExecutionOutcome;
use crate::{ConversationId, Timestamp};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Structured payload attached to an assistant turn: the query that was
/// run and what came back. Absent on user turns and on turns where no
/// query reached execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPayload {
    pub descriptor: QueryDescriptor,
    pub outcome: ExecutionOutcome,
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TurnPayload>,
}

impl ConversationTurn {
    /// A user turn stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            payload: None,
        }
    }

    /// An assistant turn stamped with the current time.
    pub fn assistant(content: impl Into<String>, payload: Option<TurnPayload>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            payload,
        }
    }
}

/// A conversation: id plus append-ordered turns. Turns never reference
/// future turns, so the log only ever grows at the tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            turns: Vec::new(),
        }
    }

    /// Append a turn at the tail.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// The most recent `window` turns, oldest first. Used to bound the
    /// history embedded in prompts.
    pub fn recent_turns(&self, window: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_conversation_id;

    #[test]
    fn test_turns_append_in_order() {
        let mut conversation = Conversation::new(new_conversation_id());
        conversation.push(ConversationTurn::user("first"));
        conversation.push(ConversationTurn::assistant("second", None));
        conversation.push(ConversationTurn::user("third"));

        let contents: Vec<&str> = conversation
            .turns
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_recent_turns_window() {
        let mut conversation = Conversation::new(new_conversation_id());
        for i in 0..5 {
            conversation.push(ConversationTurn::user(format!("msg {i}")));
        }
        let recent = conversation.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "msg 3");
        assert_eq!(recent[1].content, "msg 4");

        // Window larger than history yields everything.
        assert_eq!(conversation.recent_turns(100).len(), 5);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TurnRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&TurnRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
