//! Conversation — the agent's in-memory message history.
//!
//! Owned exclusively by one agent and mutated only between steps. A turn
//! records a checkpoint (the current length) and truncates back to it if
//! the turn fails.

use uuid::Uuid;

use crate::inference::types::Message;

/// Ordered message history with a stable id for log correlation.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop everything after the first `len` messages.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Forget all history and start a fresh conversation id.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.id = Uuid::new_v4().to_string();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_restores_checkpoint() {
        let mut conv = Conversation::new();
        conv.push(Message::user_text("first"));
        let checkpoint = conv.len();
        conv.push(Message::user_text("second"));
        conv.push(Message::assistant_text("partial"));

        conv.truncate(checkpoint);
        assert_eq!(conv.messages(), &[Message::user_text("first")]);
    }

    #[test]
    fn test_clear_resets_id() {
        let mut conv = Conversation::new();
        let before = conv.id().to_string();
        conv.push(Message::user_text("hi"));
        conv.clear();
        assert!(conv.is_empty());
        assert_ne!(conv.id(), before);
    }
}
