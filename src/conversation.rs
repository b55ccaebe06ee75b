//! In-memory transcript for one chat session

use crate::events::Turn;

/// Ordered, append-only sequence of turns.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a turn at the tail
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Every turn in insertion order
    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Request context for stateless chat APIs: the system turn followed by
    /// the whole history.
    pub fn with_system_prompt(&self, prompt: &str) -> Vec<Turn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(Turn::system(prompt));
        messages.extend(self.turns.iter().cloned());
        messages
    }
}
