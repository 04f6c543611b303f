//! Conversation history storage
//!
//! Keeps the most recent turns of one session, evicting oldest first.

use crate::models::InteractionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of (user, agent) turns a session remembers.
pub const HISTORY_CAPACITY: usize = 8;

/// One complete exchange. Only ever stored whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub user_message: String,
    pub agent_reply: String,
    pub mode: InteractionMode,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(user_message: impl Into<String>, agent_reply: impl Into<String>, mode: InteractionMode) -> Self {
        Self {
            user_message: user_message.into(),
            agent_reply: agent_reply.into(),
            mode,
            timestamp: Utc::now(),
        }
    }
}

/// FIFO-bounded turn history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, returning the evicted oldest turn when full.
    pub fn push(&mut self, turn: ConversationTurn) -> Option<ConversationTurn> {
        let evicted = if self.turns.len() == self.capacity {
            self.turns.pop_front()
        } else {
            None
        };
        self.turns.push_back(turn);
        evicted
    }

    /// Oldest first.
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Transcript for LLM prompts
    pub fn get_formatted_context(&self) -> String {
        let mut context = String::new();
        for turn in &self.turns {
            context.push_str(&format!("- User: {}\n", turn.user_message));
            context.push_str(&format!("- Agent: {}\n", turn.agent_reply));
        }
        context
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}
