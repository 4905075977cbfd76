//! Rolling conversation history and token-budget context trimming.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tokenizer::TokenCounter;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local user
    User,
    /// The model
    Assistant,
}

impl Role {
    /// Role name in OpenAI-style message lists
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker
    pub role: Role,
    /// Text content
    pub content: String,
    /// When the turn was recorded
    pub at: DateTime<Utc>,
}

impl Turn {
    /// User turn stamped now
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    /// Assistant turn stamped now
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

/// History bounded to the most recent `max_turns` turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns.min(256)),
            max_turns,
        }
    }

    /// Append a turn, evicting the oldest beyond the bound
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Record a completed user/assistant exchange
    pub fn push_exchange(&mut self, prompt: &str, reply: &str) {
        self.push(Turn::user(prompt));
        self.push(Turn::assistant(reply));
    }

    /// All stored turns, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Number of stored turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns are stored
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The most recent turns that fit a model's context, oldest first.
    ///
    /// Stored history is untouched; see [`trim_context`].
    pub fn trimmed(
        &self,
        context_limit: usize,
        reserved_headroom: usize,
        counter: &TokenCounter,
    ) -> Vec<Turn> {
        trim_newest(self.turns.iter(), context_limit, reserved_headroom, counter)
    }

    /// Clone of every stored turn, oldest first
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }
}

/// Keep the most recent turns whose accumulated cost stays within
/// `context_limit - reserved_headroom`, returned oldest first.
///
/// Walks newest to oldest; the first turn that does not fit ends the walk,
/// so everything older is excluded even if it would fit on its own.
pub fn trim_context(
    turns: &[Turn],
    context_limit: usize,
    reserved_headroom: usize,
    counter: &TokenCounter,
) -> Vec<Turn> {
    trim_newest(turns.iter(), context_limit, reserved_headroom, counter)
}

fn trim_newest<'a>(
    turns: impl DoubleEndedIterator<Item = &'a Turn>,
    context_limit: usize,
    reserved_headroom: usize,
    counter: &TokenCounter,
) -> Vec<Turn> {
    let budget = context_limit.saturating_sub(reserved_headroom);
    let mut used = 0usize;
    let mut kept: Vec<Turn> = Vec::new();

    for turn in turns.rev() {
        let cost = counter.count_turn(&turn.content);
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(turn.clone());
    }

    kept.reverse();
    kept
}
