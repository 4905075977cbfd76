//! Logical generation requests.

use serde::{Deserialize, Serialize};

use super::history::Turn;

/// One logical request as the UI layer issues it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's prompt
    pub prompt: String,
    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Prior turns to send along. The failover dispatcher fills this from
    /// its own history when left empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<Turn>,
}

impl GenerationRequest {
    /// Request with just a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Attach a system instruction
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Attach explicit context turns
    pub fn with_context(mut self, context: Vec<Turn>) -> Self {
        self.context = context;
        self
    }
}
