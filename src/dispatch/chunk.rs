//! Output chunks streamed to callers.

use std::fmt;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::Candidate;

/// Lazy, single-pass sequence of chunks returned by the dispatchers.
pub type ChunkStream = BoxStream<'static, Chunk>;

/// One unit of streamed output.
///
/// Every field is optional; consumers accumulate `text`, act on
/// `tool_call`, render `grounding`, and show `status` out of band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Generated text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Structured tool/function invocation request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Grounding/citation metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Grounding>,
    /// Out-of-band status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,
}

impl Chunk {
    /// Text chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Tool invocation chunk
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Default::default()
        }
    }

    /// Grounding chunk
    pub fn grounding(grounding: Grounding) -> Self {
        Self {
            grounding: Some(grounding),
            ..Default::default()
        }
    }

    /// Status chunk
    pub fn status(status: StreamStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal chunk: a user-facing message plus the exhaustion reason.
    pub fn exhausted(reason: Exhaustion) -> Self {
        Self {
            text: Some(reason.message()),
            status: Some(StreamStatus::Exhausted { reason }),
            ..Default::default()
        }
    }

    /// Whether the chunk carries model output (as opposed to status only)
    pub fn is_output(&self) -> bool {
        self.status.is_none()
            && (self.text.as_deref().is_some_and(|t| !t.is_empty())
                || self.tool_call.is_some()
                || self.grounding.is_some())
    }
}

/// A model's request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, when the provider issues one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name
    pub name: String,
    /// Arguments object
    pub arguments: serde_json::Value,
}

/// Sources the model grounded its answer on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grounding {
    /// Cited sources
    pub citations: Vec<Citation>,
    /// Search queries the provider issued
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
}

/// One cited source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Source URI
    pub uri: String,
    /// Source title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Out-of-band status attached to a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamStatus {
    /// A candidate failed; the dispatcher is moving on to `next`.
    Rerouting {
        /// Candidate that failed
        failed: Candidate,
        /// Candidate tried next
        next: Candidate,
    },
    /// The dispatcher gave up.
    Exhausted {
        /// Why nothing was produced
        reason: Exhaustion,
    },
}

/// Why a dispatcher produced no model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exhaustion {
    /// Race: no candidate produced a first chunk before the deadline
    Timeout,
    /// Race: every candidate failed
    AllEnginesFailed,
    /// No candidate had a credential, so nothing was sent
    NoCredentials,
    /// At least one request was sent and every attempted candidate failed
    AllCandidatesFailed,
}

impl Exhaustion {
    /// User-facing message
    pub fn message(&self) -> String {
        match self {
            Exhaustion::Timeout => {
                "No AI engine responded in time. Please try again in a moment.".to_string()
            },
            Exhaustion::AllEnginesFailed => {
                "All AI engines failed to respond. Please try again in a moment.".to_string()
            },
            Exhaustion::NoCredentials => "No API credentials detected. Configure at least one \
                 provider key (for example GEMINI_API_KEY or PEERLINK_GROQ_KEYS) or enable the \
                 managed backend."
                .to_string(),
            Exhaustion::AllCandidatesFailed => "Every available model failed to answer. Your \
                 keys may be rate limited; please wait a minute and try again."
                .to_string(),
        }
    }
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Exhaustion::Timeout => "timeout",
            Exhaustion::AllEnginesFailed => "all_engines_failed",
            Exhaustion::NoCredentials => "no_credentials",
            Exhaustion::AllCandidatesFailed => "all_candidates_failed",
        };
        f.write_str(name)
    }
}
