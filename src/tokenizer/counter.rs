//! Token counting implementation.
//!
//! Uses tiktoken-rs for accurate BPE token counting with lazy-loaded encoders.
//! Encoders that fail to load degrade to the heuristic instead of panicking.

use std::sync::OnceLock;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::models::Encoding;

// Lazy-loaded tokenizer instances (thread-safe singletons)
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_cl100k() -> Option<&'static CoreBPE> {
    CL100K
        .get_or_init(|| match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("cl100k_base unavailable, using heuristic: {}", e);
                None
            },
        })
        .as_ref()
}

fn get_o200k() -> Option<&'static CoreBPE> {
    O200K
        .get_or_init(|| match o200k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("o200k_base unavailable, using heuristic: {}", e);
                None
            },
        })
        .as_ref()
}

/// Count tokens with a specific encoding
///
/// # Example
/// ```
/// use peerlink::tokenizer::count_tokens_with_encoding;
/// use peerlink::models::Encoding;
///
/// // Unknown models use heuristic (~4 chars per token)
/// assert_eq!(count_tokens_with_encoding("abcdefgh", Encoding::Heuristic), 2);
/// ```
pub fn count_tokens_with_encoding(text: &str, encoding: Encoding) -> usize {
    let bpe = match encoding {
        Encoding::Cl100kBase => get_cl100k(),
        Encoding::O200kBase => get_o200k(),
        Encoding::Heuristic => None,
    };

    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => heuristic_count(text),
    }
}

/// Heuristic token count (~4 characters per token, rounded up)
fn heuristic_count(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Per-encoding token counter used when costing conversation turns.
///
/// # Example
/// ```
/// use peerlink::tokenizer::{TokenCounter, TURN_OVERHEAD_TOKENS};
/// use peerlink::models::Encoding;
///
/// let counter = TokenCounter::new(Encoding::Heuristic);
/// assert_eq!(counter.count("abcd"), 1);
/// assert_eq!(counter.count_turn("abcd"), 1 + TURN_OVERHEAD_TOKENS);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    encoding: Encoding,
}

/// Fixed cost of role/framing tokens added to every turn.
pub const TURN_OVERHEAD_TOKENS: usize = 4;

impl TokenCounter {
    /// Create a new token counter with the specified encoding
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Create a token counter for a model ID
    pub fn for_model(model: &str) -> Self {
        Self::new(Encoding::infer_from_id(model))
    }

    /// Count tokens in text
    pub fn count(&self, text: &str) -> usize {
        count_tokens_with_encoding(text, self.encoding)
    }

    /// Estimated cost of one conversation turn, including framing overhead.
    pub fn count_turn(&self, content: &str) -> usize {
        self.count(content) + TURN_OVERHEAD_TOKENS
    }

    /// Get the encoding
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}
