//! Token estimation for context budgeting.
//!
//! # Supported Encodings
//!
//! - **cl100k_base**: GPT-3.5, GPT-4
//! - **o200k_base**: GPT-4o, o1, o3 models
//! - **heuristic**: ~4 characters per token fallback (Gemini, Llama, Mistral, ...)

mod counter;

pub use counter::{count_tokens_with_encoding, TokenCounter, TURN_OVERHEAD_TOKENS};
