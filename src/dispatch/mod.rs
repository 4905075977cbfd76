//! Request dispatch across upstream providers.
//!
//! Two dispatchers share the key pool and the engine set:
//!
//! - [`ProviderRaceDispatcher`] sends one request to every roster
//!   candidate at once and streams from whichever produces output first.
//! - [`SequentialFailoverDispatcher`] tries a priority list one candidate
//!   at a time, rerouting on failure, and keeps the conversation history.
//!
//! Both return a [`ChunkStream`]: lazy, single-pass, driven by the caller.
//! Dropping it cancels whatever is still in flight. Total exhaustion is
//! reported as a final content chunk, never as an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use peerlink::dispatch::{GenerationRequest, SequentialFailoverDispatcher};
//!
//! let dispatcher = SequentialFailoverDispatcher::from_config(&config, pool, engines)?;
//! let mut stream = dispatcher.execute(GenerationRequest::new("hello"), &[]);
//! while let Some(chunk) = stream.next().await {
//!     if let Some(text) = chunk.text {
//!         print!("{text}");
//!     }
//! }
//! ```

mod attempt;
mod chunk;
mod failover;
mod history;
mod race;
mod request;

pub use chunk::{Chunk, ChunkStream, Citation, Exhaustion, Grounding, StreamStatus, ToolCall};
pub use failover::{SequentialFailoverDispatcher, DEFAULT_HISTORY_TURNS};
pub use history::{trim_context, ConversationHistory, Role, Turn};
pub use race::ProviderRaceDispatcher;
pub use request::GenerationRequest;
