//! # Peerlink - Resilient Peer Signaling and Multi-Provider LLM Dispatch
//!
//! The connection-resilience core of an encrypted peer-to-peer messaging
//! client with a built-in AI assistant. Two independent components share
//! one shape: race several unreliable channels, adopt the first success,
//! retry with backoff on total failure.
//!
//! ## Features
//!
//! - **Connection supervision**: one signaling transport per identity, healed
//!   automatically with exponential backoff, rate-limit cooldowns and
//!   identity-collision remediation
//! - **Provider racing**: one request to several LLM providers at once,
//!   first output chunk wins, losers cancelled
//! - **Sequential failover**: priority list with rerouting notices and
//!   token-budgeted conversation history
//! - **Key pool**: round-robin credentials with graded cooldowns, plus a
//!   managed-backend sentinel
//!
//! ## Architecture
//!
//! ```text
//!   UI intent
//!      │
//!      ├──► ConnectionSupervisor ──► PeerNetwork (transport)
//!      │         │ status (watch)
//!      │
//!      ├──► ProviderRaceDispatcher ───────┐
//!      │                                  ├──► KeyPool ──► EngineSet ──► providers
//!      └──► SequentialFailoverDispatcher ─┘                    └──► managed backend
//!                │
//!                └── ChunkStream (text, tool calls, grounding, status)
//! ```
//!
//! ### Supervisor State Machine
//!
//! ```text
//!             start()                 Open
//!   [Init] ───────────> [Connecting] ─────────> [Ready]
//!      ^                  │    ^  ^               │
//!      │ stop()      error│    │  │ retry timer   │ Disconnected / Closed
//!      │                  v    │  │               v
//!      └──────────── [Error | RateLimited] <── [Disconnected]
//! ```
//!
//! ### Exhaustion Outcomes
//!
//! | Dispatcher | Outcome | Meaning |
//! |------------|---------|---------|
//! | race | `timeout` | nothing produced output before the deadline |
//! | race | `all_engines_failed` | every candidate failed |
//! | failover | `no_credentials` | no request was sent at all |
//! | failover | `all_candidates_failed` | requests were sent and all failed |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use peerlink::{Config, EngineSet, GenerationRequest, KeyPool, ProviderRaceDispatcher};
//!
//! let config = Config::load(None)?;
//! let pool = Arc::new(KeyPool::from_config(&config));
//! let engines = Arc::new(EngineSet::from_config(&config)?);
//!
//! let racer = ProviderRaceDispatcher::from_config(&config, pool, engines)?;
//! let mut stream = racer.race(GenerationRequest::new("Summarise RFC 9000 in one line"));
//! while let Some(chunk) = stream.next().await {
//!     if let Some(text) = chunk.text {
//!         print!("{text}");
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`supervisor`]: peer transport supervision
//! - [`dispatch`]: race and failover dispatchers, chunks, history
//! - [`engine`]: upstream provider engines
//! - [`keypool`]: credential pool and failure classification
//! - [`models`]: providers, model cards, rosters
//! - [`tokenizer`]: token estimation
//! - [`config`]: configuration management
//! - [`error`]: error types and result aliases

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod keypool;
pub mod models;
pub mod supervisor;
pub mod tokenizer;

// Re-exports for convenience
pub use config::Config;
pub use dispatch::{
    Chunk, ChunkStream, Exhaustion, GenerationRequest, ProviderRaceDispatcher,
    SequentialFailoverDispatcher, StreamStatus,
};
pub use engine::{Engine, EngineRequest, EngineSet, EngineStream};
pub use error::{PeerlinkError, Result};
pub use keypool::{Credential, KeyPool};
pub use models::{Candidate, ModelCard, ModelRegistry, Provider};
pub use supervisor::{ConnectionState, ConnectionSupervisor, Identity, SupervisorStatus};
pub use tokenizer::TokenCounter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
