//! Provider and model metadata.
//!
//! This module provides:
//! - The [`Provider`] enum and its endpoint/env conventions
//! - Model cards with context limits used by the context trimmer
//! - The default fallback and race rosters
//!
//! # Example
//!
//! ```
//! use peerlink::models::{ModelRegistry, Provider};
//!
//! let registry = ModelRegistry::new();
//! let card = registry.get("llama-3.3-70b-versatile").unwrap();
//! assert_eq!(card.provider, Provider::Groq);
//! ```

mod card;
mod embedded;
mod registry;

pub use card::{ApiStyle, Candidate, Encoding, ModelCard, Provider};
pub use embedded::{
    default_fallbacks, default_race_roster, get_embedded_models, DEFAULT_CONTEXT_LIMIT,
};
pub use registry::ModelRegistry;
