//! Model card data structures.
//!
//! This module defines the core types for model metadata:
//! - `Provider`: upstream LLM provider the dispatchers can route to
//! - `Encoding`: tokenizer encoding used for context budgeting
//! - `ModelCard`: context limit and encoding for one model
//! - `Candidate`: a (provider, model) pair the dispatchers try

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream LLM provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini (`generativelanguage.googleapis.com`)
    Gemini,
    /// OpenAI chat completions
    OpenAI,
    /// Groq (OpenAI-compatible)
    Groq,
    /// OpenRouter (OpenAI-compatible aggregator)
    OpenRouter,
    /// DeepSeek (OpenAI-compatible)
    DeepSeek,
    /// Mistral AI (OpenAI-compatible)
    Mistral,
}

/// Wire protocol spoken by a provider's streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    /// `POST /chat/completions` with `stream: true`
    OpenAiCompatible,
    /// `POST /models/{model}:streamGenerateContent?alt=sse`
    Gemini,
}

impl Provider {
    /// Every provider, in default routing order.
    pub const ALL: [Provider; 6] = [
        Provider::Gemini,
        Provider::OpenAI,
        Provider::Groq,
        Provider::OpenRouter,
        Provider::DeepSeek,
        Provider::Mistral,
    ];

    /// Get provider display name
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::DeepSeek => "DeepSeek",
            Provider::Mistral => "Mistral",
        }
    }

    /// Lowercase identifier used in config keys and on the wire.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
            Provider::DeepSeek => "deepseek",
            Provider::Mistral => "mistral",
        }
    }

    /// Conventional single-key environment variable.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
        }
    }

    /// Multi-key pool environment variable (`PEERLINK_<ID>_KEYS`).
    pub fn pool_var(&self) -> String {
        format!("PEERLINK_{}_KEYS", self.id().to_uppercase())
    }

    /// Default API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
        }
    }

    /// Wire protocol of the streaming endpoint.
    pub fn api_style(&self) -> ApiStyle {
        match self {
            Provider::Gemini => ApiStyle::Gemini,
            _ => ApiStyle::OpenAiCompatible,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            "groq" => Ok(Provider::Groq),
            "openrouter" => Ok(Provider::OpenRouter),
            "deepseek" => Ok(Provider::DeepSeek),
            "mistral" | "mistralai" => Ok(Provider::Mistral),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Tokenizer encoding type
///
/// Different models use different tokenizers. The encoding decides how
/// conversation turns are costed against a context limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Encoding {
    /// OpenAI cl100k_base encoding (GPT-3.5, GPT-4) - via tiktoken
    Cl100kBase,
    /// OpenAI o200k_base encoding (GPT-4o, o1, o3) - via tiktoken
    O200kBase,
    /// Heuristic fallback (~4 characters per token)
    #[default]
    Heuristic,
}

impl Encoding {
    /// Infer encoding from model ID
    ///
    /// # Examples
    /// ```
    /// use peerlink::models::Encoding;
    ///
    /// assert_eq!(Encoding::infer_from_id("gpt-4o-mini"), Encoding::O200kBase);
    /// assert_eq!(Encoding::infer_from_id("openai/gpt-4"), Encoding::Cl100kBase);
    /// assert_eq!(Encoding::infer_from_id("gemini-2.0-flash"), Encoding::Heuristic);
    /// ```
    pub fn infer_from_id(id: &str) -> Self {
        let id_lower = id.to_lowercase();

        if id_lower.contains("gpt-4o")
            || id_lower.contains("gpt-4.1")
            || id_lower.starts_with("o1")
            || id_lower.starts_with("o3")
            || id_lower.contains("/o1")
            || id_lower.contains("/o3")
        {
            return Encoding::O200kBase;
        }

        if id_lower.contains("gpt-3") || id_lower.contains("gpt-4") {
            return Encoding::Cl100kBase;
        }

        Encoding::Heuristic
    }

    /// Get encoding name as string
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
            Encoding::Heuristic => "heuristic",
        }
    }
}

/// Model metadata card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCard {
    /// Model ID as the provider expects it (e.g., "gemini-2.0-flash")
    pub id: String,

    /// Provider serving the model
    pub provider: Provider,

    /// Tokenizer encoding
    pub encoding: Encoding,

    /// Context window size in tokens
    pub context_limit: usize,
}

impl ModelCard {
    /// Create a card, inferring the encoding from the ID.
    pub fn new(id: &str, provider: Provider, context_limit: usize) -> Self {
        Self {
            id: id.to_string(),
            provider,
            encoding: Encoding::infer_from_id(id),
            context_limit,
        }
    }
}

/// A (provider, model) pair a dispatcher can route a request to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Provider serving the model
    pub provider: Provider,
    /// Model ID
    pub model: String,
}

impl Candidate {
    /// Create a candidate
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.id(), self.model)
    }
}

impl FromStr for Candidate {
    type Err = String;

    /// Parse `provider/model` (the model part may itself contain slashes).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once('/')
            .ok_or_else(|| format!("Expected provider/model, got: {}", s))?;
        if model.is_empty() {
            return Err(format!("Missing model in: {}", s));
        }
        Ok(Candidate::new(provider.parse()?, model))
    }
}
