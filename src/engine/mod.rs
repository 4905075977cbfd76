//! Upstream generation engines.
//!
//! An [`Engine`] turns one [`EngineRequest`] into a stream of output
//! chunks from a single upstream. Engines know nothing about racing,
//! failover or key health; the dispatchers own that.
//!
//! # Engines
//!
//! | Engine | Upstream | Wire format |
//! |--------|----------|-------------|
//! | [`OpenAiEngine`] | OpenAI, Groq, OpenRouter, DeepSeek, Mistral | chat-completions SSE |
//! | [`GeminiEngine`] | Google Gemini | `streamGenerateContent` SSE |
//! | [`ManagedEngine`] | managed backend | streamed plain text |
//!
//! [`EngineSet`] maps a (provider, credential) pair to the engine that must
//! serve it: direct keys go to the provider's engine, the managed sentinel
//! goes to the managed backend.

mod gemini;
mod managed;
mod openai;
mod sse;

pub use gemini::GeminiEngine;
pub use managed::ManagedEngine;
pub use openai::OpenAiEngine;
pub use sse::{SseDecoder, SseEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;

use crate::config::Config;
use crate::dispatch::{Chunk, GenerationRequest, Turn};
use crate::error::{PeerlinkError, Result};
use crate::keypool::Credential;
use crate::models::{ApiStyle, Candidate, Provider};

/// Chunks from one upstream; an `Err` ends the stream.
pub type EngineStream = BoxStream<'static, Result<Chunk>>;

/// Everything an engine needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    /// Target provider
    pub provider: Provider,
    /// Target model
    pub model: String,
    /// System instruction
    pub instruction: Option<String>,
    /// Prior turns, oldest first
    pub context: Vec<Turn>,
    /// The prompt
    pub prompt: String,
}

impl EngineRequest {
    /// Build from a candidate, a logical request and already-trimmed context
    pub fn new(candidate: &Candidate, request: &GenerationRequest, context: Vec<Turn>) -> Self {
        Self {
            provider: candidate.provider,
            model: candidate.model.clone(),
            instruction: request.instruction.clone(),
            context,
            prompt: request.prompt.clone(),
        }
    }
}

/// A single upstream generation backend.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    /// Send the request and return the output stream once the upstream
    /// has accepted it. Non-success statuses are returned as
    /// [`PeerlinkError::Upstream`].
    async fn open(&self, request: &EngineRequest, credential: &Credential)
        -> Result<EngineStream>;
}

/// Engines by provider plus the optional managed backend.
#[derive(Clone, Default)]
pub struct EngineSet {
    direct: HashMap<Provider, Arc<dyn Engine>>,
    managed: Option<Arc<dyn Engine>>,
}

impl EngineSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the engine serving direct keys of `provider`
    pub fn with_engine(mut self, provider: Provider, engine: Arc<dyn Engine>) -> Self {
        self.direct.insert(provider, engine);
        self
    }

    /// Register the managed backend
    pub fn with_managed(mut self, engine: Arc<dyn Engine>) -> Self {
        self.managed = Some(engine);
        self
    }

    /// HTTP engines for every provider, plus the managed backend when configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.endpoints.timeout_secs))
            .build()
            .map_err(|e| PeerlinkError::Network(format!("Failed to create HTTP client: {e}")))?;

        let mut set = Self::new();
        for provider in Provider::ALL {
            let base_url = config.endpoints.base_url(provider);
            let engine: Arc<dyn Engine> = match provider.api_style() {
                ApiStyle::OpenAiCompatible => {
                    Arc::new(OpenAiEngine::new(provider, base_url, client.clone()))
                },
                ApiStyle::Gemini => Arc::new(GeminiEngine::new(base_url, client.clone())),
            };
            set = set.with_engine(provider, engine);
        }

        if let Some(url) = &config.managed.url {
            let managed_client = Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(config.managed.timeout_secs))
                .build()
                .map_err(|e| {
                    PeerlinkError::Network(format!("Failed to create HTTP client: {e}"))
                })?;
            set = set.with_managed(Arc::new(ManagedEngine::new(url.clone(), managed_client)));
        }

        Ok(set)
    }

    /// The engine that must serve `provider` with `credential`.
    pub fn resolve(&self, provider: Provider, credential: &Credential) -> Result<Arc<dyn Engine>> {
        let engine = match credential {
            Credential::Managed => self.managed.clone(),
            Credential::Key(_) => self.direct.get(&provider).cloned(),
        };
        engine.ok_or(PeerlinkError::NoEngine(provider))
    }
}

/// Turn a non-success response into [`PeerlinkError::Upstream`].
pub(crate) async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > 512 {
        let mut cut = 512;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("error").to_string();
    }

    Err(PeerlinkError::Upstream {
        provider,
        status: status.as_u16(),
        message,
    })
}
