//! Built-in model table and fallback roster.

use super::card::{Candidate, ModelCard, Provider};

/// Context limit assumed for models missing from the registry.
pub const DEFAULT_CONTEXT_LIMIT: usize = 8_192;

/// (provider, model id, context limit)
const EMBEDDED_MODELS: &[(Provider, &str, usize)] = &[
    (Provider::Gemini, "gemini-2.0-flash", 1_048_576),
    (Provider::Gemini, "gemini-2.0-flash-lite", 1_048_576),
    (Provider::Gemini, "gemini-1.5-flash", 1_048_576),
    (Provider::Gemini, "gemini-1.5-pro", 2_097_152),
    (Provider::OpenAI, "gpt-4o", 128_000),
    (Provider::OpenAI, "gpt-4o-mini", 128_000),
    (Provider::OpenAI, "gpt-4", 8_192),
    (Provider::Groq, "llama-3.3-70b-versatile", 128_000),
    (Provider::Groq, "llama-3.1-8b-instant", 128_000),
    (Provider::Groq, "gemma2-9b-it", 8_192),
    (Provider::OpenRouter, "meta-llama/llama-3.3-70b-instruct:free", 131_072),
    (Provider::OpenRouter, "deepseek/deepseek-chat:free", 64_000),
    (Provider::DeepSeek, "deepseek-chat", 64_000),
    (Provider::DeepSeek, "deepseek-reasoner", 64_000),
    (Provider::Mistral, "mistral-small-latest", 32_000),
    (Provider::Mistral, "mistral-large-latest", 128_000),
];

/// Known-reliable fallbacks appended after the requested model.
const FALLBACK_ROSTER: &[(Provider, &str)] = &[
    (Provider::Gemini, "gemini-2.0-flash"),
    (Provider::Groq, "llama-3.3-70b-versatile"),
    (Provider::OpenRouter, "meta-llama/llama-3.3-70b-instruct:free"),
    (Provider::Mistral, "mistral-small-latest"),
];

/// Default race roster: one fast model per provider.
const RACE_ROSTER: &[(Provider, &str)] = &[
    (Provider::Gemini, "gemini-2.0-flash"),
    (Provider::Groq, "llama-3.3-70b-versatile"),
    (Provider::OpenRouter, "meta-llama/llama-3.3-70b-instruct:free"),
];

/// All embedded model cards.
pub fn get_embedded_models() -> Vec<ModelCard> {
    EMBEDDED_MODELS
        .iter()
        .map(|(provider, id, limit)| ModelCard::new(id, *provider, *limit))
        .collect()
}

/// Default fallback roster for sequential failover.
pub fn default_fallbacks() -> Vec<Candidate> {
    FALLBACK_ROSTER
        .iter()
        .map(|(provider, model)| Candidate::new(*provider, *model))
        .collect()
}

/// Default candidate roster for racing.
pub fn default_race_roster() -> Vec<Candidate> {
    RACE_ROSTER
        .iter()
        .map(|(provider, model)| Candidate::new(*provider, *model))
        .collect()
}
