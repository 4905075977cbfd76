//! Model registry for context-limit and encoding lookups.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::card::{Encoding, ModelCard};
use crate::models::embedded::{get_embedded_models, DEFAULT_CONTEXT_LIMIT};

/// Model registry with embedded + runtime-registered models
///
/// # Example
/// ```
/// use peerlink::models::{ModelRegistry, ModelCard, Provider};
///
/// let registry = ModelRegistry::new();
/// assert_eq!(registry.context_limit("gpt-4"), 8_192);
///
/// registry.register(ModelCard::new("my-finetune", Provider::OpenAI, 4_096));
/// assert_eq!(registry.context_limit("my-finetune"), 4_096);
/// ```
pub struct ModelRegistry {
    /// ID -> ModelCard
    by_id: HashMap<String, ModelCard>,

    /// Cards registered at runtime (config overrides, tests)
    dynamic: RwLock<HashMap<String, ModelCard>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Create a new registry with embedded models loaded
    pub fn new() -> Self {
        let by_id = get_embedded_models()
            .into_iter()
            .map(|card| (card.id.clone(), card))
            .collect();

        Self {
            by_id,
            dynamic: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a model card.
    pub fn register(&self, card: ModelCard) {
        if let Ok(mut dynamic) = self.dynamic.write() {
            dynamic.insert(card.id.clone(), card);
        }
    }

    /// Get a model by ID. Runtime registrations shadow embedded cards.
    pub fn get(&self, id: &str) -> Option<ModelCard> {
        if let Ok(dynamic) = self.dynamic.read() {
            if let Some(card) = dynamic.get(id) {
                return Some(card.clone());
            }
        }
        self.by_id.get(id).cloned()
    }

    /// Context limit for a model (with conservative default)
    pub fn context_limit(&self, model: &str) -> usize {
        self.get(model)
            .map(|c| c.context_limit)
            .unwrap_or(DEFAULT_CONTEXT_LIMIT)
    }

    /// Encoding for a model (with fallback inference)
    pub fn encoding(&self, model: &str) -> Encoding {
        self.get(model)
            .map(|c| c.encoding)
            .unwrap_or_else(|| Encoding::infer_from_id(model))
    }

    /// Total number of known models
    pub fn len(&self) -> usize {
        let dynamic = self.dynamic.read().map(|d| d.len()).unwrap_or(0);
        self.by_id.len() + dynamic
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    #[test]
    fn test_lookup_embedded() {
        let registry = ModelRegistry::new();
        let card = registry.get("gemini-2.0-flash").unwrap();
        assert_eq!(card.provider, Provider::Gemini);
        assert!(card.context_limit > 1_000_000);
    }

    #[test]
    fn test_unknown_model_defaults() {
        let registry = ModelRegistry::new();
        assert_eq!(registry.context_limit("nobody/knows"), DEFAULT_CONTEXT_LIMIT);
        assert_eq!(registry.encoding("nobody/knows"), Encoding::Heuristic);
        assert_eq!(registry.encoding("gpt-4o-2024-08-06"), Encoding::O200kBase);
    }

    #[test]
    fn test_register_shadows_embedded() {
        let registry = ModelRegistry::new();
        registry.register(ModelCard::new("gpt-4o", Provider::OpenAI, 1_000));
        assert_eq!(registry.context_limit("gpt-4o"), 1_000);
    }
}
