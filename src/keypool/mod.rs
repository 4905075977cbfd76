//! Shared credential pool.
//!
//! Holds zero or more credentials per provider, hands them out round-robin
//! among the currently eligible entries, and parks failing credentials in
//! a cooldown whose length depends on how the failure is classified:
//!
//! | Failure class | Recognised by | Default cooldown |
//! |---------------|---------------|------------------|
//! | `RateLimit`   | HTTP 429, "quota", "rate limit", "resource exhausted" | 5 min |
//! | `ServerError` | HTTP 5xx, "overloaded", "unavailable" | 60 s |
//! | `Generic`     | anything else | 15 s |
//!
//! Cooled-down entries heal lazily on the next [`KeyPool::acquire`].
//!
//! When secure-backend mode is active, providers without a local key get
//! the [`Credential::Managed`] sentinel, which routes requests through the
//! managed backend and is exempt from cooldown bookkeeping.

mod classify;
mod credential;
mod pool;

pub use classify::{CooldownPolicy, FailureClass};
pub use credential::{parse_credential_list, ApiKey, Credential};
pub use pool::{KeyEntry, KeyPool, KeyStatus, ProviderStatus};

use crate::config::Config;
use crate::models::Provider;

impl KeyPool {
    /// Build the pool from configuration.
    ///
    /// Unknown provider ids in the config are skipped with a warning.
    pub fn from_config(config: &Config) -> Self {
        let pool = KeyPool::new(config.keys.policy());

        for (id, keys) in &config.keys.providers {
            match id.parse::<Provider>() {
                Ok(provider) => {
                    pool.insert(provider, keys.iter().map(Credential::key).collect());
                },
                Err(e) => tracing::warn!("Ignoring credentials: {}", e),
            }
        }

        if config.managed.enabled() {
            let configured = pool.providers();
            for provider in Provider::ALL {
                if !configured.contains(&provider) {
                    pool.insert(provider, vec![Credential::Managed]);
                }
            }
        }

        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_direct_keys_only() {
        let mut config = Config::default();
        config
            .keys
            .providers
            .insert("groq".to_string(), vec!["g1".to_string()]);
        config
            .keys
            .providers
            .insert("nope".to_string(), vec!["x".to_string()]);

        let pool = KeyPool::from_config(&config);
        assert_eq!(pool.providers(), vec![Provider::Groq]);
        assert_eq!(pool.acquire(Provider::Gemini), None);
    }

    #[test]
    fn test_from_config_managed_fills_gaps() {
        let mut config = Config::default();
        config.managed.url = Some("https://backend.example".to_string());
        config
            .keys
            .providers
            .insert("groq".to_string(), vec!["g1".to_string()]);

        let pool = KeyPool::from_config(&config);
        assert_eq!(pool.acquire(Provider::Groq), Some(Credential::key("g1")));
        assert_eq!(pool.acquire(Provider::Gemini), Some(Credential::Managed));
        assert_eq!(pool.providers().len(), Provider::ALL.len());
    }
}
