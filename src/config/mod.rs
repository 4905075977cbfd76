//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `peerlink` binary)
//!
//! Environment values are layered over the file with [`Config::merge`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PeerlinkError, Result};
use crate::keypool::{parse_credential_list, CooldownPolicy};
use crate::models::{default_fallbacks, default_race_roster, Candidate, Provider};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Connection supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Race dispatcher configuration
    #[serde(default)]
    pub race: RaceConfig,

    /// Sequential failover configuration
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Credential pool configuration
    #[serde(default)]
    pub keys: KeysConfig,

    /// Managed backend configuration
    #[serde(default)]
    pub managed: ManagedConfig,

    /// Upstream endpoint configuration
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PeerlinkError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| PeerlinkError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/peerlink/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("peerlink").join("config.toml"))
    }

    /// Load the default file (if present) with environment overrides on top.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let file = match path.or_else(Self::default_path) {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        Ok(file.merge(Self::from_env()))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = var("PEERLINK_RACE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.race.timeout_ms = val;
        }
        if let Some(val) = var("PEERLINK_BACKOFF_BASE_MS").and_then(|v| v.parse().ok()) {
            config.supervisor.backoff_base_ms = val;
        }
        if let Some(val) = var("PEERLINK_BACKOFF_MAX_MS").and_then(|v| v.parse().ok()) {
            config.supervisor.backoff_max_ms = val;
        }
        if let Some(url) = var("PEERLINK_MANAGED_URL").filter(|u| !u.trim().is_empty()) {
            config.managed.url = Some(url.trim().to_string());
        }

        for provider in Provider::ALL {
            let mut keys = var(&provider.pool_var())
                .map(|raw| parse_credential_list(&raw))
                .unwrap_or_default();
            if let Some(single) = var(provider.api_key_var()) {
                for key in parse_credential_list(&single) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            if !keys.is_empty() {
                config.keys.providers.insert(provider.id().to_string(), keys);
            }
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        fn pick<T: PartialEq>(mine: T, theirs: T, default: T) -> T {
            if theirs != default {
                theirs
            } else {
                mine
            }
        }

        let sup_default = SupervisorConfig::default();
        let race_default = RaceConfig::default();

        let mut providers = self.keys.providers;
        providers.extend(other.keys.providers);

        let mut base_urls = self.endpoints.base_urls;
        base_urls.extend(other.endpoints.base_urls);

        Self {
            supervisor: SupervisorConfig {
                backoff_base_ms: pick(
                    self.supervisor.backoff_base_ms,
                    other.supervisor.backoff_base_ms,
                    sup_default.backoff_base_ms,
                ),
                backoff_max_ms: pick(
                    self.supervisor.backoff_max_ms,
                    other.supervisor.backoff_max_ms,
                    sup_default.backoff_max_ms,
                ),
                ..self.supervisor
            },
            race: RaceConfig {
                timeout_ms: pick(self.race.timeout_ms, other.race.timeout_ms, race_default.timeout_ms),
                ..self.race
            },
            failover: self.failover,
            keys: KeysConfig {
                providers,
                ..self.keys
            },
            managed: ManagedConfig {
                url: other.managed.url.or(self.managed.url),
                ..self.managed
            },
            endpoints: EndpointsConfig {
                base_urls,
                ..self.endpoints
            },
        }
    }
}

/// Connection supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// First retry delay
    pub backoff_base_ms: u64,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Cap on the computed retry delay
    pub backoff_max_ms: u64,
    /// Fixed delay after a rate-limit error
    pub rate_limit_cooldown_ms: u64,
    /// Retry budget forced after a rate-limit error
    pub rate_limit_budget_floor: u32,
    /// Interval of the disconnected-transport watchdog
    pub watchdog_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_factor: 2.0,
            backoff_max_ms: 30_000,
            rate_limit_cooldown_ms: 60_000,
            rate_limit_budget_floor: 5,
            watchdog_interval_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    /// Watchdog interval as a Duration
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

/// Race dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Deadline for any candidate to produce its first chunk
    pub timeout_ms: u64,
    /// Candidate roster as `provider/model` strings
    pub roster: Vec<String>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            roster: default_race_roster().iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl RaceConfig {
    /// Race deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parsed roster
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        parse_candidates(&self.roster)
    }
}

/// Sequential failover configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Turns of conversation history retained
    pub history_turns: usize,
    /// Tokens kept free for the prompt and the reply when trimming context
    pub reserved_headroom_tokens: usize,
    /// Deadline for an attempt's first chunk
    pub first_chunk_timeout_ms: u64,
    /// Known-reliable fallbacks as `provider/model` strings
    pub fallbacks: Vec<String>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            history_turns: 50,
            reserved_headroom_tokens: 1_024,
            first_chunk_timeout_ms: 30_000,
            fallbacks: default_fallbacks().iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl FailoverConfig {
    /// First-chunk deadline as a Duration
    pub fn first_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.first_chunk_timeout_ms)
    }

    /// Parsed fallbacks
    pub fn fallback_candidates(&self) -> Result<Vec<Candidate>> {
        parse_candidates(&self.fallbacks)
    }
}

/// Credential pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Cooldown after a rate-limit failure
    pub rate_limit_cooldown_secs: u64,
    /// Cooldown after a server failure
    pub server_error_cooldown_secs: u64,
    /// Cooldown after any other failure
    pub generic_cooldown_secs: u64,
    /// Provider id -> keys
    pub providers: BTreeMap<String, Vec<String>>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        let policy = CooldownPolicy::default();
        Self {
            rate_limit_cooldown_secs: policy.rate_limit.as_secs(),
            server_error_cooldown_secs: policy.server_error.as_secs(),
            generic_cooldown_secs: policy.generic.as_secs(),
            providers: BTreeMap::new(),
        }
    }
}

impl KeysConfig {
    /// Cooldown policy built from the configured durations
    pub fn policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            rate_limit: Duration::from_secs(self.rate_limit_cooldown_secs),
            server_error: Duration::from_secs(self.server_error_cooldown_secs),
            generic: Duration::from_secs(self.generic_cooldown_secs),
        }
    }
}

/// Managed backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedConfig {
    /// Endpoint URL; setting it enables secure-backend mode
    pub url: Option<String>,
    /// Request timeout
    pub timeout_secs: u64,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 120,
        }
    }
}

impl ManagedConfig {
    /// Whether secure-backend mode is active
    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }
}

/// Upstream endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Provider id -> base URL override
    pub base_urls: BTreeMap<String, String>,
    /// Request timeout
    pub timeout_secs: u64,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            base_urls: BTreeMap::new(),
            timeout_secs: 120,
        }
    }
}

impl EndpointsConfig {
    /// Base URL for a provider (override or default)
    pub fn base_url(&self, provider: Provider) -> String {
        self.base_urls
            .get(provider.id())
            .cloned()
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }
}

fn parse_candidates(list: &[String]) -> Result<Vec<Candidate>> {
    list.iter()
        .map(|s| s.parse::<Candidate>().map_err(PeerlinkError::Config))
        .collect()
}
