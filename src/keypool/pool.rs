//! Round-robin credential pool with graded cooldowns.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::classify::{CooldownPolicy, FailureClass};
use super::credential::Credential;
use crate::error::PeerlinkError;
use crate::models::Provider;

/// Eligibility of one pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Eligible for selection
    Active,
    /// Sitting out until `cooldown_until`
    Cooldown,
}

/// One credential and its health.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    /// The credential
    pub credential: Credential,
    /// Current status
    pub status: KeyStatus,
    /// Failures reported since the pool was built
    pub failure_count: u32,
    /// When the cooldown ends (only meaningful in `Cooldown`)
    pub cooldown_until: Option<Instant>,
}

impl KeyEntry {
    fn new(credential: Credential) -> Self {
        Self {
            credential,
            status: KeyStatus::Active,
            failure_count: 0,
            cooldown_until: None,
        }
    }

    /// Eligible at `now`, treating an elapsed cooldown as healed.
    fn eligible_at(&self, now: Instant) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Cooldown => self.cooldown_until.is_none_or(|until| now >= until),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderKeys {
    entries: Vec<KeyEntry>,
    cursor: usize,
    managed_failures: u64,
}

/// Per-provider health summary. Observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    /// At least one credential is eligible right now
    pub healthy: bool,
    /// Number of credentials configured
    pub total: usize,
    /// Whole minutes (rounded up) until the next credential becomes eligible; 0 when healthy
    pub minutes_until_available: u64,
    /// Whether the provider is served through the managed backend
    pub managed: bool,
    /// Failures observed against the managed sentinel
    pub managed_failures: u64,
}

/// Shared credential pool.
///
/// All operations take the internal lock for the duration of a single
/// call and never await while holding it, so concurrent candidates of a
/// race observe each update atomically.
///
/// # Example
/// ```
/// use peerlink::keypool::{Credential, KeyPool};
/// use peerlink::models::Provider;
///
/// let pool = KeyPool::default();
/// pool.insert(Provider::Groq, vec![Credential::key("k1"), Credential::key("k2")]);
///
/// assert_eq!(pool.acquire(Provider::Groq), Some(Credential::key("k1")));
/// assert_eq!(pool.acquire(Provider::Groq), Some(Credential::key("k2")));
/// assert_eq!(pool.acquire(Provider::Groq), Some(Credential::key("k1")));
/// assert_eq!(pool.acquire(Provider::Gemini), None);
/// ```
#[derive(Debug, Default)]
pub struct KeyPool {
    providers: Mutex<HashMap<Provider, ProviderKeys>>,
    policy: CooldownPolicy,
}

impl KeyPool {
    /// Create an empty pool with a cooldown policy
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Add credentials for a provider. Duplicates of existing entries are ignored.
    pub fn insert(&self, provider: Provider, credentials: Vec<Credential>) {
        let mut providers = self.lock();
        let keys = providers.entry(provider).or_default();
        for credential in credentials {
            if !keys.entries.iter().any(|e| e.credential == credential) {
                keys.entries.push(KeyEntry::new(credential));
            }
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, provider: Provider, credentials: Vec<Credential>) -> Self {
        self.insert(provider, credentials);
        self
    }

    /// Select the next eligible credential in round-robin order.
    ///
    /// Entries whose cooldown has elapsed are flipped back to `Active`
    /// first. Returns `None` when the provider has nothing eligible.
    pub fn acquire(&self, provider: Provider) -> Option<Credential> {
        let now = Instant::now();
        let mut providers = self.lock();
        let keys = providers.get_mut(&provider)?;

        for entry in &mut keys.entries {
            if entry.status == KeyStatus::Cooldown && entry.eligible_at(now) {
                entry.status = KeyStatus::Active;
                entry.cooldown_until = None;
                tracing::debug!(
                    provider = %provider,
                    key = %entry.credential.label(),
                    "credential healed"
                );
            }
        }

        let eligible: Vec<usize> = keys
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == KeyStatus::Active)
            .map(|(i, _)| i)
            .collect();

        if eligible.is_empty() {
            return None;
        }

        let index = eligible[keys.cursor % eligible.len()];
        keys.cursor = keys.cursor.wrapping_add(1);
        Some(keys.entries[index].credential.clone())
    }

    /// Record a failure against a credential and put it in cooldown.
    ///
    /// The cooldown length comes from classifying `error`. The managed
    /// sentinel never cools down; its failures are only counted.
    pub fn report_failure(
        &self,
        provider: Provider,
        credential: &Credential,
        error: &PeerlinkError,
    ) -> FailureClass {
        let class = FailureClass::classify(error);
        let now = Instant::now();
        let mut providers = self.lock();
        let Some(keys) = providers.get_mut(&provider) else {
            return class;
        };

        if credential.is_managed() {
            keys.managed_failures += 1;
            tracing::warn!(
                provider = %provider,
                class = class.name(),
                "managed backend failure: {}",
                error
            );
            return class;
        }

        if let Some(entry) = keys.entries.iter_mut().find(|e| &e.credential == credential) {
            let cooldown = self.policy.cooldown_for(class);
            entry.failure_count += 1;
            entry.status = KeyStatus::Cooldown;
            entry.cooldown_until = Some(now + cooldown);
            tracing::warn!(
                provider = %provider,
                key = %credential.label(),
                class = class.name(),
                failures = entry.failure_count,
                cooldown_secs = cooldown.as_secs(),
                "credential cooling down: {}",
                error
            );
        }

        class
    }

    /// Record a success. Health recovers purely through cooldown expiry,
    /// so there is nothing to update.
    pub fn report_success(&self, _provider: Provider, _credential: &Credential) {}

    /// Per-provider health, computed read-only against the current time.
    pub fn status_snapshot(&self) -> BTreeMap<Provider, ProviderStatus> {
        let now = Instant::now();
        let providers = self.lock();

        providers
            .iter()
            .map(|(provider, keys)| {
                let healthy = keys.entries.iter().any(|e| e.eligible_at(now));
                let minutes_until_available = if healthy {
                    0
                } else {
                    keys.entries
                        .iter()
                        .filter_map(|e| e.cooldown_until)
                        .map(|until| until.saturating_duration_since(now))
                        .min()
                        .map(minutes_rounded_up)
                        .unwrap_or(0)
                };

                let status = ProviderStatus {
                    healthy,
                    total: keys.entries.len(),
                    minutes_until_available,
                    managed: keys.entries.iter().any(|e| e.credential.is_managed()),
                    managed_failures: keys.managed_failures,
                };
                (*provider, status)
            })
            .collect()
    }

    /// Copy of the entry holding `credential`, for diagnostics and tests.
    pub fn entry(&self, provider: Provider, credential: &Credential) -> Option<KeyEntry> {
        self.lock()
            .get(&provider)?
            .entries
            .iter()
            .find(|e| &e.credential == credential)
            .cloned()
    }

    /// Providers with at least one configured credential
    pub fn providers(&self) -> Vec<Provider> {
        let providers = self.lock();
        let mut list: Vec<Provider> = providers
            .iter()
            .filter(|(_, keys)| !keys.entries.is_empty())
            .map(|(p, _)| *p)
            .collect();
        list.sort();
        list
    }

    /// Whether no provider has any credential
    pub fn is_empty(&self) -> bool {
        self.providers().is_empty()
    }

    /// The cooldown policy
    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Provider, ProviderKeys>> {
        // A poisoned lock still holds consistent data: every mutation above
        // completes without panicking points in between.
        self.providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn minutes_rounded_up(d: Duration) -> u64 {
    d.as_secs().div_ceil(60).max(u64::from(!d.is_zero()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> PeerlinkError {
        PeerlinkError::Upstream {
            provider: Provider::Groq,
            status: 429,
            message: "Too Many Requests".to_string(),
        }
    }

    fn pool_with_two_keys() -> KeyPool {
        KeyPool::default().with(
            Provider::Groq,
            vec![Credential::key("k1"), Credential::key("k2")],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_skips_key_until_cooldown_elapses() {
        let pool = pool_with_two_keys();
        let k1 = Credential::key("k1");
        let k2 = Credential::key("k2");

        pool.report_failure(Provider::Groq, &k1, &PeerlinkError::Network("reset".into()));
        let entry = pool.entry(Provider::Groq, &k1).unwrap();
        assert_eq!(entry.status, KeyStatus::Cooldown);
        assert_eq!(entry.failure_count, 1);

        assert_eq!(pool.acquire(Provider::Groq), Some(k2.clone()));
        assert_eq!(pool.acquire(Provider::Groq), Some(k2.clone()));

        let generic = pool.policy().generic;
        tokio::time::advance(generic - Duration::from_millis(1)).await;
        assert_eq!(pool.acquire(Provider::Groq), Some(k2.clone()));

        tokio::time::advance(Duration::from_millis(1)).await;
        let picks: Vec<_> = (0..2).filter_map(|_| pool.acquire(Provider::Groq)).collect();
        assert!(picks.contains(&k1));
        assert_eq!(pool.entry(Provider::Groq, &k1).unwrap().status, KeyStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_cooling_reports_unavailable() {
        let pool = pool_with_two_keys();
        pool.report_failure(Provider::Groq, &Credential::key("k1"), &rate_limited());
        pool.report_failure(Provider::Groq, &Credential::key("k2"), &rate_limited());
        assert_eq!(pool.acquire(Provider::Groq), None);

        let status = &pool.status_snapshot()[&Provider::Groq];
        assert!(!status.healthy);
        assert_eq!(status.total, 2);
        assert_eq!(status.minutes_until_available, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_does_not_heal() {
        let pool = pool_with_two_keys();
        let k1 = Credential::key("k1");
        pool.report_failure(Provider::Groq, &k1, &PeerlinkError::Network("x".into()));
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(pool.status_snapshot()[&Provider::Groq].healthy);
        assert_eq!(pool.entry(Provider::Groq, &k1).unwrap().status, KeyStatus::Cooldown);
    }

    #[test]
    fn test_managed_sentinel_never_cools_down() {
        let pool = KeyPool::default().with(Provider::Gemini, vec![Credential::Managed]);
        let class = pool.report_failure(Provider::Gemini, &Credential::Managed, &rate_limited());
        assert_eq!(class, FailureClass::RateLimit);

        assert_eq!(pool.acquire(Provider::Gemini), Some(Credential::Managed));
        let status = &pool.status_snapshot()[&Provider::Gemini];
        assert!(status.healthy && status.managed);
        assert_eq!(status.managed_failures, 1);
    }

    #[test]
    fn test_insert_ignores_duplicates() {
        let pool = pool_with_two_keys();
        pool.insert(Provider::Groq, vec![Credential::key("k2"), Credential::key("k3")]);
        assert_eq!(pool.status_snapshot()[&Provider::Groq].total, 3);
        assert_eq!(pool.providers(), vec![Provider::Groq]);
    }

    #[test]
    fn test_minutes_rounding() {
        assert_eq!(minutes_rounded_up(Duration::ZERO), 0);
        assert_eq!(minutes_rounded_up(Duration::from_millis(10)), 1);
        assert_eq!(minutes_rounded_up(Duration::from_secs(61)), 2);
    }
}
