//! Retry delay computation.

use std::time::Duration;

use crate::config::SupervisorConfig;

/// Exponential backoff with a rate-limit override.
///
/// `delay(budget) = min(max, base * factor^budget)`. A rate-limited failure
/// waits at least `rate_limit_cooldown` whatever the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay at budget 0
    pub base: Duration,
    /// Growth per retry; values below 1 are treated as 1
    pub factor: f64,
    /// Cap on [`delay`](Self::delay)
    pub max: Duration,
    /// Minimum wait after a rate-limit error
    pub rate_limit_cooldown: Duration,
    /// Retry budget forced after a rate-limit error
    pub rate_limit_floor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl Backoff {
    /// Build from the `[supervisor]` config section
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            factor: config.backoff_factor,
            max: Duration::from_millis(config.backoff_max_ms),
            rate_limit_cooldown: Duration::from_millis(config.rate_limit_cooldown_ms),
            rate_limit_floor: config.rate_limit_budget_floor,
        }
    }

    /// Delay before the retry scheduled at `budget`.
    pub fn delay(&self, budget: u32) -> Duration {
        let factor = if self.factor.is_finite() { self.factor.max(1.0) } else { 1.0 };
        let exponent = i32::try_from(budget).unwrap_or(i32::MAX);
        let millis = self.base.as_millis() as f64 * factor.powi(exponent);
        let cap = self.max.as_millis() as f64;

        if millis.is_nan() || millis >= cap {
            self.max
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Delay after a rate-limit error at `budget`.
    pub fn rate_limited_delay(&self, budget: u32) -> Duration {
        self.delay(budget).max(self.rate_limit_cooldown)
    }
}
