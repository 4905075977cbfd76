//! Failure classification and cooldown grading.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PeerlinkError;

lazy_static! {
    /// Rate-limit / quota wording used across providers
    static ref RATE_LIMIT_PATTERN: Option<Regex> = Regex::new(
        r"(?i)rate[\s_-]?limit|quota|resource[\s_-]?exhausted|too many requests|\b429\b"
    )
    .ok();
    /// Overload / server-side failure wording
    static ref SERVER_ERROR_PATTERN: Option<Regex> = Regex::new(
        r"(?i)overload|unavailable|internal server error|bad gateway|gateway timeout|server error|\b50[0-4]\b"
    )
    .ok();
}

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Grade of an upstream failure; decides how long a key sits out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Anything not recognised below
    Generic,
    /// Overloaded or erroring server
    ServerError,
    /// Rate limit or exhausted quota
    RateLimit,
}

impl FailureClass {
    /// Classify from an HTTP status (if any) and error text.
    ///
    /// Status codes win over text; text is matched against rate-limit
    /// patterns before server-error patterns.
    pub fn from_parts(status: Option<u16>, text: &str) -> Self {
        match status {
            Some(429) => return FailureClass::RateLimit,
            Some(s) if (500..600).contains(&s) => {
                // Some providers wrap quota errors in a 5xx
                if matches(&RATE_LIMIT_PATTERN, text) {
                    return FailureClass::RateLimit;
                }
                return FailureClass::ServerError;
            },
            _ => {},
        }

        if matches(&RATE_LIMIT_PATTERN, text) {
            FailureClass::RateLimit
        } else if matches(&SERVER_ERROR_PATTERN, text) {
            FailureClass::ServerError
        } else {
            FailureClass::Generic
        }
    }

    /// Classify a crate error.
    pub fn classify(error: &PeerlinkError) -> Self {
        Self::from_parts(error.status(), &error.to_string())
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            FailureClass::Generic => "generic",
            FailureClass::ServerError => "server_error",
            FailureClass::RateLimit => "rate_limit",
        }
    }
}

/// Cooldown durations per failure grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Cooldown after a rate-limit/quota failure
    pub rate_limit: Duration,
    /// Cooldown after an overload/server failure
    pub server_error: Duration,
    /// Cooldown after any other failure
    pub generic: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(300),
            server_error: Duration::from_secs(60),
            generic: Duration::from_secs(15),
        }
    }
}

impl CooldownPolicy {
    /// Cooldown for a failure grade
    pub fn cooldown_for(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::RateLimit => self.rate_limit,
            FailureClass::ServerError => self.server_error,
            FailureClass::Generic => self.generic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    #[test]
    fn test_status_codes() {
        assert_eq!(FailureClass::from_parts(Some(429), ""), FailureClass::RateLimit);
        assert_eq!(FailureClass::from_parts(Some(503), ""), FailureClass::ServerError);
        assert_eq!(FailureClass::from_parts(Some(400), "bad request"), FailureClass::Generic);
    }

    #[test]
    fn test_text_patterns() {
        assert_eq!(
            FailureClass::from_parts(None, "RESOURCE_EXHAUSTED: quota exceeded"),
            FailureClass::RateLimit
        );
        assert_eq!(
            FailureClass::from_parts(None, "The model is overloaded"),
            FailureClass::ServerError
        );
        assert_eq!(
            FailureClass::from_parts(None, "connection reset by peer"),
            FailureClass::Generic
        );
        assert_eq!(
            FailureClass::from_parts(Some(500), "Rate limit reached for requests"),
            FailureClass::RateLimit
        );
    }

    #[test]
    fn test_classify_error() {
        let err = PeerlinkError::Upstream {
            provider: Provider::Groq,
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(FailureClass::classify(&err), FailureClass::RateLimit);
        assert_eq!(
            FailureClass::classify(&PeerlinkError::Network("dns".to_string())),
            FailureClass::Generic
        );
    }

    #[test]
    fn test_cooldown_ordering() {
        let policy = CooldownPolicy::default();
        assert!(
            policy.cooldown_for(FailureClass::RateLimit)
                > policy.cooldown_for(FailureClass::ServerError)
        );
        assert!(
            policy.cooldown_for(FailureClass::ServerError)
                > policy.cooldown_for(FailureClass::Generic)
        );
    }
}
