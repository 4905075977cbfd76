//! Peer identities.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Stable address a transport endpoint is reached at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fallback used when this identity is already registered elsewhere:
    /// the original followed by a random four-digit suffix.
    pub fn derive_fallback(&self) -> Identity {
        let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
        Identity(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Identity::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Identity(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_keeps_prefix() {
        let id = Identity::new("alice");
        let fallback = id.derive_fallback();
        assert_ne!(fallback, id);
        let suffix = fallback.as_str().strip_prefix("alice").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
