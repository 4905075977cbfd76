//! Credentials and credential-list parsing.

use std::fmt;

/// An upstream API key.
///
/// `Debug` and `Display` redact everything but a short prefix so keys
/// can appear in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted form used in logs.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{}…", prefix)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.redacted())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// What the key pool hands out for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// A locally configured API key; the request goes straight to the provider.
    Key(ApiKey),
    /// Server-brokered access; the request goes through the managed backend.
    Managed,
}

impl Credential {
    /// Convenience constructor for a direct key
    pub fn key(key: impl Into<String>) -> Self {
        Credential::Key(ApiKey::new(key))
    }

    /// Whether this is the managed sentinel
    pub fn is_managed(&self) -> bool {
        matches!(self, Credential::Managed)
    }

    /// Redacted label for logs
    pub fn label(&self) -> String {
        match self {
            Credential::Key(key) => key.redacted(),
            Credential::Managed => "managed".to_string(),
        }
    }
}

/// Split a delimited credential list.
///
/// Accepts commas, semicolons and newlines as separators, trims entries,
/// drops empties and removes duplicates while keeping first-seen order.
///
/// # Example
/// ```
/// use peerlink::keypool::parse_credential_list;
///
/// let keys = parse_credential_list("k1, k2;\nk3,,k1");
/// assert_eq!(keys, vec!["k1", "k2", "k3"]);
/// ```
pub fn parse_credential_list(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for part in raw.split([',', ';', '\n', '\r']) {
        let part = part.trim();
        if !part.is_empty() && !keys.iter().any(|k| k == part) {
            keys.push(part.to_string());
        }
    }
    keys
}
