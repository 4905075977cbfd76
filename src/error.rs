//! Peerlink error types.
//!
//! # Error Classification
//!
//! Errors fall into three groups that are handled very differently:
//!
//! - **Transport errors** never reach callers of the connection supervisor;
//!   they are classified ([`TransportErrorKind`](crate::supervisor::TransportErrorKind)) and remediated internally.
//! - **Upstream errors** from a single provider are classified into a
//!   cooldown grade by the key pool and cause failover or are outcompeted.
//! - **Configuration and I/O errors** are ordinary failures surfaced to the
//!   caller.
//!
//! The `Upstream` variant keeps the HTTP status so the key pool can grade
//! the failure without re-parsing text.

use thiserror::Error;

use crate::models::Provider;
use crate::supervisor::TransportError;

/// Peerlink errors.
#[derive(Error, Debug)]
pub enum PeerlinkError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Network communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream provider answered with a non-success status.
    #[error("Upstream error from {provider} ({status}): {message}")]
    Upstream {
        /// Provider that produced the error.
        provider: Provider,
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// No eligible credential for a provider.
    #[error("No credential available for {0}")]
    NoCredential(Provider),

    /// No engine is registered for the provider.
    #[error("No engine registered for {0}")]
    NoEngine(Provider),

    /// Upstream stream could not be decoded.
    #[error("Stream decode error: {0}")]
    Decode(String),

    /// Upstream produced no output before the stream ended.
    #[error("Empty response from {0}")]
    EmptyResponse(Provider),

    /// Operation was cancelled by its owner.
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Peer transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation requires a live transport.
    #[error("Transport not ready")]
    NotReady,

    /// The supervisor task has stopped.
    #[error("Supervisor stopped")]
    SupervisorGone,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Peerlink operations
pub type Result<T> = std::result::Result<T, PeerlinkError>;

impl PeerlinkError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PeerlinkError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error came from the caller's own cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PeerlinkError::Cancelled)
    }
}

impl From<reqwest::Error> for PeerlinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PeerlinkError::Timeout(err.to_string())
        } else {
            PeerlinkError::Network(err.to_string())
        }
    }
}

impl From<toml::de::Error> for PeerlinkError {
    fn from(err: toml::de::Error) -> Self {
        PeerlinkError::Config(err.to_string())
    }
}
