//! Connection state and the status published by the supervisor.

use std::fmt;

use serde::Serialize;

use super::identity::Identity;
use super::incoming::IncomingSessionRequest;

/// Lifecycle of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Idle: never started, or stopped
    #[default]
    Init,
    /// A transport is being opened
    Connecting,
    /// Registered and usable
    Ready,
    /// Signaling connection lost
    Disconnected,
    /// Failed; a retry is scheduled
    Error,
    /// Throttled by the signaling service; a long retry is scheduled
    RateLimited,
}

impl ConnectionState {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
            ConnectionState::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of everything the supervisor exposes upward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupervisorStatus {
    /// Current state
    pub state: ConnectionState,
    /// Effective address; differs from the requested identity after
    /// collision remediation
    pub address: Option<Identity>,
    /// Consecutive failed attempts since the last success
    pub retry_budget: u32,
    /// Whether a retry timer is armed
    pub retry_pending: bool,
    /// Incoming session request that completed its handshake
    pub incoming: Option<IncomingSessionRequest>,
}

impl SupervisorStatus {
    /// Whether the transport is ready for outgoing connections
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}
