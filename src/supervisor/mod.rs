//! Peer connection supervision.
//!
//! [`ConnectionSupervisor`] owns one identity's signaling transport and
//! keeps it alive without the caller managing retries:
//!
//! | Trigger | Reaction |
//! |---------|----------|
//! | identity already in use | reopen at once with a derived identity (once) |
//! | rate limited | `RateLimited`, budget raised to a floor, long fixed wait |
//! | other error / closed | `Error` / `Disconnected`, one backoff retry |
//! | disconnected | watchdog issues a cheap `reconnect()` |
//! | network online, foreground | reconnect a live transport, rebuild a missing one |
//!
//! Failures never surface as errors; callers observe state transitions
//! through [`SupervisorStatus`].
//!
//! The transport itself is abstract: implement [`PeerNetwork`],
//! [`TransportHandle`] and [`PeerConnection`] over the real substrate.

mod backoff;
mod identity;
mod incoming;
mod state;
#[allow(clippy::module_inception)]
mod supervisor;
mod transport;

pub use backoff::Backoff;
pub use identity::Identity;
pub use incoming::{AcceptedSession, IncomingPhase, IncomingSessionRequest};
pub use state::{ConnectionState, SupervisorStatus};
pub use supervisor::{ConnectionSupervisor, OutboundConnection};
pub use transport::{
    ConnectionEvent, ConnectionId, EventSink, PeerConnection, PeerMessage, PeerNetwork,
    TransportError, TransportErrorKind, TransportEvent, TransportHandle,
};
