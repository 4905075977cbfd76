//! Peer transport contract.
//!
//! The supervisor does not implement a transport; it drives one through
//! [`PeerNetwork`] and reacts to the [`TransportEvent`]s the transport
//! pushes into its [`EventSink`]. Payloads are decoded into closed enums at
//! this boundary so the supervisor never inspects untyped data.

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use super::identity::Identity;

lazy_static! {
    static ref IDENTITY_TAKEN_PATTERN: Option<Regex> =
        Regex::new(r"(?i)(unavailable[-_ ]id|is taken|already in use|id.*taken)").ok();
    static ref RATE_LIMIT_PATTERN: Option<Regex> = Regex::new(
        r"(?i)(rate[-_ ]?limit|too many|resource[-_ ]exhausted|throttl|\b429\b)"
    )
    .ok();
    static ref NETWORK_PATTERN: Option<Regex> = Regex::new(
        r"(?i)(network|socket|server[-_ ]error|disconnected|timed? ?out|unreachable)"
    )
    .ok();
}

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Classified transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The requested identity is registered by someone else
    IdentityTaken,
    /// The signaling service is throttling us
    RateLimited,
    /// Connectivity failure
    Network,
    /// Anything else
    Other,
}

impl TransportErrorKind {
    /// Classify a transport error from its type tag and message.
    pub fn classify(kind: &str, message: &str) -> Self {
        let text = format!("{kind} {message}");
        if matches(&IDENTITY_TAKEN_PATTERN, &text) {
            TransportErrorKind::IdentityTaken
        } else if matches(&RATE_LIMIT_PATTERN, &text) {
            TransportErrorKind::RateLimited
        } else if matches(&NETWORK_PATTERN, &text) {
            TransportErrorKind::Network
        } else {
            TransportErrorKind::Other
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            TransportErrorKind::IdentityTaken => "identity_taken",
            TransportErrorKind::RateLimited => "rate_limited",
            TransportErrorKind::Network => "network",
            TransportErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport error with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Classification
    pub kind: TransportErrorKind,
    /// Transport-supplied message
    pub message: String,
}

impl TransportError {
    /// Error of a known kind
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a raw `(type, message)` pair
    pub fn classify(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: TransportErrorKind::classify(kind, &message),
            message,
        }
    }
}

/// Application message exchanged over a peer connection.
///
/// Payloads are JSON objects with a `type` tag. Recognised handshake
/// types open a session; everything else is `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// `chat-request`
    ChatRequest(Value),
    /// `call-offer`
    CallOffer(Value),
    /// `key-exchange`
    KeyExchange(Value),
    /// Any other payload
    Other(Value),
}

impl PeerMessage {
    /// Decode a raw payload
    pub fn decode(payload: Value) -> Self {
        match payload.get("type").and_then(Value::as_str) {
            Some("chat-request") => PeerMessage::ChatRequest(payload),
            Some("call-offer") => PeerMessage::CallOffer(payload),
            Some("key-exchange") => PeerMessage::KeyExchange(payload),
            _ => PeerMessage::Other(payload),
        }
    }

    /// Whether this message completes an application-level handshake
    pub fn is_handshake(&self) -> bool {
        !matches!(self, PeerMessage::Other(_))
    }

    /// The raw payload
    pub fn payload(&self) -> &Value {
        match self {
            PeerMessage::ChatRequest(v)
            | PeerMessage::CallOffer(v)
            | PeerMessage::KeyExchange(v)
            | PeerMessage::Other(v) => v,
        }
    }
}

/// Transport-assigned connection id, unique per transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A point-to-point connection to a remote peer.
pub trait PeerConnection: Send + Sync {
    /// Connection id
    fn id(&self) -> ConnectionId;

    /// Remote identity
    fn peer(&self) -> &Identity;

    /// Queue a payload for the remote peer
    fn send(&self, payload: Value) -> Result<(), TransportError>;

    /// Close the connection
    fn close(&self);
}

/// Events on a single connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Payload received
    Data(PeerMessage),
    /// Connection closed
    Closed,
    /// Connection failed
    Error(TransportError),
}

/// Events a transport reports to its supervisor.
#[derive(Clone)]
pub enum TransportEvent {
    /// Registered with the signaling service under `address`
    Open {
        /// Effective address
        address: Identity,
    },
    /// A remote peer opened a connection to us
    IncomingConnection(Arc<dyn PeerConnection>),
    /// Activity on an incoming or outgoing connection
    Connection {
        /// Which connection
        id: ConnectionId,
        /// What happened
        event: ConnectionEvent,
    },
    /// Lost the signaling connection; the transport object is still usable
    Disconnected,
    /// The transport is gone for good
    Closed,
    /// A classified failure
    Error(TransportError),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Open { address } => f.debug_struct("Open").field("address", address).finish(),
            TransportEvent::IncomingConnection(conn) => f
                .debug_tuple("IncomingConnection")
                .field(&conn.id())
                .field(conn.peer())
                .finish(),
            TransportEvent::Connection { id, event } => f
                .debug_struct("Connection")
                .field("id", id)
                .field("event", event)
                .finish(),
            TransportEvent::Disconnected => f.write_str("Disconnected"),
            TransportEvent::Closed => f.write_str("Closed"),
            TransportEvent::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Where a transport pushes its events.
///
/// Each sink is stamped with the generation of the transport it was
/// handed to; the supervisor ignores events from older generations.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event. Returns `false` once the supervisor is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    /// Generation this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A live transport instance bound to one identity.
pub trait TransportHandle: Send {
    /// Cheap reconnect of the existing session
    fn reconnect(&mut self);

    /// Full teardown; no further events are expected
    fn destroy(&mut self);

    /// Lost the signaling connection but still reusable
    fn is_disconnected(&self) -> bool;

    /// Torn down
    fn is_destroyed(&self) -> bool;

    /// Open an outgoing connection to `remote`
    fn connect(&mut self, remote: &Identity) -> Result<Arc<dyn PeerConnection>, TransportError>;
}

/// Factory for transports: the peer-messaging capability.
pub trait PeerNetwork: Send + Sync {
    /// Create a transport bound to `identity` reporting into `events`.
    ///
    /// Registration completes asynchronously with [`TransportEvent::Open`]
    /// or [`TransportEvent::Error`]. An immediate failure may be returned
    /// directly and is handled like an error event.
    fn open(
        &self,
        identity: &Identity,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}
