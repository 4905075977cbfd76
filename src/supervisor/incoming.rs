//! Admission of inbound connections.
//!
//! A connection that arrives before any application payload is held as
//! `Handshaking` and only becomes an actionable request once a recognised
//! handshake message arrives on it. There is a single slot; a newer
//! connection replaces whatever was there. Payloads that follow the
//! handshake are held until the request is accepted, then replayed on the
//! session's event channel.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::identity::Identity;
use super::transport::{ConnectionEvent, ConnectionId, PeerConnection, PeerMessage};

/// Handshake progress of an inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingPhase {
    /// Connected, no handshake seen yet
    Handshaking,
    /// Handshake received; the request is actionable
    Ready,
}

/// A not-yet-accepted inbound session.
#[derive(Clone)]
pub struct IncomingSessionRequest {
    /// The transport connection
    pub connection: Arc<dyn PeerConnection>,
    /// The handshake message, once received
    pub initial_payload: Option<PeerMessage>,
    /// Handshake progress
    pub phase: IncomingPhase,
}

impl IncomingSessionRequest {
    /// Fresh request in the `Handshaking` phase
    pub fn new(connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            connection,
            initial_payload: None,
            phase: IncomingPhase::Handshaking,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Remote identity
    pub fn peer(&self) -> &Identity {
        self.connection.peer()
    }

    /// Whether the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.phase == IncomingPhase::Ready
    }
}

impl PartialEq for IncomingSessionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
            && self.phase == other.phase
            && self.initial_payload == other.initial_payload
    }
}

impl fmt::Debug for IncomingSessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingSessionRequest")
            .field("id", &self.id())
            .field("peer", self.peer())
            .field("phase", &self.phase)
            .field("initial_payload", &self.initial_payload)
            .finish()
    }
}

/// An accepted inbound session and the events that arrive on it.
///
/// `events` first yields any payloads received between the handshake and
/// acceptance, then live traffic. It ends when the connection closes or
/// the transport is rebuilt.
pub struct AcceptedSession {
    /// The request as it stood when accepted
    pub request: IncomingSessionRequest,
    /// Data, close and error events for this connection
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl fmt::Debug for AcceptedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptedSession")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Single-slot holder for the pending inbound request.
#[derive(Debug, Default)]
pub(crate) struct IncomingSlot {
    pending: Option<IncomingSessionRequest>,
    /// Payloads received after the handshake, oldest first
    backlog: Vec<PeerMessage>,
}

impl IncomingSlot {
    /// A new inbound connection replaces the pending one, which is closed.
    pub(crate) fn offer(&mut self, connection: Arc<dyn PeerConnection>) {
        self.backlog.clear();
        if let Some(previous) = self.pending.replace(IncomingSessionRequest::new(connection)) {
            tracing::debug!(peer = %previous.peer(), "superseded by a newer incoming connection");
            previous.connection.close();
        }
    }

    /// Whether `id` is the pending connection
    pub(crate) fn holds(&self, id: ConnectionId) -> bool {
        self.pending.as_ref().is_some_and(|p| p.id() == id)
    }

    /// Apply an event on the pending connection. Returns `true` when the
    /// slot changed.
    pub(crate) fn on_event(&mut self, id: ConnectionId, event: ConnectionEvent) -> bool {
        let Some(pending) = self.pending.as_mut().filter(|p| p.id() == id) else {
            return false;
        };

        match event {
            ConnectionEvent::Data(message) => {
                if pending.is_ready() {
                    self.backlog.push(message);
                    return false;
                }
                if !message.is_handshake() {
                    return false;
                }
                tracing::info!(peer = %pending.peer(), "incoming session request ready");
                pending.phase = IncomingPhase::Ready;
                pending.initial_payload = Some(message);
                true
            },
            ConnectionEvent::Closed | ConnectionEvent::Error(_) => {
                if !pending.is_ready() {
                    tracing::debug!(peer = %pending.peer(), "connection dropped before handshake");
                }
                self.pending = None;
                self.backlog.clear();
                true
            },
        }
    }

    /// The pending request, if its handshake completed
    pub(crate) fn ready(&self) -> Option<&IncomingSessionRequest> {
        self.pending.as_ref().filter(|p| p.is_ready())
    }

    /// Hand over a ready request with its backlog and clear the slot
    pub(crate) fn take_ready(&mut self) -> Option<(IncomingSessionRequest, Vec<PeerMessage>)> {
        self.ready()?;
        let request = self.pending.take()?;
        Some((request, std::mem::take(&mut self.backlog)))
    }

    /// Close and forget whatever is pending
    pub(crate) fn dismiss(&mut self) -> bool {
        self.backlog.clear();
        match self.pending.take() {
            Some(pending) => {
                pending.connection.close();
                true
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::transport::TransportError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeConnection {
        id: ConnectionId,
        peer: Identity,
        closed: AtomicBool,
    }

    impl PeerConnection for FakeConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }
        fn peer(&self) -> &Identity {
            &self.peer
        }
        fn send(&self, _payload: Value) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn conn(id: u64) -> Arc<FakeConnection> {
        Arc::new(FakeConnection {
            id: ConnectionId(id),
            peer: Identity::new(format!("peer{id}")),
            closed: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_promoted_only_by_handshake() {
        let mut slot = IncomingSlot::default();
        slot.offer(conn(1));
        assert!(slot.ready().is_none());

        let ping = PeerMessage::decode(json!({"type": "ping"}));
        assert!(!slot.on_event(ConnectionId(1), ConnectionEvent::Data(ping)));
        assert!(slot.ready().is_none());

        let hello = PeerMessage::decode(json!({"type": "chat-request"}));
        assert!(slot.on_event(ConnectionId(1), ConnectionEvent::Data(hello.clone())));
        let (ready, backlog) = slot.take_ready().unwrap();
        assert_eq!(ready.initial_payload, Some(hello));
        assert!(backlog.is_empty());
        assert!(slot.take_ready().is_none());
    }

    #[test]
    fn test_post_handshake_payloads_held() {
        let mut slot = IncomingSlot::default();
        slot.offer(conn(3));
        let hello = PeerMessage::decode(json!({"type": "chat-request"}));
        let first = PeerMessage::decode(json!({"type": "message", "body": "hi"}));
        let second = PeerMessage::decode(json!({"type": "message", "body": "there"}));

        slot.on_event(ConnectionId(3), ConnectionEvent::Data(hello));
        assert!(!slot.on_event(ConnectionId(3), ConnectionEvent::Data(first.clone())));
        assert!(!slot.on_event(ConnectionId(3), ConnectionEvent::Data(second.clone())));

        let (_, backlog) = slot.take_ready().unwrap();
        assert_eq!(backlog, vec![first, second]);
    }

    #[test]
    fn test_dismiss_closes_pending() {
        let mut slot = IncomingSlot::default();
        let pending = conn(5);
        slot.offer(pending.clone());
        slot.on_event(ConnectionId(5), ConnectionEvent::Data(PeerMessage::decode(json!({"type": "call-offer"}))));

        assert!(slot.dismiss());
        assert!(pending.closed.load(Ordering::SeqCst));
        assert!(slot.ready().is_none());
        assert!(!slot.dismiss());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut slot = IncomingSlot::default();
        let first = conn(1);
        slot.offer(first.clone());
        slot.offer(conn(2));
        assert!(first.closed.load(Ordering::SeqCst));
        assert!(!slot.holds(ConnectionId(1)));
        assert!(slot.holds(ConnectionId(2)));
    }

    #[test]
    fn test_close_before_handshake_discards() {
        let mut slot = IncomingSlot::default();
        slot.offer(conn(7));
        assert!(slot.on_event(ConnectionId(7), ConnectionEvent::Closed));
        assert!(!slot.holds(ConnectionId(7)));
        assert!(!slot.on_event(ConnectionId(7), ConnectionEvent::Closed));
    }
}
