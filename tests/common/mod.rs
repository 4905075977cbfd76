//! Shared fixtures for the end-to-end tests.
//!
//! `ScriptedEngine` stands in for an upstream provider and
//! `ScriptedNetwork` for the peer signaling substrate. Both record what
//! they were asked to do so tests can assert on it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use peerlink::dispatch::Chunk;
use peerlink::keypool::Credential;
use peerlink::models::Provider;
use peerlink::supervisor::{
    ConnectionId, EventSink, Identity, PeerConnection, PeerNetwork, TransportError,
    TransportEvent, TransportHandle,
};
use peerlink::{Engine, EngineRequest, EngineStream, PeerlinkError, Result};
use serde_json::Value;

// ============================================================================
// Engines
// ============================================================================

/// What a scripted engine does when opened.
#[derive(Debug, Clone)]
pub enum Script {
    /// Fail before any output with an upstream status
    Fail(u16),
    /// Never produce anything
    Hang,
    /// Wait, then stream the given text chunks
    Respond(Duration, Vec<&'static str>),
    /// Wait, then fail with an upstream status
    FailAfter(Duration, u16),
    /// Stream the given chunks, then fail with an upstream status
    BreakAfter(Vec<&'static str>, u16),
    /// Connect at once, then wait before the first of the given chunks
    Stream(Duration, Vec<&'static str>),
}

/// Marks `flag` when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Engine following a fixed script.
pub struct ScriptedEngine {
    provider: Provider,
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<EngineRequest>>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new(provider: Provider, script: Script) -> Arc<Self> {
        Arc::new(Self {
            provider,
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Number of times `open` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in order
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether an in-flight `open` was dropped before it finished
    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    fn upstream(&self, status: u16) -> PeerlinkError {
        PeerlinkError::Upstream {
            provider: self.provider,
            status,
            message: format!("scripted {status}"),
        }
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(
        &self,
        request: &EngineRequest,
        _credential: &Credential,
    ) -> Result<EngineStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        match &self.script {
            Script::Fail(status) => Err(self.upstream(*status)),
            Script::Hang => {
                let _flag = DropFlag(Arc::clone(&self.dropped));
                futures::future::pending::<()>().await;
                unreachable!()
            },
            Script::Respond(delay, chunks) => {
                let flag = DropFlag(Arc::clone(&self.dropped));
                tokio::time::sleep(*delay).await;
                std::mem::forget(flag);
                let items: Vec<Result<Chunk>> = chunks.iter().map(|t| Ok(Chunk::text(*t))).collect();
                Ok(Box::pin(stream::iter(items)))
            },
            Script::FailAfter(delay, status) => {
                let flag = DropFlag(Arc::clone(&self.dropped));
                tokio::time::sleep(*delay).await;
                std::mem::forget(flag);
                Err(self.upstream(*status))
            },
            Script::BreakAfter(chunks, status) => {
                let mut items: Vec<Result<Chunk>> =
                    chunks.iter().map(|t| Ok(Chunk::text(*t))).collect();
                items.push(Err(self.upstream(*status)));
                Ok(Box::pin(stream::iter(items)))
            },
            Script::Stream(delay, chunks) => {
                let items: Vec<Result<Chunk>> = chunks.iter().map(|t| Ok(Chunk::text(*t))).collect();
                let quiet = stream::once(tokio::time::sleep(*delay))
                    .filter_map(|()| async { None::<Result<Chunk>> });
                Ok(Box::pin(quiet.chain(stream::iter(items))))
            },
        }
    }
}

/// Concatenated text of a set of chunks
pub fn text_of(chunks: &[Chunk]) -> String {
    chunks.iter().filter_map(|c| c.text.as_deref()).collect()
}

// ============================================================================
// Peer network
// ============================================================================

/// Connection that records whether it was closed.
pub struct TestConnection {
    id: ConnectionId,
    peer: Identity,
    closed: AtomicBool,
    sent: Mutex<Vec<Value>>,
}

impl TestConnection {
    pub fn new(id: u64, peer: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId(id),
            peer: Identity::new(peer),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

impl PeerConnection for TestConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &Identity {
        &self.peer
    }

    fn send(&self, payload: Value) -> std::result::Result<(), TransportError> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Shared state behind one scripted transport instance.
#[derive(Default)]
pub struct TransportProbe {
    pub disconnected: AtomicBool,
    pub destroyed: AtomicBool,
    pub reconnects: AtomicUsize,
}

struct TestTransport {
    probe: Arc<TransportProbe>,
    next_connection: Arc<AtomicU64>,
}

impl TransportHandle for TestTransport {
    fn reconnect(&mut self) {
        self.probe.reconnects.fetch_add(1, Ordering::SeqCst);
        self.probe.disconnected.store(false, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        self.probe.destroyed.store(true, Ordering::SeqCst);
    }

    fn is_disconnected(&self) -> bool {
        self.probe.disconnected.load(Ordering::SeqCst)
    }

    fn is_destroyed(&self) -> bool {
        self.probe.destroyed.load(Ordering::SeqCst)
    }

    fn connect(
        &mut self,
        remote: &Identity,
    ) -> std::result::Result<Arc<dyn PeerConnection>, TransportError> {
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection::new(id, remote.as_str()))
    }
}

/// One `open` call seen by the network.
pub struct Opened {
    pub identity: Identity,
    pub sink: EventSink,
    pub probe: Arc<TransportProbe>,
}

/// Peer network that hands out scripted transports and keeps their sinks.
#[derive(Default)]
pub struct ScriptedNetwork {
    opened: Mutex<Vec<Opened>>,
    fail_open: Mutex<Option<TransportError>>,
    next_connection: Arc<AtomicU64>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_connection: Arc::new(AtomicU64::new(1000)),
            ..Default::default()
        })
    }

    /// Make every following `open` fail synchronously with `error`
    pub fn fail_opens_with(&self, error: Option<TransportError>) {
        *self.fail_open.lock().unwrap() = error;
    }

    /// Number of `open` calls so far (including failed ones)
    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Identities passed to `open`, in order
    pub fn identities(&self) -> Vec<Identity> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.identity.clone())
            .collect()
    }

    /// Sink of the `n`th transport
    pub fn sink(&self, n: usize) -> EventSink {
        self.opened.lock().unwrap()[n].sink.clone()
    }

    /// Probe of the `n`th transport
    pub fn probe(&self, n: usize) -> Arc<TransportProbe> {
        Arc::clone(&self.opened.lock().unwrap()[n].probe)
    }

    /// Emit through the most recent transport's sink
    pub fn emit(&self, event: TransportEvent) -> bool {
        let opened = self.opened.lock().unwrap();
        opened.last().expect("no transport opened").sink.emit(event)
    }
}

impl PeerNetwork for ScriptedNetwork {
    fn open(
        &self,
        identity: &Identity,
        events: EventSink,
    ) -> std::result::Result<Box<dyn TransportHandle>, TransportError> {
        let probe = Arc::new(TransportProbe::default());
        self.opened.lock().unwrap().push(Opened {
            identity: identity.clone(),
            sink: events,
            probe: Arc::clone(&probe),
        });

        if let Some(error) = self.fail_open.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Box::new(TestTransport {
            probe,
            next_connection: Arc::clone(&self.next_connection),
        }))
    }
}
