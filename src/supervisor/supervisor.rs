//! The connection supervisor actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{PeerlinkError, Result};

use super::backoff::Backoff;
use super::identity::Identity;
use super::incoming::{AcceptedSession, IncomingSlot};
use super::state::{ConnectionState, SupervisorStatus};
use super::transport::{
    ConnectionEvent, ConnectionId, EventSink, PeerConnection, PeerNetwork, TransportError,
    TransportErrorKind, TransportEvent, TransportHandle,
};

/// An outgoing connection and the events that arrive on it.
pub struct OutboundConnection {
    /// The connection
    pub connection: Arc<dyn PeerConnection>,
    /// Data, close and error events for this connection
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

enum Command {
    Start(Identity),
    Stop,
    ForceReconnect,
    NetworkOnline,
    Foreground,
    TakeIncoming(oneshot::Sender<Option<AcceptedSession>>),
    DismissIncoming,
    Connect {
        remote: Identity,
        reply: oneshot::Sender<Result<OutboundConnection>>,
    },
}

/// Keeps one transport bound to an identity alive.
///
/// The supervisor runs as a single task that owns all connection state.
/// Commands from this handle, transport events and timers are handled one
/// at a time, and every change is published as a [`SupervisorStatus`].
/// Dropping the handle closes the command channel, which stops the task
/// and destroys the transport.
///
/// # Example
///
/// ```rust,ignore
/// let supervisor = ConnectionSupervisor::spawn(network, &config.supervisor);
/// supervisor.start("alice")?;
///
/// let mut status = supervisor.subscribe();
/// while status.changed().await.is_ok() {
///     println!("{}", status.borrow().state);
/// }
/// ```
pub struct ConnectionSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SupervisorStatus>,
    task: JoinHandle<()>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor task on the current runtime.
    pub fn spawn(network: Arc<dyn PeerNetwork>, config: &SupervisorConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SupervisorStatus::default());

        let actor = Actor {
            network,
            backoff: Backoff::from_config(config),
            watchdog_interval: config.watchdog_interval(),
            events_tx,
            status_tx,
            transport: None,
            generation: 0,
            state: ConnectionState::Init,
            original: None,
            current: None,
            address: None,
            retry_budget: 0,
            retry_at: None,
            collision_remediated: false,
            incoming: IncomingSlot::default(),
            sessions: HashMap::new(),
        };
        let task = tokio::spawn(actor.run(command_rx, events_rx));

        Self {
            commands,
            status,
            task,
        }
    }

    /// Connect under `identity`. No-op while already connecting or ready.
    pub fn start(&self, identity: impl Into<Identity>) -> Result<()> {
        self.send(Command::Start(identity.into()))
    }

    /// Tear everything down and go idle. Safe to call repeatedly.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Reset the retry budget and rebuild with the original identity.
    pub fn force_reconnect(&self) -> Result<()> {
        self.send(Command::ForceReconnect)
    }

    /// The host regained network connectivity
    pub fn network_online(&self) -> Result<()> {
        self.send(Command::NetworkOnline)
    }

    /// The application returned to the foreground
    pub fn foreground(&self) -> Result<()> {
        self.send(Command::Foreground)
    }

    /// Current status
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Accept the incoming request if its handshake has completed.
    ///
    /// The returned session carries the connection's event stream, starting
    /// with anything that arrived after the handshake.
    pub async fn take_incoming(&self) -> Result<Option<AcceptedSession>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TakeIncoming(reply))?;
        rx.await.map_err(|_| PeerlinkError::SupervisorGone)
    }

    /// Close and forget the pending incoming connection
    pub fn dismiss_incoming(&self) -> Result<()> {
        self.send(Command::DismissIncoming)
    }

    /// Open an outgoing connection on the live transport.
    pub async fn connect(&self, remote: impl Into<Identity>) -> Result<OutboundConnection> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            remote: remote.into(),
            reply,
        })?;
        rx.await.map_err(|_| PeerlinkError::SupervisorGone)?
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!("supervisor task ended abnormally: {}", e);
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PeerlinkError::SupervisorGone)
    }
}

struct Actor {
    network: Arc<dyn PeerNetwork>,
    backoff: Backoff,
    watchdog_interval: Duration,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    status_tx: watch::Sender<SupervisorStatus>,

    transport: Option<Box<dyn TransportHandle>>,
    generation: u64,
    state: ConnectionState,
    /// Identity requested by the caller
    original: Option<Identity>,
    /// Identity of the latest attempt (the fallback after a collision)
    current: Option<Identity>,
    /// Address confirmed by the transport
    address: Option<Identity>,
    retry_budget: u32,
    retry_at: Option<Instant>,
    collision_remediated: bool,
    incoming: IncomingSlot,
    /// Event routes for accepted incoming and opened outgoing connections
    sessions: HashMap<ConnectionId, mpsc::UnboundedSender<ConnectionEvent>>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        let mut watchdog = tokio::time::interval(self.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some((generation, event)) = events.recv() => self.on_event(generation, event),
                () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry_timer();
                },
                _ = watchdog.tick() => self.on_watchdog(),
            }
            self.publish();
        }

        self.stop();
        self.publish();
        debug!("supervisor task finished");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(identity) => self.start(identity),
            Command::Stop => self.stop(),
            Command::ForceReconnect => self.force_reconnect(),
            Command::NetworkOnline => self.on_liveness("network online"),
            Command::Foreground => self.on_liveness("foreground"),
            Command::TakeIncoming(reply) => {
                let _ = reply.send(self.take_incoming());
            },
            Command::DismissIncoming => {
                self.incoming.dismiss();
            },
            Command::Connect { remote, reply } => {
                let _ = reply.send(self.connect(&remote));
            },
        }
    }

    fn start(&mut self, identity: Identity) {
        let live = self.transport.as_ref().is_some_and(|t| !t.is_destroyed());
        if live && matches!(self.state, ConnectionState::Connecting | ConnectionState::Ready) {
            debug!(identity = %identity, state = %self.state, "start ignored, already active");
            return;
        }
        self.original = Some(identity.clone());
        self.collision_remediated = false;
        self.open(identity);
    }

    fn stop(&mut self) {
        self.teardown();
        self.retry_at = None;
        self.original = None;
        self.current = None;
        self.address = None;
        self.retry_budget = 0;
        self.set_state(ConnectionState::Init);
    }

    fn force_reconnect(&mut self) {
        let Some(original) = self.original.clone() else {
            debug!("force reconnect ignored, not started");
            return;
        };
        info!(identity = %original, "forced reconnect");
        self.retry_budget = 0;
        self.collision_remediated = false;
        self.open(original);
    }

    /// Discard the current transport and open a new one bound to `identity`.
    fn open(&mut self, identity: Identity) {
        self.teardown();
        self.retry_at = None;
        self.current = Some(identity.clone());
        self.set_state(ConnectionState::Connecting);

        let sink = EventSink::new(self.generation, self.events_tx.clone());
        debug!(identity = %identity, generation = self.generation, "opening transport");
        match self.network.open(&identity, sink) {
            Ok(transport) => self.transport = Some(transport),
            Err(error) => self.on_error(error),
        }
    }

    /// Destroy the transport along with every connection that rode on it.
    /// Bumping the generation makes any event it still delivers inert.
    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
        }
        self.generation += 1;
        if self.incoming.dismiss() {
            debug!("pending incoming connection dropped with its transport");
        }
        self.sessions.clear();
    }

    fn on_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            debug!(generation, current = self.generation, ?event, "stale transport event dropped");
            return;
        }

        match event {
            TransportEvent::Open { address } => {
                info!(address = %address, "transport open");
                self.address = Some(address);
                self.retry_budget = 0;
                self.retry_at = None;
                self.collision_remediated = false;
                self.set_state(ConnectionState::Ready);
            },
            TransportEvent::IncomingConnection(connection) => {
                debug!(peer = %connection.peer(), id = %connection.id(), "incoming connection");
                self.incoming.offer(connection);
            },
            TransportEvent::Connection { id, event } => self.on_connection_event(id, event),
            TransportEvent::Disconnected => {
                warn!("transport disconnected");
                self.set_state(ConnectionState::Disconnected);
            },
            TransportEvent::Closed => {
                warn!("transport closed");
                self.teardown();
                self.address = None;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry(self.backoff.delay(self.retry_budget));
            },
            TransportEvent::Error(error) => self.on_error(error),
        }
    }

    fn on_connection_event(&mut self, id: ConnectionId, event: ConnectionEvent) {
        if self.incoming.holds(id) {
            self.incoming.on_event(id, event);
            return;
        }

        let closing = matches!(event, ConnectionEvent::Closed | ConnectionEvent::Error(_));
        match self.sessions.get(&id) {
            Some(tx) => {
                if tx.send(event).is_err() || closing {
                    self.sessions.remove(&id);
                }
            },
            None => debug!(%id, ?event, "event for unknown connection dropped"),
        }
    }

    fn take_incoming(&mut self) -> Option<AcceptedSession> {
        let (request, backlog) = self.incoming.take_ready()?;
        let (tx, events) = mpsc::unbounded_channel();
        for message in backlog {
            let _ = tx.send(ConnectionEvent::Data(message));
        }
        self.sessions.insert(request.id(), tx);
        info!(peer = %request.peer(), id = %request.id(), "incoming session accepted");
        Some(AcceptedSession { request, events })
    }

    fn on_error(&mut self, error: TransportError) {
        match error.kind {
            TransportErrorKind::IdentityTaken if !self.collision_remediated => {
                let Some(original) = self.original.clone() else {
                    return;
                };
                let fallback = original.derive_fallback();
                info!(identity = %original, fallback = %fallback, "identity taken, retrying with fallback");
                self.collision_remediated = true;
                self.open(fallback);
            },
            TransportErrorKind::RateLimited => {
                self.retry_budget = self.retry_budget.max(self.backoff.rate_limit_floor);
                let delay = self.backoff.rate_limited_delay(self.retry_budget);
                warn!(budget = self.retry_budget, delay_ms = delay.as_millis() as u64, "rate limited: {}", error);
                self.set_state(ConnectionState::RateLimited);
                self.schedule_retry(delay);
            },
            _ => {
                let delay = self.backoff.delay(self.retry_budget);
                warn!(
                    kind = %error.kind,
                    budget = self.retry_budget,
                    delay_ms = delay.as_millis() as u64,
                    "transport error: {}",
                    error.message
                );
                self.set_state(ConnectionState::Error);
                self.schedule_retry(delay);
            },
        }
    }

    /// Arm the retry timer. An armed timer is kept unless the new one
    /// fires later, so there is never more than one pending retry.
    fn schedule_retry(&mut self, delay: Duration) {
        if self.original.is_none() {
            return;
        }
        let at = Instant::now() + delay;
        self.retry_at = Some(self.retry_at.map_or(at, |pending| pending.max(at)));
    }

    fn on_retry_timer(&mut self) {
        self.retry_at = None;
        let Some(identity) = self.current.clone().or_else(|| self.original.clone()) else {
            return;
        };
        self.retry_budget = self.retry_budget.saturating_add(1);
        info!(identity = %identity, budget = self.retry_budget, "retrying connection");
        self.open(identity);
    }

    fn on_watchdog(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if transport.is_disconnected() && !transport.is_destroyed() {
                debug!("watchdog: reconnecting disconnected transport");
                transport.reconnect();
            }
        }
    }

    /// Network-online and foreground triggers: reconnect a live transport,
    /// rebuild a missing one.
    fn on_liveness(&mut self, trigger: &'static str) {
        if self.original.is_none() {
            return;
        }
        match self.transport.as_mut() {
            Some(transport) if !transport.is_destroyed() => {
                if transport.is_disconnected() {
                    debug!(trigger, "reconnecting transport");
                    transport.reconnect();
                }
            },
            _ => {
                let Some(identity) = self.current.clone().or_else(|| self.original.clone()) else {
                    return;
                };
                info!(trigger, identity = %identity, "rebuilding transport");
                self.open(identity);
            },
        }
    }

    fn connect(&mut self, remote: &Identity) -> Result<OutboundConnection> {
        if self.state != ConnectionState::Ready {
            return Err(PeerlinkError::NotReady);
        }
        let transport = self.transport.as_mut().ok_or(PeerlinkError::NotReady)?;
        let connection = transport.connect(remote)?;

        let (tx, events) = mpsc::unbounded_channel();
        self.sessions.insert(connection.id(), tx);
        debug!(remote = %remote, id = %connection.id(), "outgoing connection opened");
        Ok(OutboundConnection { connection, events })
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "connection state");
            self.state = state;
        }
    }

    fn publish(&self) {
        let status = SupervisorStatus {
            state: self.state,
            address: self.address.clone(),
            retry_budget: self.retry_budget,
            retry_pending: self.retry_at.is_some(),
            incoming: self.incoming.ready().cloned(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
