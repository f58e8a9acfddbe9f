//! The connection manager: one logical transport per participant.
//!
//! # Lifecycle
//!
//! ```text
//!                    connect()/send()
//!   Unconnected ─────────────────────→ Connecting ──(open)──→ Open
//!        ↑                                │                    │
//!        │                          (error before open)   (close/error)
//!        │                                ↓                    ↓
//!        └────────(disconnect)─────────  Closed  ←─────────────┘
//!                                         │  ↑
//!                       (reconnect policy)↓  │(attempts exhausted)
//!                                      Reconnecting
//! ```
//!
//! Every caller that asks for a connection while a handshake is in flight
//! awaits that same handshake: concurrent `connect()` calls never open a
//! second transport. The handshake is a [`Shared`] future stored in the
//! connection slot and cleared when it settles.
//!
//! Each successful handshake gets a generation number. The reader task
//! and the handshake only touch the slot if it still holds their own
//! generation, so a connection torn down by `disconnect()` can never
//! clobber the state of the one that replaced it. State changes are
//! published while the slot lock is held, so the published state always
//! matches the slot.
//!
//! # Inbound path
//!
//! A reader task per open transport receives frames, decodes them with
//! the [`JsonCodec`] and hands each message to the [`Dispatcher`]
//! synchronously, so listeners observe messages in arrival order.
//! Undecodable frames are logged at `debug` and dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use rally_protocol::{Codec, JsonCodec, Message, ParticipantId};
use rally_transport::{Connection, Connector, TransportError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::{Dispatcher, ReconnectPolicy, SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Observable state of the participant's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected, or disconnected on request.
    Unconnected,
    /// A handshake is in flight.
    Connecting,
    /// The transport is open; sends go straight out.
    Open,
    /// The transport closed or failed without the caller asking.
    Closed,
    /// Waiting out a backoff delay before the next automatic attempt.
    Reconnecting,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
        })
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

type Handshake = Shared<BoxFuture<'static, Result<(), Arc<TransportError>>>>;

enum Slot<T> {
    Idle,
    Connecting {
        generation: u64,
        handshake: Handshake,
        cancel: oneshot::Sender<()>,
    },
    Open {
        generation: u64,
        conn: Arc<T>,
        stop: oneshot::Sender<()>,
    },
}

impl<T> Slot<T> {
    fn generation(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Connecting { generation, .. } | Self::Open { generation, .. } => {
                Some(*generation)
            }
        }
    }
}

struct Inner<C: Connector> {
    connector: C,
    participant: ParticipantId,
    endpoint: String,
    reconnect: Option<ReconnectPolicy>,
    codec: JsonCodec,
    dispatcher: Dispatcher,
    slot: Mutex<Slot<C::Connection>>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    /// Set by `connect()`, cleared by `disconnect()`. Automatic reconnects
    /// stop as soon as this goes false.
    wanted: AtomicBool,
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Owns the single logical connection between one participant and the
/// authoritative peer.
///
/// Cloning is cheap; clones share the connection.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("participant", &self.inner.participant)
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager for a freshly generated participant identity.
    /// Nothing is dialed until the first `connect()` or `send()`.
    pub fn new(connector: C, config: &SessionConfig) -> Self {
        Self::with_participant(connector, ParticipantId::generate(), config)
    }

    /// Creates a manager for an existing participant identity.
    pub fn with_participant(
        connector: C,
        participant: ParticipantId,
        config: &SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unconnected);
        let endpoint = config.endpoint(&participant);
        Self {
            inner: Arc::new(Inner {
                connector,
                participant,
                endpoint,
                reconnect: config.reconnect.clone().map(ReconnectPolicy::validated),
                codec: JsonCodec,
                dispatcher: Dispatcher::new(),
                slot: Mutex::new(Slot::Idle),
                state,
                generation: AtomicU64::new(0),
                wanted: AtomicBool::new(false),
            }),
        }
    }

    /// This participant's identity.
    pub fn participant_id(&self) -> &ParticipantId {
        &self.inner.participant
    }

    /// The URL this manager dials.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// The dispatcher inbound messages are delivered to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Ensures the transport is open.
    ///
    /// Resolves immediately if already open. If a handshake is in flight,
    /// awaits that handshake instead of starting another.
    ///
    /// # Errors
    /// `SessionError::TransportUnavailable` if the transport failed before
    /// opening, or the handshake was cancelled by `disconnect()`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.inner.wanted.store(true, Ordering::Release);
        match self.inner.begin_connect() {
            None => Ok(()),
            Some(handshake) => handshake.await.map_err(SessionError::TransportUnavailable),
        }
    }

    /// Encodes `message` and writes it to the transport, connecting first
    /// if needed.
    ///
    /// # Errors
    /// - `SessionError::Protocol` if the message cannot be encoded.
    /// - `SessionError::NotConnected` if no open transport could be had.
    /// - `SessionError::SendFailed` if the open transport rejected the write.
    pub async fn send(&self, message: &Message) -> Result<(), SessionError> {
        let frame = self.inner.codec.encode(message)?;

        if let Err(error) = self.connect().await {
            warn!(
                participant = %self.inner.participant,
                kind = %message.kind(),
                %error,
                "send could not open a connection"
            );
            return Err(SessionError::NotConnected);
        }

        let Some((generation, conn)) = self.inner.open_connection() else {
            return Err(SessionError::NotConnected);
        };

        match conn.send(&frame).await {
            Ok(()) => {
                debug!(participant = %self.inner.participant, kind = %message.kind(), "frame sent");
                Ok(())
            }
            // The transport went away under us.
            Err(_) if !self.inner.is_current(generation) => Err(SessionError::NotConnected),
            Err(error) => Err(SessionError::SendFailed(error)),
        }
    }

    /// Closes the transport if open, cancels a pending handshake, and
    /// resets the state to `Unconnected`. A no-op when already
    /// disconnected.
    pub async fn disconnect(&self) {
        self.inner.wanted.store(false, Ordering::Release);
        let previous = {
            let mut slot = self.inner.lock_slot();
            self.inner.publish(ConnectionState::Unconnected);
            std::mem::replace(&mut *slot, Slot::Idle)
        };

        match previous {
            Slot::Idle => {}
            Slot::Connecting { cancel, .. } => {
                let _ = cancel.send(());
                info!(participant = %self.inner.participant, "handshake cancelled");
            }
            Slot::Open { conn, stop, .. } => {
                let _ = stop.send(());
                if let Err(error) = conn.close().await {
                    debug!(conn = %conn.id(), %error, "close failed");
                }
                info!(participant = %self.inner.participant, conn = %conn.id(), "connection closed on request");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl<C: Connector> Inner<C> {
    // Slot transitions never panic while the lock is held.
    fn lock_slot(&self) -> MutexGuard<'_, Slot<C::Connection>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callers hold the slot lock.
    fn publish(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(participant = %self.participant, from = %state, to = %next, "connection state");
            *state = next;
            true
        });
    }

    /// Returns the handshake to await, or `None` if the transport is
    /// already open.
    fn begin_connect(self: &Arc<Self>) -> Option<Handshake> {
        let mut slot = self.lock_slot();
        match *slot {
            Slot::Open { .. } => None,
            Slot::Connecting { ref handshake, .. } => Some(handshake.clone()),
            Slot::Idle => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let (cancel, cancelled) = oneshot::channel();
                let handshake = Arc::clone(self).open(generation, cancelled).boxed().shared();
                *slot = Slot::Connecting {
                    generation,
                    handshake: handshake.clone(),
                    cancel,
                };
                // Another caller may drive the handshake to `Open` as soon
                // as the lock is released.
                self.publish(ConnectionState::Connecting);
                Some(handshake)
            }
        }
    }

    async fn open(
        self: Arc<Self>,
        generation: u64,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<(), Arc<TransportError>> {
        info!(participant = %self.participant, endpoint = %self.endpoint, "opening connection");

        let result = tokio::select! {
            result = self.connector.connect(&self.endpoint) => result,
            _ = cancelled => Err(TransportError::ConnectionClosed(
                "handshake cancelled by disconnect".into(),
            )),
        };

        let conn = match result {
            Ok(conn) => Arc::new(conn),
            Err(error) => {
                warn!(participant = %self.participant, %error, "connection failed");
                self.clear(generation);
                return Err(Arc::new(error));
            }
        };

        let (stop, stopped) = oneshot::channel();
        if !self.install(generation, &conn, stop) {
            let _ = conn.close().await;
            return Err(Arc::new(TransportError::ConnectionClosed(
                "handshake superseded by disconnect".into(),
            )));
        }

        info!(participant = %self.participant, conn = %conn.id(), "connection open");
        tokio::spawn(Arc::clone(&self).read_loop(generation, conn, stopped));
        Ok(())
    }

    /// Moves the slot from `Connecting` to `Open` if it still belongs to
    /// `generation`, and publishes `Open`.
    fn install(
        &self,
        generation: u64,
        conn: &Arc<C::Connection>,
        stop: oneshot::Sender<()>,
    ) -> bool {
        let mut slot = self.lock_slot();
        match *slot {
            Slot::Connecting { generation: current, .. } if current == generation => {
                *slot = Slot::Open {
                    generation,
                    conn: Arc::clone(conn),
                    stop,
                };
                self.publish(ConnectionState::Open);
                true
            }
            _ => false,
        }
    }

    /// Resets the slot to `Idle` and publishes `Closed` if it still
    /// belongs to `generation`.
    fn clear(&self, generation: u64) -> bool {
        let mut slot = self.lock_slot();
        if slot.generation() == Some(generation) {
            *slot = Slot::Idle;
            self.publish(ConnectionState::Closed);
            true
        } else {
            false
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_slot().generation() == Some(generation)
    }

    fn open_connection(&self) -> Option<(u64, Arc<C::Connection>)> {
        match *self.lock_slot() {
            Slot::Open {
                generation,
                ref conn,
                ..
            } => Some((generation, Arc::clone(conn))),
            _ => None,
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        conn: Arc<C::Connection>,
        mut stopped: oneshot::Receiver<()>,
    ) {
        let failure = loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    trace!(conn = %conn.id(), "reader stopped");
                    return;
                }
                received = conn.recv() => match received {
                    Ok(Some(frame)) => self.handle_frame(&frame),
                    Ok(None) => break None,
                    Err(error) => break Some(error),
                },
            }
        };

        // disconnect() already took this connection out of the slot.
        if !self.clear(generation) {
            return;
        }
        match failure {
            None => info!(participant = %self.participant, conn = %conn.id(), "connection closed by peer"),
            Some(error) => warn!(participant = %self.participant, conn = %conn.id(), %error, "connection failed"),
        }

        if let Some(policy) = self.reconnect.clone() {
            if self.wanted.load(Ordering::Acquire) {
                self.reconnect(policy).await;
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        match self.codec.decode(frame) {
            Ok(message) => {
                trace!(participant = %self.participant, kind = %message.kind(), "frame received");
                self.dispatcher.deliver(&message);
            }
            Err(error) => {
                debug!(participant = %self.participant, %error, frame, "discarding undecodable frame");
            }
        }
    }

    async fn reconnect(self: &Arc<Self>, policy: ReconnectPolicy) {
        for attempt in 0..policy.max_attempts {
            // A caller's own connect() or disconnect() took over.
            if !self.publish_if_idle(ConnectionState::Reconnecting) {
                return;
            }
            let delay = policy.delay_for(attempt);
            info!(participant = %self.participant, attempt = attempt + 1, ?delay, "reconnecting");
            tokio::time::sleep(delay).await;

            if !self.wanted.load(Ordering::Acquire) {
                return;
            }
            // Someone else already brought the connection back.
            let Some(handshake) = self.begin_connect() else {
                return;
            };
            match handshake.await {
                Ok(()) => return,
                Err(error) => {
                    warn!(participant = %self.participant, attempt = attempt + 1, %error, "reconnect attempt failed");
                }
            }
        }

        warn!(participant = %self.participant, attempts = policy.max_attempts, "giving up on reconnect");
        self.publish_if_idle(ConnectionState::Closed);
    }

    /// Publishes `next` only while the slot is empty and a connection is
    /// still wanted.
    fn publish_if_idle(&self, next: ConnectionState) -> bool {
        let slot = self.lock_slot();
        if matches!(*slot, Slot::Idle) && self.wanted.load(Ordering::Acquire) {
            self.publish(next);
            true
        } else {
            false
        }
    }
}
