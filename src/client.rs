//! Async client facade for the outpost live-events socket.
//!
//! [`OutpostClient`] is a cheaply cloneable handle. The application builds
//! one at its composition root and passes it to whoever needs the socket.
//! Events are emitted on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<LiveEvent>`]) returned from
//! [`OutpostClient::new`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = LiveClientConfig::new("wss://live.example/ws", "0xA1");
//! let (client, mut events) = OutpostClient::new(
//!     config,
//!     Arc::new(WebSocketConnector),
//!     Arc::new(NoMembershipProbe),
//! );
//!
//! client.connect(&session_token).await;
//! if client.reliable_join(&outpost_uuid).await {
//!     client.start_speaking(&outpost_uuid).await;
//! }
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LiveEvent::Outpost(message) => { /* … */ }
//!         LiveEvent::ReconnectExhausted { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::LiveClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, LinkHandler};
use crate::correlation::adaptive_timeout;
use crate::error::{LiveError, Result};
use crate::event::{EventEmitter, LiveEvent};
use crate::membership::MembershipProbe;
use crate::protocol::{OutgoingMessage, OutgoingMessageType, OutpostId};
use crate::router::{join_key, EchoTable, JoinTable, MessageRouter};
use crate::transport::Connector;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A join requested while the socket was still opening.
struct QueuedJoin {
    outpost_uuid: OutpostId,
    reply: oneshot::Sender<bool>,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to the live-events connection.
///
/// Clones share the same socket, correlation tables and event channel.
/// Dropping the last clone stops reconnecting and closes the socket.
#[derive(Clone)]
pub struct OutpostClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: LiveClientConfig,
    connection: Arc<ConnectionManager>,
    router: MessageRouter,
    joins: JoinTable,
    echoes: EchoTable,
    join_queue: Mutex<Vec<QueuedJoin>>,
    membership: Arc<dyn MembershipProbe>,
    events: EventEmitter,
}

impl OutpostClient {
    /// Build a client and its event receiver. Nothing is opened until
    /// [`connect`](Self::connect) is called.
    ///
    /// `connector` opens sockets (use
    /// [`WebSocketConnector`](crate::WebSocketConnector) for the real server);
    /// `membership` answers "already joined?" before joins are sent.
    pub fn new(
        config: LiveClientConfig,
        connector: Arc<dyn Connector>,
        membership: Arc<dyn MembershipProbe>,
    ) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (events, event_rx) = EventEmitter::channel(config.event_channel_capacity);
        let joins = JoinTable::new();
        let echoes = EchoTable::new();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let hooks = Arc::new(Hooks {
                inner: weak.clone(),
                events: events.clone(),
            });
            let connection = Arc::new(ConnectionManager::new(config.clone(), connector, hooks));
            let router = MessageRouter::new(
                config.local_address.clone(),
                joins.clone(),
                echoes.clone(),
                events.clone(),
                config.join_settle_delay,
            );
            Inner {
                config,
                connection,
                router,
                joins,
                echoes,
                join_queue: Mutex::new(Vec::new()),
                membership,
                events,
            }
        });

        (Self { inner }, event_rx)
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Open the socket for the session `token`. Returns `true` once connected.
    ///
    /// Concurrent calls share one attempt. A failed attempt is not retried
    /// automatically; call again or use an operation that reconnects.
    pub async fn connect(&self, token: &str) -> bool {
        self.inner.connection.connect(token).await
    }

    /// Close the socket and forget the token.
    ///
    /// Every pending join and health check fails before this method first
    /// yields; queued joins are answered `false`. No reconnect follows.
    pub async fn close(&self) {
        info!("closing live-events client");
        self.inner.connection.close().await;
    }

    /// Tear the socket down while keeping the token, so the next operation
    /// (or an explicit reconnect) dials a fresh one. Pending work fails as in
    /// [`close`](Self::close).
    pub async fn force_reset_connection(&self) {
        warn!("forcing connection reset");
        self.inner.connection.reset().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// `true` when the socket is open and usable.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Number of users with a join awaiting confirmation (0 or 1).
    pub fn pending_joins(&self) -> usize {
        self.inner.joins.len()
    }

    /// Number of echo probes awaiting a reply.
    pub fn pending_health_checks(&self) -> usize {
        self.inner.echoes.len()
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send a frame, reconnecting once first if the socket is not open.
    ///
    /// Returns `false` if the socket could not be opened or the write failed.
    /// A failed write is handled as a lost connection.
    pub async fn send(&self, message: &OutgoingMessage) -> bool {
        self.inner.send(message).await
    }

    /// Leave an outpost.
    pub async fn leave(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::leave(outpost_uuid)).await
    }

    /// React to another user in the outpost. `kind` must be one of the
    /// reaction kinds; anything else is refused without sending.
    pub async fn react(
        &self,
        kind: OutgoingMessageType,
        outpost_uuid: &str,
        react_to_user_address: &str,
        amount: Option<f64>,
    ) -> bool {
        if !kind.is_reaction() {
            warn!(?kind, "not a reaction kind");
            return false;
        }
        let message = OutgoingMessage::reaction(kind, outpost_uuid, react_to_user_address, amount);
        self.send(&message).await
    }

    pub async fn start_speaking(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::new(OutgoingMessageType::StartSpeaking, outpost_uuid))
            .await
    }

    pub async fn stop_speaking(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::new(OutgoingMessageType::StopSpeaking, outpost_uuid))
            .await
    }

    /// Announce that the user is waiting in the lobby for the creator.
    pub async fn wait_for_creator(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::new(OutgoingMessageType::WaitForCreator, outpost_uuid))
            .await
    }

    pub async fn start_recording(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::new(OutgoingMessageType::StartRecording, outpost_uuid))
            .await
    }

    pub async fn stop_recording(&self, outpost_uuid: &str) -> bool {
        self.send(&OutgoingMessage::new(OutgoingMessageType::StopRecording, outpost_uuid))
            .await
    }

    // ── Correlated operations ───────────────────────────────────────

    /// Join an outpost, resolving `true` once the server confirms it.
    ///
    /// Idempotent: if the membership probe says the user is already in the
    /// outpost, returns `true` without sending. While the socket is opening
    /// the request is queued and sent once connected. Concurrent joins share
    /// one `join` frame.
    pub async fn async_join(&self, outpost_uuid: &str) -> bool {
        self.inner.async_join(outpost_uuid).await
    }

    /// Join with connection hardening: make sure the socket is connected and
    /// healthy (resetting it if not), then try up to
    /// `reliable_join_attempts` joins with growing pauses, re-checking health
    /// between attempts.
    pub async fn reliable_join(&self, outpost_uuid: &str) -> bool {
        self.inner.reliable_join(outpost_uuid).await
    }

    /// Verify that the socket is actually exchanging traffic.
    ///
    /// A frame received within `activity_window` is enough. Otherwise up to
    /// `health_check_attempts` echo round-trips are made.
    pub async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

impl std::fmt::Debug for OutpostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutpostClient")
            .field("state", &self.state())
            .field("pending_joins", &self.pending_joins())
            .field("pending_health_checks", &self.pending_health_checks())
            .finish()
    }
}

// ── Operations ──────────────────────────────────────────────────────

impl Inner {
    async fn send(&self, message: &OutgoingMessage) -> bool {
        self.send_by(message, None).await
    }

    /// Like [`send`](Self::send), but a frame whose reconnect finished after
    /// `deadline` is dropped instead of written.
    async fn send_by(&self, message: &OutgoingMessage, deadline: Option<Instant>) -> bool {
        match self.write(message, deadline).await {
            Ok(()) => {
                trace!(message_type = ?message.message_type, "message sent");
                true
            }
            Err(e) => {
                warn!(message_type = ?message.message_type, error = %e, "message not sent");
                false
            }
        }
    }

    async fn write(&self, message: &OutgoingMessage, deadline: Option<Instant>) -> Result<()> {
        if !self.connection.is_connected() {
            debug!(message_type = ?message.message_type, "not connected, reconnecting before send");
            if !self.connection.reconnect().await {
                return Err(LiveError::NotConnected);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(LiveError::Timeout);
            }
        }
        let json = serde_json::to_string(message)?;
        self.connection.send_text(json).await
    }

    /// Open the socket if needed. Waits for an attempt already in flight
    /// instead of starting another.
    async fn ensure_connected(&self) -> bool {
        match self.connection.state() {
            ConnectionState::Connected if self.connection.is_connected() => true,
            ConnectionState::Connecting => self.wait_for_connecting().await,
            _ => self.connection.reconnect().await,
        }
    }

    async fn wait_for_connecting(&self) -> bool {
        let mut changes = self.connection.subscribe();
        let settled = tokio::time::timeout(
            self.config.connect_timeout,
            changes.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await;
        match settled {
            Ok(Ok(state)) => *state == ConnectionState::Connected,
            _ => false,
        }
    }

    async fn is_member(&self, outpost_uuid: &str) -> bool {
        match self
            .membership
            .is_member(outpost_uuid, &self.config.local_address)
            .await
        {
            Ok(member) => member,
            Err(e) => {
                warn!(outpost = outpost_uuid, error = %e, "membership query failed; joining anyway");
                false
            }
        }
    }

    async fn async_join(self: &Arc<Self>, outpost_uuid: &str) -> bool {
        if self.is_member(outpost_uuid).await {
            debug!(outpost = outpost_uuid, "already a member, skipping join");
            return true;
        }
        if self.connection.state() == ConnectionState::Connecting {
            return self.queue_join(outpost_uuid).await;
        }
        self.join_once(outpost_uuid).await
    }

    /// Register the join correlation and send the frame if nobody else has.
    /// A confirmation naming another outpost gets one re-issue.
    async fn join_once(&self, outpost_uuid: &str) -> bool {
        let key = join_key(&self.config.local_address);

        for issue in 0..2 {
            let timeout = adaptive_timeout(self.connection.state(), &self.config.timeouts);
            let pending = self.joins.register(key.clone(), timeout);

            if pending.is_primary() {
                debug!(outpost = outpost_uuid, ?timeout, "sending join");
                let join = OutgoingMessage::join(outpost_uuid);
                if !self.send_by(&join, Some(pending.deadline())).await {
                    self.joins.fail(&key);
                    return false;
                }
            } else {
                debug!(outpost = outpost_uuid, "join already in flight, waiting on it");
            }

            match pending.wait().await {
                Ok(Some(confirmed)) if confirmed != outpost_uuid => {
                    warn!(
                        requested = outpost_uuid,
                        confirmed = %confirmed,
                        "join confirmed for a different outpost"
                    );
                    if issue > 0 {
                        return false;
                    }
                }
                Ok(_) => {
                    info!(outpost = outpost_uuid, "joined outpost");
                    return true;
                }
                Err(e) => {
                    warn!(outpost = outpost_uuid, error = %e, "join failed");
                    return false;
                }
            }
        }
        false
    }

    async fn queue_join(self: &Arc<Self>, outpost_uuid: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        guard(&self.join_queue).push(QueuedJoin {
            outpost_uuid: outpost_uuid.to_owned(),
            reply,
        });
        debug!(outpost = outpost_uuid, "connection opening, join queued");

        // The attempt may have finished before the push landed.
        if self.connection.state() != ConnectionState::Connecting {
            self.drain_join_queue();
        }

        match tokio::time::timeout(self.config.timeouts.connecting, answer).await {
            Ok(Ok(joined)) => joined,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(outpost = outpost_uuid, "queued join timed out");
                false
            }
        }
    }

    /// Send queued joins in order. Requests whose caller gave up are skipped.
    fn drain_join_queue(self: &Arc<Self>) {
        let queued = std::mem::take(&mut *guard(&self.join_queue));
        if queued.is_empty() {
            return;
        }
        debug!(count = queued.len(), "flushing queued joins");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            for QueuedJoin {
                outpost_uuid,
                reply,
            } in queued
            {
                if reply.is_closed() {
                    continue;
                }
                let joined = inner.join_once(&outpost_uuid).await;
                let _ = reply.send(joined);
            }
        });
    }

    fn fail_join_queue(&self) {
        let queued = std::mem::take(&mut *guard(&self.join_queue));
        if !queued.is_empty() {
            debug!(count = queued.len(), "failing queued joins");
        }
        for entry in queued {
            let _ = entry.reply.send(false);
        }
    }

    async fn health_check(&self) -> bool {
        if !self.ensure_connected().await {
            debug!("health check failed: not connected");
            return false;
        }
        if self.connection.received_within(self.config.activity_window) {
            trace!("recent traffic, connection healthy");
            return true;
        }

        let attempts = self.config.health_check_attempts;
        for attempt in 1..=attempts {
            if self.echo_round_trip().await {
                debug!(attempt, "echo answered, connection healthy");
                return true;
            }
            debug!(attempt, attempts, "echo unanswered");
            if attempt < attempts {
                tokio::time::sleep(self.config.health_check_retry_delay).await;
            }
        }

        warn!(attempts, "health check failed");
        false
    }

    async fn echo_round_trip(&self) -> bool {
        let id = Uuid::new_v4().to_string();
        let pending = self
            .echoes
            .register(id.clone(), self.config.health_check_timeout);
        if !self.send(&OutgoingMessage::echo(id)).await {
            return false;
        }
        pending.wait().await.is_ok()
    }

    /// Reset the socket and dial again with the kept token.
    async fn recover(&self) -> bool {
        self.connection.reset().await;
        self.connection.reconnect().await
    }

    async fn reliable_join(self: &Arc<Self>, outpost_uuid: &str) -> bool {
        if !self.ensure_connected().await {
            warn!(outpost = outpost_uuid, "reliable join: could not connect");
            return false;
        }
        if !self.health_check().await {
            warn!("reliable join: connection unhealthy, resetting");
            if !self.recover().await {
                return false;
            }
        }

        let attempts = self.config.reliable_join_attempts;
        for attempt in 1..=attempts {
            if self.async_join(outpost_uuid).await {
                return true;
            }
            if attempt == attempts {
                break;
            }

            let delay = self.config.reliable_join_retry_delay.saturating_mul(attempt);
            debug!(attempt, attempts, ?delay, "join attempt failed, retrying");
            tokio::time::sleep(delay).await;

            if !self.health_check().await {
                warn!(attempt, "connection degraded between join attempts, resetting");
                if !self.recover().await {
                    return false;
                }
            }
        }

        warn!(outpost = outpost_uuid, attempts, "reliable join gave up");
        false
    }
}

// ── Link hooks ──────────────────────────────────────────────────────

/// Connects the connection manager's callbacks to the client state. Holds a
/// weak reference so the manager does not keep the client alive. State
/// changes arrive with the link slot locked and go straight to the event
/// channel: upgrading there could drop the last client handle in place.
struct Hooks {
    inner: Weak<Inner>,
    events: EventEmitter,
}

impl LinkHandler for Hooks {
    fn on_frame(&self, text: &str) {
        if let Some(inner) = self.inner.upgrade() {
            let routed = inner.router.route(text);
            trace!(?routed, "frame routed");
        }
    }

    fn on_state(&self, state: ConnectionState) {
        self.events.emit(LiveEvent::ConnectionStateChanged(state));
    }

    fn on_connected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.drain_join_queue();
        }
    }

    fn on_connect_failed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_join_queue();
        }
    }

    fn on_link_down(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let failed = inner.joins.fail_all() + inner.echoes.fail_all();
            if failed > 0 {
                debug!(failed, "failed pending requests");
            }
        }
    }

    fn on_closed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_join_queue();
        }
    }

    fn on_reconnect_exhausted(&self, attempts: u32) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_join_queue();
            let events = self.events.clone();
            tokio::spawn(async move {
                events
                    .emit_reliably(LiveEvent::ReconnectExhausted { attempts })
                    .await;
            });
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Hooks can no longer upgrade, so fail everything here.
        self.connection.abandon();
        self.joins.fail_all();
        self.echoes.fail_all();
        self.fail_join_queue();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_changes_reach_the_app_without_a_live_client() {
        let (events, mut rx) = EventEmitter::channel(4);
        let hooks = Hooks {
            inner: Weak::new(),
            events,
        };

        hooks.on_state(ConnectionState::Connecting);
        hooks.on_frame(r#"{"name":"user.left","data":{}}"#);
        hooks.on_connect_failed();

        assert_eq!(
            rx.try_recv().unwrap(),
            LiveEvent::ConnectionStateChanged(ConnectionState::Connecting)
        );
        assert!(rx.try_recv().is_err());
    }
}
