//! Socket lifecycle: connect, keep-alive, reconnect with backoff, teardown.
//!
//! The [`ConnectionManager`] owns the single live link. A link is a spawned
//! transport loop that multiplexes outgoing frames, keep-alive ticks and
//! incoming frames with `tokio::select!`, handing every inbound text frame to
//! the [`LinkHandler`].
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//! Connecting --timeout/error--> Disconnected
//! Connected --socket close/error--> Disconnected   (schedules a reconnect)
//! any --close()--> Disconnected                     (no reconnect)
//! ```
//!
//! Every state transition happens under the link mutex and is checked
//! against an epoch counter that `close()` bumps, so an attempt that was in
//! flight when the caller closed can neither install its socket nor overwrite
//! the state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::LiveClientConfig;
use crate::error::{LiveError, Result};
use crate::lock::Lock;
use crate::protocol::connection_url;
use crate::transport::{Connector, Transport};

/// Connection status, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Receives everything that happens on the link. Implemented by the client
/// facade; calls are synchronous and must not block.
pub(crate) trait LinkHandler: Send + Sync + 'static {
    /// An inbound text frame.
    fn on_frame(&self, text: &str);
    /// The connection state changed. Called with the link slot locked, so it
    /// must not reach back into the manager.
    fn on_state(&self, state: ConnectionState);
    /// A link was installed and is ready for traffic.
    fn on_connected(&self);
    /// A connection attempt failed or timed out before a link was installed.
    fn on_connect_failed(&self);
    /// The link went away (lost or torn down). Pending requests must fail.
    fn on_link_down(&self);
    /// The caller closed or reset the connection.
    fn on_closed(&self);
    /// Reconnection gave up after `attempts` consecutive failures.
    fn on_reconnect_exhausted(&self, attempts: u32);
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A frame queued for the transport loop, with the write result reported back.
struct OutboundFrame {
    json: String,
    ack: oneshot::Sender<Result<()>>,
}

/// The live socket: its transport loop task and the channels into it.
struct Link {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<OutboundFrame>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Link {
    /// Ask the transport loop to close the socket and wait for it, aborting
    /// the task if it does not exit within `timeout`.
    async fn shutdown(mut self, timeout: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!("transport loop terminated with join error: {join_err}");
            }
            Err(_) => {
                warn!("transport loop did not exit within timeout; aborting task");
                self.task.abort();
            }
        }
    }
}

/// Why a transport loop ended.
#[derive(Debug)]
enum LinkExit {
    /// Closed on request; nothing to recover.
    Shutdown,
    /// The socket failed or the server went away.
    Lost(String),
}

/// Owner of the live socket and its state machine.
pub(crate) struct ConnectionManager {
    config: LiveClientConfig,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn LinkHandler>,
    state_tx: watch::Sender<ConnectionState>,
    lock: Lock,
    token: Mutex<Option<String>>,
    policy: Mutex<ReconnectPolicy>,
    epoch: AtomicU64,
    next_link_id: AtomicU64,
    link: Mutex<Option<Link>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    last_inbound: Arc<Mutex<Option<Instant>>>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: LiveClientConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn LinkHandler>,
    ) -> Self {
        let policy = ReconnectPolicy::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.max_reconnect_attempts,
        );
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            handler,
            state_tx,
            lock: Lock::new(),
            token: Mutex::new(None),
            policy: Mutex::new(policy),
            epoch: AtomicU64::new(0),
            next_link_id: AtomicU64::new(0),
            link: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            last_inbound: Arc::new(Mutex::new(None)),
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Connected and holding a live link.
    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && guard(&self.link).is_some()
    }

    pub(crate) fn has_token(&self) -> bool {
        guard(&self.token).is_some()
    }

    /// Consecutive failed reconnect attempts since the last success.
    pub(crate) fn reconnect_attempts(&self) -> u32 {
        guard(&self.policy).attempts()
    }

    /// `true` if an inbound frame arrived on the current link within `window`.
    pub(crate) fn received_within(&self, window: Duration) -> bool {
        guard(&self.last_inbound).is_some_and(|at| at.elapsed() <= window)
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(?state, "connection state changed");
            self.handler.on_state(state);
        }
    }

    fn token(&self) -> Option<String> {
        guard(&self.token).clone()
    }

    // ── Connect / reconnect ─────────────────────────────────────────

    /// Open the socket for `token`.
    ///
    /// Serialized with every other connect/reconnect. A caller that arrives
    /// while an attempt is in flight waits for it and reports its outcome
    /// instead of opening a second socket.
    pub(crate) async fn connect(self: &Arc<Self>, token: &str) -> bool {
        let joined_in_flight = self.state() == ConnectionState::Connecting;
        let _guard = self.lock.acquire().await;

        let same_token = self.token().as_deref() == Some(token);
        if joined_in_flight {
            return same_token && self.is_connected();
        }
        if same_token && self.is_connected() {
            debug!("already connected");
            return true;
        }
        if self.is_connected() {
            debug!("session token changed, replacing the live connection");
            self.discard_link().await;
        }

        *guard(&self.token) = Some(token.to_owned());
        let epoch = self.epoch.load(Ordering::Acquire);
        self.open_link(token, epoch).await
    }

    /// One backoff-delayed reconnect attempt using the stored token.
    ///
    /// Refuses when no token is set. After `max_reconnect_attempts`
    /// consecutive failures the handler is told once and further calls fail
    /// immediately until a connection succeeds or the client is closed.
    pub(crate) async fn reconnect(self: &Arc<Self>) -> bool {
        if !self.has_token() {
            warn!("reconnect refused: no session token");
            return false;
        }
        let _guard = self.lock.acquire().await;
        if self.is_connected() {
            return true;
        }
        // Closed while waiting for the lock.
        let Some(token) = self.token() else {
            return false;
        };

        let epoch = self.epoch.load(Ordering::Acquire);
        let (attempt, delay) = {
            let mut policy = guard(&self.policy);
            let attempt = policy.attempts() + 1;
            match policy.next_delay() {
                Some(delay) => (attempt, delay),
                None => {
                    debug!("reconnect attempts exhausted");
                    return false;
                }
            }
        };

        info!(
            attempt,
            max_attempts = self.config.max_reconnect_attempts,
            ?delay,
            "reconnecting"
        );
        tokio::time::sleep(delay).await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("reconnect cancelled by close");
            return false;
        }

        if self.open_link(&token, epoch).await {
            return true;
        }

        let exhausted = guard(&self.policy).is_exhausted();
        if exhausted {
            error!(attempts = attempt, "giving up reconnecting");
            self.handler.on_reconnect_exhausted(attempt);
        }
        false
    }

    /// `true` while an automatic reconnect loop should keep going.
    fn can_retry(&self) -> bool {
        self.has_token() && !guard(&self.policy).is_exhausted()
    }

    /// Run reconnect attempts in the background until one succeeds, the
    /// attempts run out, or the client is closed.
    fn schedule_reconnect(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = self.config.link_loss_reconnect_delay;
        debug!(?delay, "scheduling reconnect");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if manager.reconnect().await || !manager.can_retry() {
                    return;
                }
            }
        });

        if let Some(previous) = guard(&self.reconnect_task).replace(task) {
            previous.abort();
        }
    }

    /// Open a socket and install it as the live link. The caller holds the
    /// connect lock. `epoch` is the value observed when the attempt started.
    async fn open_link(self: &Arc<Self>, token: &str, epoch: u64) -> bool {
        if !self.transition_if_current(epoch, ConnectionState::Connecting) {
            return false;
        }

        let url = connection_url(&self.config.server_address, token);
        info!(server = %self.config.server_address, "opening live-events connection");
        let outcome =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&url)).await;

        let transport = match outcome {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!(error = %e, "connection attempt failed");
                self.transition_if_current(epoch, ConnectionState::Disconnected);
                self.handler.on_connect_failed();
                return false;
            }
            Err(_) => {
                warn!(timeout = ?self.config.connect_timeout, "connection attempt timed out");
                self.transition_if_current(epoch, ConnectionState::Disconnected);
                self.handler.on_connect_failed();
                return false;
            }
        };

        if let Err(mut stale) = self.install_link(transport, epoch) {
            debug!("connection attempt superseded by close; dropping socket");
            let _ = stale.close().await;
            return false;
        }

        guard(&self.policy).reset();
        info!("live-events connection open");
        self.handler.on_connected();
        true
    }

    /// Move to `state` unless `close()` ran since `epoch` was read.
    fn transition_if_current(&self, epoch: u64, state: ConnectionState) -> bool {
        let _slot = guard(&self.link);
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Spawn the transport loop for `transport` and mark the connection open.
    /// Hands the transport back if the attempt has been superseded.
    fn install_link(
        self: &Arc<Self>,
        transport: Box<dyn Transport>,
        epoch: u64,
    ) -> std::result::Result<(), Box<dyn Transport>> {
        let mut slot = guard(&self.link);
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Err(transport);
        }

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *guard(&self.last_inbound) = None;

        let weak = Arc::downgrade(self);
        let handler = Arc::clone(&self.handler);
        let activity = Arc::clone(&self.last_inbound);
        let keepalive = self.config.keepalive_interval;

        let task = tokio::spawn(async move {
            let exit =
                transport_loop(transport, cmd_rx, shutdown_rx, handler, activity, keepalive).await;
            if let LinkExit::Lost(reason) = exit {
                if let Some(manager) = weak.upgrade() {
                    manager.on_link_lost(id, &reason);
                }
            }
        });

        *slot = Some(Link {
            id,
            cmd_tx,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// The transport loop of link `id` died on its own.
    fn on_link_lost(self: &Arc<Self>, id: u64, reason: &str) {
        {
            let mut slot = guard(&self.link);
            if slot.as_ref().map(|link| link.id) != Some(id) {
                return;
            }
            *slot = None;
            self.set_state(ConnectionState::Disconnected);
        }
        warn!(reason, "live-events connection lost");
        self.handler.on_link_down();
        if self.has_token() {
            self.schedule_reconnect();
        }
    }

    /// Replace-in-place teardown used when the token changes.
    async fn discard_link(&self) {
        let link = guard(&self.link).take();
        if let Some(link) = link {
            self.handler.on_link_down();
            link.shutdown(self.config.shutdown_timeout).await;
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Synchronous part of close/reset: invalidate in-flight attempts, cancel
    /// the reconnect timer, reset counters, fail everything pending. Returns
    /// the link so the caller can await its graceful close.
    fn teardown(&self, keep_token: bool) -> Option<Link> {
        let link = {
            let mut slot = guard(&self.link);
            self.epoch.fetch_add(1, Ordering::AcqRel);
            if !keep_token {
                *guard(&self.token) = None;
            }
            if let Some(task) = guard(&self.reconnect_task).take() {
                task.abort();
            }
            guard(&self.policy).reset();
            *guard(&self.last_inbound) = None;
            self.set_state(ConnectionState::Disconnected);
            slot.take()
        };
        self.handler.on_link_down();
        self.handler.on_closed();
        link
    }

    /// Close the connection for good. Pending operations fail before this
    /// returns control; no reconnect follows. A later `connect()` starts over.
    pub(crate) async fn close(&self) {
        debug!("close requested");
        if let Some(link) = self.teardown(false) {
            link.shutdown(self.config.shutdown_timeout).await;
        }
    }

    /// Teardown without waiting for the close handshake. Dropping the link's
    /// shutdown sender still makes its loop close the socket.
    pub(crate) fn abandon(&self) {
        drop(self.teardown(false));
    }

    /// Like [`close`](Self::close) but keeps the session token, so that
    /// [`reconnect`](Self::reconnect) can establish a fresh socket.
    pub(crate) async fn reset(&self) {
        debug!("connection reset requested");
        if let Some(link) = self.teardown(true) {
            link.shutdown(self.config.shutdown_timeout).await;
        }
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Write one text frame on the live link.
    ///
    /// # Errors
    ///
    /// [`LiveError::NotConnected`] without a link; the transport's error if
    /// the write fails (the link is then treated as lost).
    pub(crate) async fn send_text(&self, json: String) -> Result<()> {
        let cmd_tx = guard(&self.link)
            .as_ref()
            .map(|link| link.cmd_tx.clone())
            .ok_or(LiveError::NotConnected)?;
        let (ack, ack_rx) = oneshot::channel();
        cmd_tx
            .send(OutboundFrame { json, ack })
            .map_err(|_| LiveError::NotConnected)?;
        ack_rx.await.map_err(|_| LiveError::TransportClosed)?
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("has_token", &self.has_token())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop for one link.
///
/// Exits when:
/// - the shutdown signal fires or the command channel closes (`Shutdown`)
/// - the server closes the socket, or a read, write or keep-alive fails (`Lost`)
async fn transport_loop(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut shutdown_rx: oneshot::Receiver<()>,
    handler: Arc<dyn LinkHandler>,
    activity: Arc<Mutex<Option<Instant>>>,
    keepalive_interval: Duration,
) -> LinkExit {
    debug!("transport loop started");

    let period = keepalive_interval.max(Duration::from_millis(1));
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            // Branch 1: outgoing frame from the client
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => {
                        match transport.send(frame.json).await {
                            Ok(()) => {
                                let _ = frame.ack.send(Ok(()));
                            }
                            Err(e) => {
                                error!("transport send error: {e}");
                                let reason = format!("transport send error: {e}");
                                let _ = frame.ack.send(Err(e));
                                break LinkExit::Lost(reason);
                            }
                        }
                    }
                    // Command channel closed: the manager dropped the link.
                    None => {
                        debug!("command channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        break LinkExit::Shutdown;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                break LinkExit::Shutdown;
            }

            // Branch 3: keep-alive
            _ = keepalive.tick() => {
                if let Err(e) = transport.send_keepalive().await {
                    warn!("keep-alive failed: {e}");
                    break LinkExit::Lost(format!("keep-alive failed: {e}"));
                }
                trace!("keep-alive sent");
            }

            // Branch 4: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        *guard(&activity) = Some(Instant::now());
                        handler.on_frame(&text);
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        break LinkExit::Lost(format!("transport receive error: {e}"));
                    }
                    None => {
                        debug!("transport closed by server");
                        break LinkExit::Lost("closed by server".into());
                    }
                }
            }
        }
    };

    debug!(?exit, "transport loop exited");
    exit
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    // ── Mock connector ──────────────────────────────────────────────

    #[derive(Debug, Clone, Copy)]
    enum Dial {
        Accept,
        Refuse,
        /// Accept after the given delay.
        Slow(Duration),
        /// Never finish.
        Hang,
    }

    /// Server end of a mock socket.
    struct ServerEnd {
        tx: mpsc::UnboundedSender<Option<String>>,
        sent: Arc<StdMutex<Vec<String>>>,
        keepalives: Arc<AtomicUsize>,
    }

    use std::sync::Mutex as StdMutex;

    struct MockTransport {
        rx: mpsc::UnboundedReceiver<Option<String>>,
        sent: Arc<StdMutex<Vec<String>>>,
        keepalives: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.rx.recv().await {
                Some(Some(text)) => Some(Ok(text)),
                // Explicit None from the server end, or the end dropped.
                Some(None) | None => None,
            }
        }

        async fn send_keepalive(&mut self) -> Result<()> {
            self.keepalives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockConnector {
        script: StdMutex<VecDeque<Dial>>,
        fallback: StdMutex<Option<Dial>>,
        calls: AtomicUsize,
        urls: StdMutex<Vec<String>>,
        servers: StdMutex<Vec<ServerEnd>>,
    }

    impl MockConnector {
        fn scripted(dials: Vec<Dial>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(dials.into()),
                ..Default::default()
            })
        }

        fn then_always(self: &Arc<Self>, dial: Dial) {
            *self.fallback.lock().unwrap() = Some(dial);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Close the most recent socket from the server side.
        fn drop_latest(&self) {
            let servers = self.servers.lock().unwrap();
            servers.last().unwrap().tx.send(None).unwrap();
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            let dial = {
                let next = self.script.lock().unwrap().pop_front();
                next.or(*self.fallback.lock().unwrap()).unwrap_or(Dial::Accept)
            };
            match dial {
                Dial::Accept => {}
                Dial::Refuse => return Err(LiveError::TransportClosed),
                Dial::Slow(delay) => tokio::time::sleep(delay).await,
                Dial::Hang => std::future::pending::<()>().await,
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let keepalives = Arc::new(AtomicUsize::new(0));
            self.servers.lock().unwrap().push(ServerEnd {
                tx,
                sent: Arc::clone(&sent),
                keepalives: Arc::clone(&keepalives),
            });
            Ok(Box::new(MockTransport {
                rx,
                sent,
                keepalives,
            }))
        }
    }

    // ── Recording handler ───────────────────────────────────────────

    #[derive(Default)]
    struct Recorder {
        frames: StdMutex<Vec<String>>,
        states: StdMutex<Vec<ConnectionState>>,
        connected: AtomicUsize,
        connect_failed: AtomicUsize,
        link_down: AtomicUsize,
        closed: AtomicUsize,
        exhausted: StdMutex<Vec<u32>>,
    }

    impl LinkHandler for Recorder {
        fn on_frame(&self, text: &str) {
            self.frames.lock().unwrap().push(text.to_string());
        }
        fn on_state(&self, state: ConnectionState) {
            self.states.lock().unwrap().push(state);
        }
        fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn on_connect_failed(&self) {
            self.connect_failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_link_down(&self) {
            self.link_down.fetch_add(1, Ordering::SeqCst);
        }
        fn on_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_reconnect_exhausted(&self, attempts: u32) {
            self.exhausted.lock().unwrap().push(attempts);
        }
    }

    fn manager_with(
        connector: &Arc<MockConnector>,
        config: LiveClientConfig,
    ) -> (Arc<ConnectionManager>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let manager = Arc::new(ConnectionManager::new(
            config,
            Arc::clone(connector) as Arc<dyn Connector>,
            Arc::clone(&recorder) as Arc<dyn LinkHandler>,
        ));
        (manager, recorder)
    }

    fn test_config() -> LiveClientConfig {
        LiveClientConfig::new("ws://live.test/ws", "0xA1")
            .with_connect_timeout(Duration::from_secs(5))
            .with_reconnect_backoff(Duration::from_secs(1), Duration::from_secs(8))
            .with_max_reconnect_attempts(3)
    }

    /// Let spawned tasks run without moving the paused clock much.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn connect_opens_link_with_token_in_url() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        let (manager, recorder) = manager_with(&connector, test_config());

        assert!(manager.connect("s3cret").await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.is_connected());
        assert_eq!(
            connector.urls.lock().unwrap().as_slice(),
            ["ws://live.test/ws?token=s3cret"]
        );
        assert_eq!(
            recorder.states.lock().unwrap().as_slice(),
            [ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_to_disconnected() {
        let connector = MockConnector::scripted(vec![Dial::Hang]);
        let (manager, recorder) = manager_with(&connector, test_config());

        let started = Instant::now();
        assert!(!manager.connect("t").await);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.connect_failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_reports_failure() {
        let connector = MockConnector::scripted(vec![Dial::Refuse]);
        let (manager, recorder) = manager_with(&connector, test_config());

        assert!(!manager.connect("t").await);
        assert_eq!(recorder.connect_failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.link_down.load(Ordering::SeqCst), 0);
        assert_eq!(
            *recorder.states.lock().unwrap(),
            [ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_socket() {
        let connector = MockConnector::scripted(vec![Dial::Slow(Duration::from_secs(2))]);
        let (manager, _recorder) = manager_with(&connector, test_config());

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect("t").await })
        };
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let second = manager.connect("t").await;

        assert!(first.await.unwrap());
        assert!(second);
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_runs_while_connected() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        let (manager, _recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);

        tokio::time::sleep(Duration::from_secs(95)).await;
        let servers = connector.servers.lock().unwrap();
        assert_eq!(servers[0].keepalives.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_handler_and_mark_activity() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        let (manager, recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);
        assert!(!manager.received_within(Duration::from_secs(120)));

        connector.servers.lock().unwrap()[0]
            .tx
            .send(Some("hello".into()))
            .unwrap();
        settle().await;

        assert_eq!(recorder.frames.lock().unwrap().as_slice(), ["hello"]);
        assert!(manager.received_within(Duration::from_secs(120)));
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(!manager.received_within(Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn send_text_reaches_the_socket() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        let (manager, _recorder) = manager_with(&connector, test_config());

        assert!(matches!(
            manager.send_text("{}".into()).await,
            Err(LiveError::NotConnected)
        ));

        assert!(manager.connect("t").await);
        manager.send_text(r#"{"a":1}"#.into()).await.unwrap();
        let servers = connector.servers.lock().unwrap();
        assert_eq!(servers[0].sent.lock().unwrap().as_slice(), [r#"{"a":1}"#]);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_fails_pending_and_reconnects() {
        let connector = MockConnector::scripted(vec![Dial::Accept, Dial::Accept]);
        let (manager, recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);

        connector.drop_latest();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.link_down.load(Ordering::SeqCst), 1);

        // Link-loss delay (1 s) plus first backoff (1–2 s).
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.calls(), 2);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(recorder.connected.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_refused_without_token() {
        let connector = MockConnector::scripted(vec![]);
        let (manager, _recorder) = manager_with(&connector, test_config());
        assert!(!manager.reconnect().await);
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_ceiling_and_reports_once() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        connector.then_always(Dial::Refuse);
        let (manager, recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);

        connector.drop_latest();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.calls(), 1 + 3);
        assert_eq!(recorder.exhausted.lock().unwrap().as_slice(), [3]);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Further reconnects fail fast without dialing.
        assert!(!manager.reconnect().await);
        assert_eq!(connector.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_everything_and_does_not_reconnect() {
        let connector = MockConnector::scripted(vec![Dial::Accept]);
        let (manager, recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.has_token());
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 1);
        assert!(!manager.reconnect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_connect_discards_the_late_socket() {
        let connector = MockConnector::scripted(vec![Dial::Slow(Duration::from_secs(3))]);
        let (manager, _recorder) = manager_with(&connector, test_config());

        let attempt = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect("t").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.close().await;

        assert!(!attempt.await.unwrap());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_close_connect_ends_connected() {
        let connector = MockConnector::scripted(vec![Dial::Accept, Dial::Accept]);
        let (manager, _recorder) = manager_with(&connector, test_config());

        assert!(manager.connect("t").await);
        manager.close().await;
        assert!(manager.connect("t").await);
        assert_eq!(manager.state(), ConnectionState::Connected);

        // The first socket's shutdown must not be mistaken for a loss.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_keeps_token_for_reconnect() {
        let connector = MockConnector::scripted(vec![Dial::Accept, Dial::Accept]);
        let (manager, recorder) = manager_with(&connector, test_config());
        assert!(manager.connect("t").await);

        manager.reset().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.has_token());
        assert_eq!(recorder.link_down.load(Ordering::SeqCst), 1);

        assert!(manager.reconnect().await);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}
