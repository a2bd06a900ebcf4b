#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for the outpost live client integration tests.
//!
//! [`MockServer`] plays the live-events server behind the [`Connector`]
//! seam: it decides the fate of every dial, records every frame the client
//! writes, and can push frames or drop the socket from the server side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use outpost_live_client::{
    Connector, LiveClientConfig, LiveError, LiveEvent, MembershipProbe, NoMembershipProbe,
    OutpostClient, Transport,
};

/// Wallet address of the signed-in test user.
pub const LOCAL: &str = "0xA1";

// ── Dial script ─────────────────────────────────────────────────────

/// What happens to one connection attempt.
#[derive(Debug, Clone, Copy)]
pub enum Dial {
    Accept,
    Refuse,
    /// Accept after the given delay.
    Slow(Duration),
    /// Never complete; the client's connect timeout decides.
    Hang,
}

/// Produces server replies for a frame the client wrote on socket `index`.
pub type Responder = Arc<dyn Fn(usize, &Value) -> Vec<String> + Send + Sync>;

// ── MockServer ──────────────────────────────────────────────────────

/// Scripted stand-in for the live-events server.
pub struct MockServer {
    script: StdMutex<VecDeque<Dial>>,
    fallback: StdMutex<Dial>,
    dials: StdMutex<Vec<Instant>>,
    sockets: StdMutex<Vec<SocketHandle>>,
    log: Arc<FrameLog>,
    keepalive_failures: AtomicUsize,
}

/// Frames written by the client, shared with every socket.
#[derive(Default)]
struct FrameLog {
    sent: StdMutex<Vec<(usize, Value)>>,
    responder: StdMutex<Option<Responder>>,
}

impl FrameLog {
    /// Record a frame written on socket `index` and compute the replies.
    fn record(&self, index: usize, text: &str) -> Vec<String> {
        let value: Value = serde_json::from_str(text).expect("client wrote invalid JSON");
        self.sent.lock().unwrap().push((index, value.clone()));
        let responder = self.responder.lock().unwrap().clone();
        responder.map(|r| r(index, &value)).unwrap_or_default()
    }
}

/// Server side of one accepted socket.
struct SocketHandle {
    tx: mpsc::UnboundedSender<Option<String>>,
    closed: Arc<AtomicBool>,
    keepalives: Arc<AtomicUsize>,
}

impl MockServer {
    /// A server that accepts every dial and never answers anything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(VecDeque::new()),
            fallback: StdMutex::new(Dial::Accept),
            dials: StdMutex::new(Vec::new()),
            sockets: StdMutex::new(Vec::new()),
            log: Arc::new(FrameLog::default()),
            keepalive_failures: AtomicUsize::new(0),
        })
    }

    /// Queue outcomes for the next dials, in order.
    pub fn script(&self, dials: impl IntoIterator<Item = Dial>) {
        self.script.lock().unwrap().extend(dials);
    }

    /// Outcome of every dial once the script runs out.
    pub fn always(&self, dial: Dial) {
        *self.fallback.lock().unwrap() = dial;
    }

    pub fn respond_with(&self, responder: Responder) {
        *self.log.responder.lock().unwrap() = Some(responder);
    }

    /// The next `count` accepted sockets fail their first keep-alive.
    pub fn fail_keepalive_on_next(&self, count: usize) {
        self.keepalive_failures.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    pub fn dials(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// When each connection attempt started.
    pub fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().clone()
    }

    pub fn sockets(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    /// Push a frame to the client on the most recent socket.
    pub fn push(&self, frame: impl Into<String>) {
        let sockets = self.sockets.lock().unwrap();
        let _ = sockets.last().expect("no socket").tx.send(Some(frame.into()));
    }

    /// Close the most recent socket from the server side.
    pub fn drop_link(&self) {
        let sockets = self.sockets.lock().unwrap();
        let _ = sockets.last().expect("no socket").tx.send(None);
    }

    pub fn socket_closed(&self, index: usize) -> bool {
        self.sockets.lock().unwrap()[index].closed.load(Ordering::SeqCst)
    }

    pub fn keepalives(&self, index: usize) -> usize {
        self.sockets.lock().unwrap()[index].keepalives.load(Ordering::SeqCst)
    }

    /// Every frame the client wrote, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.log.sent.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }

    /// Frames written on socket `index`.
    pub fn sent_on(&self, index: usize) -> Vec<Value> {
        self.log
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Frames of one `message_type`.
    pub fn sent_of(&self, message_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["message_type"] == message_type)
            .collect()
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, LiveError> {
        assert!(url.contains("token="), "dial without token: {url}");
        self.dials.lock().unwrap().push(Instant::now());

        let dial = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(*self.fallback.lock().unwrap())
        };
        match dial {
            Dial::Accept => {}
            Dial::Refuse => {
                return Err(LiveError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )))
            }
            Dial::Slow(delay) => tokio::time::sleep(delay).await,
            Dial::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let keepalives = Arc::new(AtomicUsize::new(0));
        let fail_keepalive = self
            .keepalive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let index = {
            let mut sockets = self.sockets.lock().unwrap();
            sockets.push(SocketHandle {
                tx: tx.clone(),
                closed: Arc::clone(&closed),
                keepalives: Arc::clone(&keepalives),
            });
            sockets.len() - 1
        };

        Ok(Box::new(MockTransport {
            index,
            log: Arc::clone(&self.log),
            tx,
            rx,
            closed,
            keepalives,
            fail_keepalive,
        }))
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// Client side of one accepted socket.
pub struct MockTransport {
    index: usize,
    log: Arc<FrameLog>,
    tx: mpsc::UnboundedSender<Option<String>>,
    rx: mpsc::UnboundedReceiver<Option<String>>,
    closed: Arc<AtomicBool>,
    keepalives: Arc<AtomicUsize>,
    fail_keepalive: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), LiveError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveError::TransportClosed);
        }
        for reply in self.log.record(self.index, &message) {
            let _ = self.tx.send(Some(reply));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LiveError>> {
        match self.rx.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) | None => None,
        }
    }

    async fn send_keepalive(&mut self) -> Result<(), LiveError> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        if self.fail_keepalive {
            return Err(LiveError::TransportSend("broken pipe".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LiveError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Responders ──────────────────────────────────────────────────────

/// Answers `join` with the local user's `user.joined` and `echo` with
/// `message.echoed`.
pub fn cooperative() -> Responder {
    Arc::new(|_, frame| reply_to(frame))
}

/// Cooperative only from socket `from` onwards; silent before it.
pub fn cooperative_from(from: usize) -> Responder {
    Arc::new(move |index, frame| if index >= from { reply_to(frame) } else { Vec::new() })
}

/// Answers echoes but ignores joins.
pub fn echo_only() -> Responder {
    Arc::new(|_, frame| {
        if frame["message_type"] == "echo" {
            reply_to(frame)
        } else {
            Vec::new()
        }
    })
}

fn reply_to(frame: &Value) -> Vec<String> {
    match frame["message_type"].as_str() {
        Some("join") => {
            let outpost = frame["outpost_uuid"].as_str().unwrap_or_default();
            vec![user_joined_json(LOCAL, outpost)]
        }
        Some("echo") => {
            let id = frame["data"]["uuid"].as_str().unwrap_or_default();
            vec![echoed_json(id)]
        }
        _ => Vec::new(),
    }
}

// ── JSON helper functions ───────────────────────────────────────────

pub fn user_joined_json(address: &str, outpost_uuid: &str) -> String {
    json!({
        "name": "user.joined",
        "data": { "address": address, "outpost_uuid": outpost_uuid, "name": "Alice" }
    })
    .to_string()
}

pub fn user_left_json(address: &str, outpost_uuid: &str) -> String {
    json!({
        "name": "user.left",
        "data": { "address": address, "outpost_uuid": outpost_uuid }
    })
    .to_string()
}

pub fn echoed_json(uuid: &str) -> String {
    json!({ "name": "message.echoed", "data": { "uuid": uuid } }).to_string()
}

pub fn error_json(message: &str) -> String {
    json!({ "name": "error", "data": { "message": message } }).to_string()
}

// ── Membership probes ───────────────────────────────────────────────

/// Always gives the same answer.
pub struct FixedProbe(pub bool);

#[async_trait]
impl MembershipProbe for FixedProbe {
    async fn is_member(&self, _outpost_uuid: &str, _user_address: &str) -> Result<bool, LiveError> {
        Ok(self.0)
    }
}

/// Always fails, like an unreachable REST API.
pub struct FailingProbe;

#[async_trait]
impl MembershipProbe for FailingProbe {
    async fn is_member(&self, _outpost_uuid: &str, _user_address: &str) -> Result<bool, LiveError> {
        Err(LiveError::Membership("503 Service Unavailable".into()))
    }
}

// ── Client construction ─────────────────────────────────────────────

pub fn test_config() -> LiveClientConfig {
    LiveClientConfig::new("ws://live.test/ws", LOCAL)
}

pub fn client_for(server: &Arc<MockServer>) -> (OutpostClient, mpsc::Receiver<LiveEvent>) {
    client_with(server, test_config(), Arc::new(NoMembershipProbe))
}

pub fn client_with(
    server: &Arc<MockServer>,
    config: LiveClientConfig,
    probe: Arc<dyn MembershipProbe>,
) -> (OutpostClient, mpsc::Receiver<LiveEvent>) {
    OutpostClient::new(config, Arc::clone(server) as Arc<dyn Connector>, probe)
}

/// Let spawned tasks run without moving the paused clock noticeably.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything currently buffered on the event channel.
pub fn drain(events: &mut mpsc::Receiver<LiveEvent>) -> Vec<LiveEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
