//! Dispatch of inbound frames.
//!
//! Every text frame read from the socket passes through
//! [`MessageRouter::route`]. Frames that answer a correlated request resolve
//! their correlation entry; domain frames go to the application. The router
//! only reads: it never writes to the socket.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::correlation::CorrelationTable;
use crate::event::{EventEmitter, LiveEvent};
use crate::protocol::{decode_frame, InboundFrame, IncomingMessage, IncomingMessageType, OutpostId};

/// Join table: one entry per user, resolved with the outpost the server
/// confirmed (`None` if the frame did not say).
pub(crate) type JoinTable = CorrelationTable<String, Option<OutpostId>>;

/// Health-check table: one entry per echo probe, keyed by its correlation id.
pub(crate) type EchoTable = CorrelationTable<String, ()>;

/// Correlation key of a user's pending join. Addresses compare
/// case-insensitively, so the key is lowercased.
pub(crate) fn join_key(address: &str) -> String {
    format!("join-{}", address.to_ascii_lowercase())
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Not JSON, unknown event name, or malformed payload.
    Dropped,
    /// The reserved `error` frame.
    ServerError,
    /// Our own `user.joined`, which completed a pending join.
    JoinConfirmed,
    /// Our own `user.joined`, with nothing waiting for it.
    StaleJoin,
    /// A `message.echoed` reply; `matched` if a health check was waiting.
    Echo { matched: bool },
    /// Handed to the application unchanged.
    Forwarded,
}

pub(crate) struct MessageRouter {
    local_address: String,
    joins: JoinTable,
    echoes: EchoTable,
    events: EventEmitter,
    settle_delay: Duration,
}

impl MessageRouter {
    pub(crate) fn new(
        local_address: impl Into<String>,
        joins: JoinTable,
        echoes: EchoTable,
        events: EventEmitter,
        settle_delay: Duration,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            joins,
            echoes,
            events,
            settle_delay,
        }
    }

    pub(crate) fn route(&self, text: &str) -> Routed {
        let message = match decode_frame(text) {
            Ok(InboundFrame::Event(message)) => message,
            Ok(InboundFrame::Error(payload)) => {
                warn!(%payload, "server reported an error");
                return Routed::ServerError;
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Routed::Dropped;
            }
        };

        let name = message.name;
        match name {
            IncomingMessageType::MessageEchoed => self.route_echo(&message),
            IncomingMessageType::UserJoined if self.is_local(&message) => {
                self.route_own_join(message)
            }
            _ => {
                trace!(?name, "forwarding event");
                self.events.emit(LiveEvent::Outpost(message));
                Routed::Forwarded
            }
        }
    }

    fn is_local(&self, message: &IncomingMessage) -> bool {
        message
            .data
            .address
            .as_deref()
            .is_some_and(|address| address.eq_ignore_ascii_case(&self.local_address))
    }

    fn route_echo(&self, message: &IncomingMessage) -> Routed {
        let matched = match message.data.uuid.as_ref() {
            Some(id) => self.echoes.complete(id, ()),
            None => false,
        };
        if !matched {
            debug!(uuid = ?message.data.uuid, "echo with no pending health check");
        }
        Routed::Echo { matched }
    }

    fn route_own_join(&self, message: IncomingMessage) -> Routed {
        let outpost = message.data.outpost_id.clone();
        let confirmed = self
            .joins
            .complete(&join_key(&self.local_address), outpost.clone());

        self.events.emit(LiveEvent::Outpost(message));

        if !confirmed {
            debug!(?outpost, "own join notification with no pending join");
            return Routed::StaleJoin;
        }

        debug!(?outpost, "join confirmed");
        match outpost {
            Some(outpost_uuid) => self.request_members_refresh(outpost_uuid),
            None => debug!("join confirmation without an outpost id; skipping member refresh"),
        }
        Routed::JoinConfirmed
    }

    /// Ask the application to refetch members once the room has settled.
    fn request_members_refresh(&self, outpost_uuid: OutpostId) {
        let events = self.events.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.emit(LiveEvent::MembersRefreshRequested { outpost_uuid });
        });
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("local_address", &self.local_address)
            .field("pending_joins", &self.joins.len())
            .field("pending_echoes", &self.echoes.len())
            .finish()
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
    use crate::error::LiveError;
    use tokio::sync::mpsc;

    struct Fixture {
        router: MessageRouter,
        joins: JoinTable,
        echoes: EchoTable,
        rx: mpsc::Receiver<LiveEvent>,
    }

    fn fixture() -> Fixture {
        let joins = JoinTable::new();
        let echoes = EchoTable::new();
        let (events, rx) = EventEmitter::channel(16);
        let router = MessageRouter::new(
            "0xAbC1",
            joins.clone(),
            echoes.clone(),
            events,
            Duration::from_millis(500),
        );
        Fixture {
            router,
            joins,
            echoes,
            rx,
        }
    }

    const OWN_JOIN_R1: &str =
        r#"{"name":"user.joined","data":{"address":"0xabc1","outpost_uuid":"R1"}}"#;

    #[tokio::test]
    async fn garbage_and_unknown_names_are_dropped() {
        let mut fx = fixture();
        assert_eq!(fx.router.route("not json"), Routed::Dropped);
        assert_eq!(fx.router.route(r#"{"name":"user.teleported","data":{}}"#), Routed::Dropped);
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_frame_is_not_forwarded() {
        let mut fx = fixture();
        let routed = fx.router.route(r#"{"name":"error","data":{"message":"bad token"}}"#);
        assert_eq!(routed, Routed::ServerError);
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn echo_resolves_matching_health_check_only() {
        let mut fx = fixture();
        let pending = fx.echoes.register("H1".to_string(), Duration::from_secs(5));

        let routed = fx.router.route(r#"{"name":"message.echoed","data":{"uuid":"H1"}}"#);
        assert_eq!(routed, Routed::Echo { matched: true });
        pending.wait().await.unwrap();

        let routed = fx.router.route(r#"{"name":"message.echoed","data":{"uuid":"H1"}}"#);
        assert_eq!(routed, Routed::Echo { matched: false });
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn own_join_confirms_and_requests_refresh_after_settling() {
        let mut fx = fixture();
        let pending = fx.joins.register(join_key("0xABC1"), Duration::from_secs(5));

        assert_eq!(fx.router.route(OWN_JOIN_R1), Routed::JoinConfirmed);
        assert_eq!(pending.wait().await.unwrap().as_deref(), Some("R1"));

        let forwarded = fx.rx.recv().await.unwrap();
        assert!(matches!(
            forwarded,
            LiveEvent::Outpost(IncomingMessage { name: IncomingMessageType::UserJoined, .. })
        ));

        let start = tokio::time::Instant::now();
        let refresh = fx.rx.recv().await.unwrap();
        assert_eq!(
            refresh,
            LiveEvent::MembersRefreshRequested {
                outpost_uuid: "R1".into()
            }
        );
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_own_join_is_forwarded_without_refresh() {
        let mut fx = fixture();
        assert_eq!(fx.router.route(OWN_JOIN_R1), Routed::StaleJoin);

        assert!(matches!(fx.rx.recv().await.unwrap(), LiveEvent::Outpost(_)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_users_join_leaves_our_entry_alone() {
        let mut fx = fixture();
        let pending = fx.joins.register(join_key("0xabc1"), Duration::from_secs(5));

        let routed = fx
            .router
            .route(r#"{"name":"user.joined","data":{"address":"0xBEEF","outpost_uuid":"R1"}}"#);
        assert_eq!(routed, Routed::Forwarded);
        assert!(fx.joins.contains_key(&join_key("0xabc1")));
        assert!(fx.rx.try_recv().is_ok());

        fx.joins.fail_all();
        assert!(matches!(pending.wait().await, Err(LiveError::Cancelled)));
    }

    #[tokio::test]
    async fn domain_events_are_forwarded_unchanged() {
        let mut fx = fixture();
        let text = r#"{"name":"user.cheered","data":{"address":"0xB0B","react_to_user_address":"0xabc1","amount":2.5}}"#;
        assert_eq!(fx.router.route(text), Routed::Forwarded);

        match fx.rx.try_recv().unwrap() {
            LiveEvent::Outpost(message) => {
                assert_eq!(message.name, IncomingMessageType::UserCheered);
                assert_eq!(message.data.react_to_address.as_deref(), Some("0xabc1"));
                assert_eq!(message.data.amount, Some(2.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
