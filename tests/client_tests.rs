//! Integration-style client tests for the outpost live client.
//!
//! Uses the shared `MockServer` from `tests/common` to script dials and
//! server replies, and verifies what `OutpostClient` writes, how it resolves
//! correlated operations, and which events it emits. All tests run on a
//! paused clock so timeouts and backoff are exact.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use outpost_live_client::protocol::{IncomingMessage, IncomingMessageType};
use outpost_live_client::{
    ConnectionState, LiveEvent, NoMembershipProbe, OutgoingMessage, OutgoingMessageType,
};

use common::{
    client_for, client_with, cooperative, cooperative_from, drain, echo_only, error_json,
    settle, test_config, user_joined_json, user_left_json, Dial, FailingProbe, FixedProbe,
    MockServer, LOCAL,
};

const TOKEN: &str = "session-token";

fn is_own_join(event: &LiveEvent) -> bool {
    matches!(
        event,
        LiveEvent::Outpost(IncomingMessage {
            name: IncomingMessageType::UserJoined,
            ..
        })
    )
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connect_emits_state_changes() {
    let server = MockServer::new();
    let (client, mut events) = client_for(&server);

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.connect(TOKEN).await);
    assert!(client.is_connected());

    assert_eq!(
        drain(&mut events),
        vec![
            LiveEvent::ConnectionStateChanged(ConnectionState::Connecting),
            LiveEvent::ConnectionStateChanged(ConnectionState::Connected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn connect_times_out_without_retrying() {
    let server = MockServer::new();
    server.always(Dial::Hang);
    let (client, _events) = client_for(&server);

    let start = Instant::now();
    assert!(!client.connect(TOKEN).await);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_dial_once() {
    let server = MockServer::new();
    server.script([Dial::Slow(Duration::from_secs(2))]);
    let (client, _events) = client_for(&server);

    let (a, b) = tokio::join!(client.connect(TOKEN), client.connect(TOKEN));
    assert!(a && b);
    assert_eq!(server.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_close_connect_leaves_no_stale_state() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, _events) = client_for(&server);

    assert!(client.connect(TOKEN).await);
    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(server.socket_closed(0));

    assert!(client.connect(TOKEN).await);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.pending_joins(), 0);
    assert_eq!(client.pending_health_checks(), 0);

    // The new socket carries traffic; the closed one does not come back.
    assert!(client.async_join("R1").await);
    assert_eq!(server.sent_on(1).len(), 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.dials(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn keepalive_is_sent_every_interval() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(server.keepalives(0), 2);
    // Keep-alives are control frames, never JSON frames.
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keepalive_failure_triggers_reconnect() {
    let server = MockServer::new();
    server.fail_keepalive_on_next(1);
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    // Keep-alive at 30 s fails; reconnect 1 s later plus a 1–2 s backoff.
    tokio::time::sleep(Duration::from_secs(34)).await;
    assert_eq!(server.dials(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn link_loss_fails_pending_join_and_reconnects() {
    let server = MockServer::new();
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    settle().await;
    assert_eq!(client.pending_joins(), 1);

    let start = Instant::now();
    server.drop_link();
    assert!(!join.await.unwrap());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_joins(), 0);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(server.dials(), 2);
    assert!(client.is_connected());

    let states: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            LiveEvent::ConnectionStateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_grows_and_exhaustion_is_reported_once() {
    let server = MockServer::new();
    server.script([Dial::Accept]);
    server.always(Dial::Refuse);
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    server.drop_link();
    let exhausted = loop {
        match events.recv().await.unwrap() {
            LiveEvent::ReconnectExhausted { attempts } => break attempts,
            _ => continue,
        }
    };
    assert_eq!(exhausted, 5);
    assert_eq!(server.dials(), 1 + 5);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Gaps between reconnect dials are the backoff delays: doubling with
    // sub-base jitter, so non-decreasing and within [2^n, 2^n + 1) s.
    let times = server.dial_times();
    let gaps: Vec<Duration> = times[1..].windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 4);
    assert!(gaps.windows(2).all(|w| w[0] <= w[1]), "{gaps:?}");
    for (n, gap) in gaps.iter().enumerate() {
        let floor = Duration::from_secs(2u64 << n);
        assert!(*gap >= floor && *gap < floor + Duration::from_secs(1), "{gaps:?}");
    }

    // Nothing else is dialed, and no second notification arrives.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.dials(), 6);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, LiveEvent::ReconnectExhausted { .. })));
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_backoff() {
    let server = MockServer::new();
    server.script([Dial::Accept, Dial::Refuse, Dial::Accept]);
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    server.drop_link();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.dials(), 3);
    assert!(client.is_connected());

    // After a success the next loss starts again from the base delay:
    // 1 s link-loss pause plus a 1–2 s first backoff.
    let lost = Instant::now();
    server.drop_link();
    tokio::time::sleep(Duration::from_secs(10)).await;
    let gap = server.dial_times()[3] - lost;
    assert!(gap >= Duration::from_secs(2) && gap < Duration::from_secs(3), "{gap:?}");
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn close_stops_reconnecting() {
    let server = MockServer::new();
    server.script([Dial::Accept]);
    server.always(Dial::Refuse);
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    server.drop_link();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let dials = server.dials();
    client.close().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.dials(), dials);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_closes_the_socket() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    drop(client);
    settle().await;
    assert!(server.socket_closed(0));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_while_reconnecting_stops_everything() {
    let server = MockServer::new();
    server.script([Dial::Accept, Dial::Slow(Duration::from_secs(3))]);
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    // Link-loss delay plus the first backoff step is at most 3 s.
    server.drop_link();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    drop(client);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.dials(), 2);

    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "event channel still open");
}

// ════════════════════════════════════════════════════════════════════
// send
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn send_writes_frame_with_data_object() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    assert!(client.start_speaking("R1").await);
    assert!(client.leave("R1").await);

    let sent = server.sent();
    assert_eq!(
        sent,
        vec![
            serde_json::json!({"message_type": "start_speaking", "outpost_uuid": "R1", "data": {}}),
            serde_json::json!({"message_type": "leave", "outpost_uuid": "R1", "data": {}}),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn send_makes_exactly_one_reconnect_attempt() {
    let server = MockServer::new();
    server.script([Dial::Accept]);
    server.always(Dial::Refuse);
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    client.force_reset_connection().await;
    assert!(!client.send(&OutgoingMessage::leave("R1")).await);
    assert_eq!(server.dials(), 2);
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_reconnects_transparently() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    client.force_reset_connection().await;
    assert!(client.stop_recording("R1").await);
    assert_eq!(server.dials(), 2);
    assert_eq!(server.sent_on(1).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_without_token_fails_without_dialing() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);

    assert!(!client.wait_for_creator("R1").await);
    assert_eq!(server.dials(), 0);
}

#[tokio::test(start_paused = true)]
async fn react_only_accepts_reaction_kinds() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    assert!(!client.react(OutgoingMessageType::Join, "R1", "0xB0B", None).await);
    assert!(client.react(OutgoingMessageType::Cheer, "R1", "0xB0B", Some(3.0)).await);

    let cheers = server.sent_of("cheer");
    assert_eq!(cheers.len(), 1);
    assert_eq!(cheers[0]["data"]["react_to_user_address"], "0xB0B");
    assert_eq!(cheers[0]["data"]["amount"], 3.0);
    assert!(server.sent_of("join").is_empty());
}

// ════════════════════════════════════════════════════════════════════
// async_join
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn join_resolves_on_own_user_joined() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);
    drain(&mut events);

    assert!(client.async_join("R1").await);
    assert_eq!(
        server.sent_of("join"),
        vec![serde_json::json!({"message_type": "join", "outpost_uuid": "R1", "data": {}})]
    );
    assert_eq!(client.pending_joins(), 0);

    // The confirmation is forwarded, then a member refresh follows once the
    // room has settled.
    assert!(is_own_join(&events.recv().await.unwrap()));
    let start = Instant::now();
    assert_eq!(
        events.recv().await.unwrap(),
        LiveEvent::MembersRefreshRequested {
            outpost_uuid: "R1".into()
        }
    );
    assert!(start.elapsed() <= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn join_times_out_and_late_confirmation_is_a_no_op() {
    let server = MockServer::new();
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);
    drain(&mut events);

    let start = Instant::now();
    assert!(!client.async_join("R1").await);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(client.pending_joins(), 0);

    server.push(user_joined_json(LOCAL, "R1"));
    tokio::time::sleep(Duration::from_secs(2)).await;
    let late = drain(&mut events);
    assert_eq!(late.len(), 1, "{late:?}");
    assert!(is_own_join(&late[0]));
}

#[tokio::test(start_paused = true)]
async fn concurrent_joins_share_one_frame() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    settle().await;
    assert_eq!(server.sent_of("join").len(), 1);
    assert_eq!(client.pending_joins(), 1);

    server.push(user_joined_json(LOCAL, "R1"));
    assert!(first.await.unwrap());
    assert!(second.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn confirmation_matches_address_case_insensitively() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    settle().await;
    server.push(user_joined_json("0XA1", "R1"));
    assert!(join.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn other_users_join_does_not_confirm_ours() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    settle().await;
    server.push(user_joined_json("0xB0B", "R1"));
    settle().await;
    assert_eq!(client.pending_joins(), 1);
    assert!(!join.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn confirmation_for_another_outpost_reissues_once() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R2").await })
    };
    settle().await;
    server.push(user_joined_json(LOCAL, "R1"));
    settle().await;

    let joins = server.sent_of("join");
    assert_eq!(joins.len(), 2);
    assert!(joins.iter().all(|j| j["outpost_uuid"] == "R2"));

    server.push(user_joined_json(LOCAL, "R2"));
    assert!(join.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn join_is_skipped_when_already_a_member() {
    let server = MockServer::new();
    let (client, _events) = client_with(&server, test_config(), Arc::new(FixedProbe(true)));

    assert!(client.async_join("R1").await);
    assert_eq!(server.dials(), 0);
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_membership_query_still_joins() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, _events) = client_with(&server, test_config(), Arc::new(FailingProbe));
    assert!(client.connect(TOKEN).await);

    assert!(client.async_join("R1").await);
    assert_eq!(server.sent_of("join").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn join_while_connecting_is_queued_and_flushed() {
    let server = MockServer::new();
    server.script([Dial::Slow(Duration::from_secs(3))]);
    server.respond_with(cooperative());
    let (client, _events) = client_for(&server);

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect(TOKEN).await })
    };
    settle().await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let start = Instant::now();
    assert!(client.async_join("R1").await);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(connect.await.unwrap());
    assert_eq!(server.sent_of("join").len(), 1);
    assert_eq!(server.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_join_fails_on_close() {
    let server = MockServer::new();
    server.script([Dial::Slow(Duration::from_secs(3))]);
    let (client, _events) = client_for(&server);

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect(TOKEN).await })
    };
    settle().await;
    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    settle().await;

    client.close().await;
    assert!(!join.await.unwrap());
    assert!(!connect.await.unwrap());
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_join_fails_when_connect_fails() {
    let server = MockServer::new();
    server.script([Dial::Hang]);
    let config = test_config().with_connect_timeout(Duration::from_secs(2));
    let (client, _events) = client_with(&server, config, Arc::new(NoMembershipProbe));

    let connect = {
        let client = client.clone();
        tokio::spawn(async move { client.connect(TOKEN).await })
    };
    settle().await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let start = Instant::now();
    assert!(!client.async_join("R1").await);
    assert!(start.elapsed() <= Duration::from_secs(2));
    assert!(!connect.await.unwrap());
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn join_is_not_sent_when_reconnecting_outlasts_its_deadline() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    server.script([Dial::Accept, Dial::Slow(Duration::from_secs(25))]);
    let config = test_config().with_connect_timeout(Duration::from_secs(60));
    let (client, _events) = client_with(&server, config, Arc::new(NoMembershipProbe));
    assert!(client.connect(TOKEN).await);
    client.force_reset_connection().await;

    let start = Instant::now();
    assert!(!client.async_join("R1").await);
    assert!(start.elapsed() > Duration::from_secs(20));
    assert!(client.is_connected());
    assert!(server.sent_of("join").is_empty());
    assert_eq!(client.pending_joins(), 0);
}

// ════════════════════════════════════════════════════════════════════
// health_check
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn health_check_echo_round_trip() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    assert!(client.health_check().await);
    let echoes = server.sent_of("echo");
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0]["outpost_uuid"], "");
    assert!(echoes[0]["data"]["uuid"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(client.pending_health_checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn health_check_uses_recent_traffic() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    server.push(user_left_json("0xB0B", "R1"));
    settle().await;
    assert!(client.health_check().await);
    assert!(server.sent_of("echo").is_empty());
}

#[tokio::test(start_paused = true)]
async fn health_check_gives_up_after_three_attempts() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let start = Instant::now();
    assert!(!client.health_check().await);
    // 3 × 5 s round-trip budgets + 2 × 1 s pauses.
    assert_eq!(start.elapsed(), Duration::from_secs(17));
    assert_eq!(server.sent_of("echo").len(), 3);
    assert_eq!(client.pending_health_checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_health_checks_use_distinct_ids() {
    let server = MockServer::new();
    server.respond_with(echo_only());
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let (a, b) = tokio::join!(client.health_check(), client.health_check());
    assert!(a && b);
    let echoes = server.sent_of("echo");
    assert_eq!(echoes.len(), 2);
    assert_ne!(echoes[0]["data"]["uuid"], echoes[1]["data"]["uuid"]);
}

#[tokio::test(start_paused = true)]
async fn close_fails_every_pending_request_at_once() {
    let server = MockServer::new();
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let join = {
        let client = client.clone();
        tokio::spawn(async move { client.async_join("R1").await })
    };
    let checks: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.health_check().await })
        })
        .collect();
    settle().await;
    assert_eq!(client.pending_joins(), 1);
    assert_eq!(client.pending_health_checks(), 2);

    client.close().await;
    assert_eq!(client.pending_joins(), 0);
    assert_eq!(client.pending_health_checks(), 0);

    let start = Instant::now();
    assert!(!join.await.unwrap());
    assert!(start.elapsed() < Duration::from_secs(1));
    for check in checks {
        assert!(!check.await.unwrap());
    }
    assert_eq!(server.dials(), 1);
}

// ════════════════════════════════════════════════════════════════════
// reliable_join
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn reliable_join_on_healthy_connection() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    assert!(client.reliable_join("R1").await);
    assert_eq!(server.sent_of("echo").len(), 1);
    assert_eq!(server.sent_of("join").len(), 1);
    assert_eq!(server.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn reliable_join_resets_an_unhealthy_connection() {
    let server = MockServer::new();
    // The first socket is open but dead; the second one works.
    server.respond_with(cooperative_from(1));
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    assert!(client.reliable_join("R1").await);
    assert_eq!(server.dials(), 2);
    assert!(server.socket_closed(0));
    assert_eq!(server.sent_on(1).iter().filter(|f| f["message_type"] == "join").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reliable_join_retries_with_growing_pauses() {
    let server = MockServer::new();
    server.respond_with(echo_only());
    let (client, _events) = client_for(&server);
    assert!(client.connect(TOKEN).await);

    let start = Instant::now();
    assert!(!client.reliable_join("R1").await);
    // Three 5 s join timeouts, then pauses of 1 s and 2 s between them.
    assert_eq!(start.elapsed(), Duration::from_secs(3 * 5 + 1 + 2));
    assert_eq!(server.sent_of("join").len(), 3);
    assert_eq!(client.pending_joins(), 0);
}

#[tokio::test(start_paused = true)]
async fn reliable_join_connects_when_disconnected() {
    let server = MockServer::new();
    server.respond_with(cooperative());
    let (client, _events) = client_for(&server);

    // No token yet: nothing to reconnect with.
    assert!(!client.reliable_join("R1").await);
    assert_eq!(server.dials(), 0);

    assert!(client.connect(TOKEN).await);
    client.force_reset_connection().await;
    assert!(client.reliable_join("R1").await);
    assert_eq!(server.dials(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Inbound routing
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn domain_events_are_forwarded_and_errors_dropped() {
    let server = MockServer::new();
    let (client, mut events) = client_for(&server);
    assert!(client.connect(TOKEN).await);
    drain(&mut events);

    server.push(error_json("bad outpost"));
    server.push("{not json");
    server.push(r#"{"name":"remaining_time.updated","data":{"outpost_uuid":"R1","remaining_time":42.0}}"#);
    server.push(r#"{"name":"message.echoed","data":{"uuid":"nobody-asked"}}"#);
    settle().await;

    let received = drain(&mut events);
    assert_eq!(received.len(), 1, "{received:?}");
    match &received[0] {
        LiveEvent::Outpost(message) => {
            assert_eq!(message.name, IncomingMessageType::RemainingTimeUpdated);
            assert_eq!(message.data.remaining_time, Some(42.0));
            assert_eq!(message.data.outpost_id.as_deref(), Some("R1"));
        }
        other => panic!("expected Outpost, got {other:?}"),
    }
    assert!(client.is_connected());
}
