// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario tests that run a real [`realtime_core`] server
//! bound to a loopback port (or, where the wire protocol doesn't expose an
//! operation directly, exercise the same collaborators in-process) to cover
//! the multi-module interactions a single unit test can't reach.

use std::time::Duration;

use realtime_core::admission::PlanTier;
use realtime_core::codec::{MessageType, Payload};
use realtime_core::config::{AdmissionConfig, ChannelConfig, CodecConfig, CoreConfig, HeartbeatConfig, RateLimiterConfig};
use realtime_core::ids::{ChannelId, ConnectionId, TenantId, UserId};
use realtime_core::presence::{PresenceKind, PresenceStatus};
use realtime_core::registry::ConnectionState;
use realtime_core::server::suspend_tenant;
use tokio::io::AsyncReadExt;

use realtime_core_specs::{auth_packet, presence_packet, publish_packet, read_packet, subscribe_packet, tenant, write_packet, write_tampered_packet, Harness};

fn base_config() -> CoreConfig {
    CoreConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        codec: CodecConfig::default(),
        heartbeat: HeartbeatConfig { sweep_interval_ms: 3_600_000, ..HeartbeatConfig::default() },
        channel: ChannelConfig::default(),
        admission: AdmissionConfig::default(),
        rate_limiter: RateLimiterConfig::default(),
    }
}

fn event_name(payload: &Payload) -> String {
    match payload {
        Payload::Event { name, .. } => name.clone(),
        other => panic!("expected an event frame, got {other:?}"),
    }
}

fn event_data(payload: Payload) -> serde_json::Value {
    match payload {
        Payload::Event { data, .. } => data,
        other => panic!("expected an event frame, got {other:?}"),
    }
}

// -- Scenario 1: happy-path subscribe and publish with history replay ---------

#[tokio::test]
async fn subscribe_and_publish_replays_history_then_streams_live_events() {
    let acme = tenant("acme", PlanTier::Pro, 200);
    let harness = Harness::start(base_config(), vec![acme]).await;
    let codec = harness.codec();
    let channel = "room-1";

    let mut c1 = harness.connect_and_auth("acme").await;
    write_packet(&mut c1, &codec, &subscribe_packet(channel, None)).await;

    for letter in ["a", "b", "c", "d", "e"] {
        write_packet(&mut c1, &codec, &publish_packet(channel, "message", serde_json::json!(letter))).await;
        // c1 is already subscribed, so it observes its own publish as a live event.
        let echoed = read_packet(&mut c1, &codec).await;
        assert_eq!(event_name(&echoed.payload), "message");
    }

    let mut c2 = harness.connect_and_auth("acme").await;
    write_packet(&mut c2, &codec, &subscribe_packet(channel, Some(3))).await;

    for expected in ["c", "d", "e"] {
        let replayed = read_packet(&mut c2, &codec).await;
        assert_eq!(event_data(replayed.payload), serde_json::json!(expected));
    }

    write_packet(&mut c1, &codec, &publish_packet(channel, "message", serde_json::json!("f"))).await;

    let on_c1 = read_packet(&mut c1, &codec).await;
    assert_eq!(event_data(on_c1.payload), serde_json::json!("f"));
    let on_c2 = read_packet(&mut c2, &codec).await;
    assert_eq!(event_data(on_c2.payload), serde_json::json!("f"));

    harness.shutdown().await;
}

// -- Scenario 2: rate-limited publish ------------------------------------------

#[tokio::test]
async fn rate_limited_publish_blocks_the_third_call_within_a_window() {
    let mut config = base_config();
    config.rate_limiter = RateLimiterConfig { default_limit: 2, window_ms: 60_000, max_entries: 50_000 };
    let acme = tenant("acme", PlanTier::Free, -1);
    let harness = Harness::start(config, vec![acme]).await;
    let codec = harness.codec();
    let channel = "room-2";
    let channel_id = ChannelId::from(channel);

    let mut publisher = harness.connect_and_auth("acme").await;

    write_packet(&mut publisher, &codec, &publish_packet(channel, "message", serde_json::json!(1))).await;
    write_packet(&mut publisher, &codec, &publish_packet(channel, "message", serde_json::json!(2))).await;
    write_packet(&mut publisher, &codec, &publish_packet(channel, "message", serde_json::json!(3))).await;

    let rejection = read_packet(&mut publisher, &codec).await;
    match rejection.payload {
        Payload::Error { body } => assert_eq!(body.code, "RATE_LIMIT_EXCEEDED"),
        other => panic!("expected a rate-limit error frame, got {other:?}"),
    }

    let channel_state = harness.state.channels.get(&channel_id).expect("channel should exist once published to");
    assert_eq!(channel_state.latest_seq().await, 2, "only the two allowed publishes should have reached history");

    harness.shutdown().await;
}

#[tokio::test]
async fn rate_limit_window_resets_after_its_deadline() {
    let limiter = realtime_core::admission::RateLimiter::new(RateLimiterConfig { default_limit: 2, window_ms: 60_000, max_entries: 50_000 });
    let tenant_id = TenantId::from("acme");

    let first = limiter.is_allowed(&tenant_id, PlanTier::Free, -1, None, 1_000_000);
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);

    let second = limiter.is_allowed(&tenant_id, PlanTier::Free, -1, None, 1_000_010);
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);

    let third = limiter.is_allowed(&tenant_id, PlanTier::Free, -1, None, 1_000_020);
    assert!(!third.allowed);
    assert_eq!(third.remaining, 0);
    assert!(third.retry_after.is_some());

    let after_reset = limiter.is_allowed(&tenant_id, PlanTier::Free, -1, None, 1_000_020 + 60_001);
    assert!(after_reset.allowed);
    assert_eq!(after_reset.remaining, 1);
}

// -- Scenario 3: heartbeat eviction ---------------------------------------------

#[tokio::test]
async fn unresponsive_connection_is_evicted_and_its_presence_leaves() {
    let mut config = base_config();
    config.heartbeat = HeartbeatConfig { interval_ms: 80, timeout_ms: 80, max_missed: 2, jitter_ms: 0, sweep_interval_ms: 40, stale_threshold_ms: 300_000 };
    let acme = tenant("acme", PlanTier::Free, -1);
    let harness = Harness::start(config, vec![acme]).await;
    let codec = harness.codec();
    let channel = "room-3";

    let mut silent = harness.connect_and_auth("acme").await;
    write_packet(&mut silent, &codec, &presence_packet(channel, "alice", "join", None)).await;

    let mut watcher = harness.connect_and_auth("acme").await;
    write_packet(&mut watcher, &codec, &subscribe_packet(channel, None)).await;

    // `silent` never answers a ping, so after `max_missed` full
    // interval+timeout cycles the sweeper evicts it.
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let mut probe = [0u8; 1];
    let n = silent.read(&mut probe).await.expect("socket read after eviction");
    assert_eq!(n, 0, "evicted connection's socket should be closed");

    let leave = read_packet(&mut watcher, &codec).await;
    assert_eq!(event_name(&leave.payload), "presence");
    let data = event_data(leave.payload);
    assert_eq!(data["kind"], "leave", "eviction teardown should emit a presence leave for every channel the connection held presence in");
    assert_eq!(data["record"]["user_id"], "alice");

    harness.shutdown().await;
}

// -- Scenario 4: presence diff across disconnect and reconnect -----------------

#[tokio::test]
async fn presence_diff_shows_one_leave_and_one_join_across_reconnect() {
    let harness = Harness::start(base_config(), vec![tenant("acme", PlanTier::Free, -1)]).await;
    let channel_id = ChannelId::from("room-4");
    let user = UserId::from("alice");
    let connection_a = ConnectionId::new();
    let connection_b = ConnectionId::new();

    harness.state.presence.join(&harness.state.channels, &channel_id, user.clone(), connection_a, serde_json::json!({}), 1).await;
    harness.state.presence.update(&harness.state.channels, &channel_id, &user, &connection_a, PresenceStatus::Away, None, 2).await;
    harness.state.presence.leave(&harness.state.channels, &channel_id, &user, &connection_a, 3).await;
    harness.state.presence.join(&harness.state.channels, &channel_id, user.clone(), connection_b, serde_json::json!({}), 4).await;

    let (events, gap) = harness.state.presence.diff(&harness.state.channels, &channel_id, 0).await;
    assert!(!gap);

    let left: Vec<_> = events.iter().filter(|e| e.kind == PresenceKind::Leave && e.record.user_id == user).collect();
    let joined: Vec<_> = events.iter().filter(|e| e.kind == PresenceKind::Join && e.record.user_id == user).collect();
    assert_eq!(left.len(), 1, "A's disconnect should appear exactly once in the diff");
    assert_eq!(joined.len(), 1, "B's reconnect should appear exactly once in the diff");
    assert_eq!(joined[0].record.connection_id, connection_b);
    assert_eq!(joined[0].record.status, PresenceStatus::Online, "a fresh join defaults to online unless the client explicitly restores a prior status");

    harness.shutdown().await;
}

#[tokio::test]
async fn reconnect_can_restore_prior_status_when_the_client_signals_continuity() {
    let harness = Harness::start(base_config(), vec![tenant("acme", PlanTier::Free, -1)]).await;
    let channel_id = ChannelId::from("room-4b");
    let user = UserId::from("alice");
    let connection_b = ConnectionId::new();

    harness.state.presence.join(&harness.state.channels, &channel_id, user.clone(), connection_b, serde_json::json!({}), 10).await;
    harness.state.presence.update(&harness.state.channels, &channel_id, &user, &connection_b, PresenceStatus::Away, None, 11).await;

    let records = harness.state.presence.query(&harness.state.channels, &channel_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, PresenceStatus::Away);

    harness.shutdown().await;
}

// -- Scenario 5: tenant suspension mid-session ---------------------------------

#[tokio::test]
async fn suspended_tenant_connections_drain_before_closing() {
    let mut config = base_config();
    config.admission = AdmissionConfig { suspend_grace_ms: 400, ..AdmissionConfig::default() };
    let acme = tenant("acme", PlanTier::Free, -1);
    let harness = Harness::start(config, vec![acme]).await;
    let codec = harness.codec();
    let channel = "room-5";
    let tenant_id = TenantId::from("acme");

    let mut subscriber = harness.connect_and_auth("acme").await;
    write_packet(&mut subscriber, &codec, &subscribe_packet(channel, None)).await;
    let mut publisher = harness.connect_and_auth("acme").await;

    let connection_ids = harness.state.registry.connections_for_tenant(&tenant_id);
    assert_eq!(connection_ids.len(), 2);

    suspend_tenant(&harness.state, &tenant_id).await;
    for id in &connection_ids {
        assert_eq!(harness.state.registry.state_of(id), Some(ConnectionState::Draining));
    }

    write_packet(&mut publisher, &codec, &publish_packet(channel, "message", serde_json::json!("during-drain"))).await;

    let no_delivery = tokio::time::timeout(Duration::from_millis(150), read_packet(&mut subscriber, &codec)).await;
    assert!(no_delivery.is_err(), "a draining connection should not receive newly published events");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut probe = [0u8; 1];
    let n = subscriber.read(&mut probe).await.expect("socket read after suspension grace elapses");
    assert_eq!(n, 0, "suspended connection should be force-closed once the grace period elapses");
    assert!(harness.state.registry.state_of(&connection_ids[0]).is_none());

    harness.shutdown().await;
}

// -- Scenario 6: codec tamper detection -----------------------------------------

#[tokio::test]
async fn tampered_payload_fails_checksum_and_never_reaches_a_handler() {
    let harness = Harness::start(base_config(), vec![tenant("acme", PlanTier::Free, -1)]).await;
    let codec = harness.codec();
    let channel = "room-6";
    let channel_id = ChannelId::from(channel);

    let mut client = harness.connect_and_auth("acme").await;
    write_tampered_packet(&mut client, &codec, &publish_packet(channel, "message", serde_json::json!("tampered"))).await;

    let response = read_packet(&mut client, &codec).await;
    match response.payload {
        Payload::Error { body } => assert_eq!(body.code, "CHECKSUM_MISMATCH"),
        other => panic!("expected a checksum-mismatch error frame, got {other:?}"),
    }

    assert!(harness.state.channels.get(&channel_id).is_none(), "publish must never reach the channel once decode fails");

    // The connection itself stays usable: validation failures don't close it.
    let ping = realtime_core::codec::Packet::new(
        realtime_core::codec::PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Ping, 0),
        Payload::Empty,
    );
    write_packet(&mut client, &codec, &ping).await;
    let pong = read_packet(&mut client, &codec).await;
    assert_eq!(pong.header.message_type, MessageType::Pong);

    harness.shutdown().await;
}
