// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::*;
use crate::admission::{AdmissionLayer, InMemoryTenantRepository, InMemoryUsageStorage, PlanTier, ResolutionStrategy, Tenant, TenantLimits, TenantStatus};
use crate::channel::ChannelRouter;
use crate::codec::Codec;
use crate::config::{AdmissionConfig, ChannelConfig, CodecConfig, CoreConfig, HeartbeatConfig, RateLimiterConfig};
use crate::heartbeat::HeartbeatManager;
use crate::ids::TenantId;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;

fn test_tenant() -> Tenant {
    Tenant {
        id: TenantId::from("acme"),
        slug: "acme".to_owned(),
        plan: PlanTier::Free,
        status: TenantStatus::Active,
        limits: TenantLimits { max_users: 100, max_storage_mb: 100, max_api_calls_per_month: -1, max_behaviors_per_minute: -1 },
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

fn test_config() -> CoreConfig {
    CoreConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        codec: CodecConfig::default(),
        heartbeat: HeartbeatConfig { interval_ms: 60_000, ..HeartbeatConfig::default() },
        channel: ChannelConfig::default(),
        admission: AdmissionConfig::default(),
        rate_limiter: RateLimiterConfig::default(),
    }
}

async fn build_state() -> Arc<SharedState> {
    let repository = InMemoryTenantRepository::new();
    repository.upsert(test_tenant());
    let config = test_config();
    let (heartbeat, _evictions) = HeartbeatManager::new(config.heartbeat);
    let admission = AdmissionLayer::new(
        Arc::new(repository),
        Arc::new(InMemoryUsageStorage::new()),
        config.admission.clone(),
        config.rate_limiter,
        vec![ResolutionStrategy::Header],
    );

    Arc::new(SharedState {
        codec: Arc::new(Codec::new(config.codec)),
        registry: Arc::new(ConnectionRegistry::new()),
        channels: Arc::new(ChannelRouter::new(config.channel)),
        presence: Arc::new(PresenceTracker::new(100)),
        heartbeat,
        admission: Arc::new(admission),
        config,
    })
}

async fn connect_pair(state: Arc<SharedState>) -> (TcpStream, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        handle_connection(socket, state, cancel).await;
    });

    let client = TcpStream::connect(addr).await.expect("client connect");
    (client, handle)
}

async fn write_packet(client: &mut TcpStream, codec: &Codec, packet: Packet) {
    let bytes = codec.encode(&packet).expect("encode");
    client.write_all(&bytes).await.expect("write");
}

async fn read_packet(client: &mut TcpStream, codec: &Codec) -> Packet {
    let mut len_buf = [0u8; 4];
    client.read_exact(&mut len_buf).await.expect("read header len");
    let header_len = u32::from_be_bytes(len_buf) as usize;

    let mut header_bytes = vec![0u8; header_len];
    client.read_exact(&mut header_bytes).await.expect("read header");

    client.read_exact(&mut len_buf).await.expect("read payload len");
    let payload_len = u32::from_be_bytes(len_buf) as usize;

    let mut payload_bytes = vec![0u8; payload_len];
    client.read_exact(&mut payload_bytes).await.expect("read payload");

    let mut frame = Vec::with_capacity(8 + header_len + payload_len);
    frame.extend_from_slice(&(header_len as u32).to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
    frame.extend_from_slice(&payload_bytes);
    codec.decode(&frame).expect("decode")
}

fn auth_packet(tenant_id: &str) -> Packet {
    new_packet(
        MessageType::Control,
        Payload::Control { action: ControlAction::Auth, data: json!({ "headers": { "X-Tenant-ID": tenant_id } }) },
    )
}

#[tokio::test]
async fn handshake_admits_the_resolved_tenant() {
    let state = build_state().await;
    let codec = Codec::new(state.config.codec);
    let (mut client, _server) = connect_pair(state).await;

    write_packet(&mut client, &codec, auth_packet("acme")).await;
    let ack = read_packet(&mut client, &codec).await;

    match ack.payload {
        Payload::Control { action: ControlAction::Auth, data } => {
            assert_eq!(data.get("status").and_then(|v| v.as_str()), Some("ok"));
            assert_eq!(data.get("tenant_id").and_then(|v| v.as_str()), Some("acme"));
        }
        other => panic!("expected auth ack, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tenant_closes_the_socket_without_an_ack() {
    let state = build_state().await;
    let codec = Codec::new(state.config.codec);
    let (mut client, server) = connect_pair(state).await;

    write_packet(&mut client, &codec, auth_packet("ghost")).await;

    let mut buf = [0u8; 1];
    let read_result = client.read(&mut buf).await;
    assert!(matches!(read_result, Ok(0) | Err(_)));
    server.await.expect("server task completes");
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let state = build_state().await;
    let codec = Codec::new(state.config.codec);
    let (mut client, _server) = connect_pair(state).await;

    write_packet(&mut client, &codec, auth_packet("acme")).await;
    let _ack = read_packet(&mut client, &codec).await;

    write_packet(&mut client, &codec, new_packet(MessageType::Ping, Payload::Empty)).await;
    let pong = read_packet(&mut client, &codec).await;
    assert_eq!(pong.header.message_type, MessageType::Pong);
}

#[tokio::test]
async fn subscriber_receives_a_published_event() {
    let state = build_state().await;
    let codec = Codec::new(state.config.codec);

    let (mut subscriber, _server_a) = connect_pair(state.clone()).await;
    write_packet(&mut subscriber, &codec, auth_packet("acme")).await;
    let _ack = read_packet(&mut subscriber, &codec).await;

    write_packet(
        &mut subscriber,
        &codec,
        new_packet(MessageType::Control, Payload::Control { action: ControlAction::Subscribe, data: json!({ "channel": "room-1" }) }),
    )
    .await;

    // Give the subscribe control frame a moment to be processed before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (mut publisher, _server_b) = connect_pair(state).await;
    write_packet(&mut publisher, &codec, auth_packet("acme")).await;
    let _ack = read_packet(&mut publisher, &codec).await;
    write_packet(
        &mut publisher,
        &codec,
        new_packet(
            MessageType::Control,
            Payload::Control { action: ControlAction::Publish, data: json!({ "channel": "room-1", "name": "hello", "data": { "text": "hi" } }) },
        ),
    )
    .await;

    let event = read_packet(&mut subscriber, &codec).await;
    match event.payload {
        Payload::Event { name, data } => {
            assert_eq!(name, "hello");
            assert_eq!(data.get("text").and_then(|v| v.as_str()), Some("hi"));
        }
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn subscribe_with_from_history_replays_the_requested_tail() {
    let state = build_state().await;
    let codec = Codec::new(state.config.codec);

    let (mut publisher, _server_a) = connect_pair(state.clone()).await;
    write_packet(&mut publisher, &codec, auth_packet("acme")).await;
    let _ack = read_packet(&mut publisher, &codec).await;

    for letter in ["a", "b", "c", "d", "e"] {
        write_packet(
            &mut publisher,
            &codec,
            new_packet(
                MessageType::Control,
                Payload::Control { action: ControlAction::Publish, data: json!({ "channel": "room-1", "name": letter, "data": {} }) },
            ),
        )
        .await;
    }
    // Publishes are control frames with no ack; give the reader loop time to
    // apply all five before the late subscriber joins.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (mut subscriber, _server_b) = connect_pair(state).await;
    write_packet(&mut subscriber, &codec, auth_packet("acme")).await;
    let _ack = read_packet(&mut subscriber, &codec).await;
    write_packet(
        &mut subscriber,
        &codec,
        new_packet(MessageType::Control, Payload::Control { action: ControlAction::Subscribe, data: json!({ "channel": "room-1", "from_history": 3 }) }),
    )
    .await;

    for expected in ["c", "d", "e"] {
        let replayed = read_packet(&mut subscriber, &codec).await;
        match replayed.payload {
            Payload::Event { name, .. } => assert_eq!(name, expected),
            other => panic!("expected replayed event {expected:?}, got {other:?}"),
        }
    }

    write_packet(
        &mut publisher,
        &codec,
        new_packet(MessageType::Control, Payload::Control { action: ControlAction::Publish, data: json!({ "channel": "room-1", "name": "f", "data": {} }) }),
    )
    .await;

    let live = read_packet(&mut subscriber, &codec).await;
    match live.payload {
        Payload::Event { name, .. } => assert_eq!(name, "f"),
        other => panic!("expected live event \"f\", got {other:?}"),
    }
}
