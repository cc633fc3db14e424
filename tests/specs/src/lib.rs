// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for end-to-end scenario tests. Builds a [`SharedState`]
//! wired the same way [`realtime_core::run`] wires it, binds an ephemeral
//! loopback listener, and provides frame read/write helpers for driving the
//! wire protocol the way a client would.

use std::sync::Arc;

use realtime_core::admission::{
    AdmissionLayer, InMemoryTenantRepository, InMemoryUsageStorage, PlanTier, ResolutionStrategy, Tenant, TenantLimits, TenantStatus,
};
use realtime_core::channel::ChannelRouter;
use realtime_core::codec::{Codec, ControlAction, MessageType, Packet, PacketHeader, Payload};
use realtime_core::config::CoreConfig;
use realtime_core::dispatch::SharedState;
use realtime_core::heartbeat::HeartbeatManager;
use realtime_core::ids::TenantId;
use realtime_core::presence::PresenceTracker;
use realtime_core::registry::ConnectionRegistry;
use realtime_core::server::serve_on;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// A tenant fixture with every field a scenario cares about spelled out at
/// the call site rather than buried in a default.
pub fn tenant(id: &str, plan: PlanTier, max_behaviors_per_minute: i64) -> Tenant {
    Tenant {
        id: TenantId::from(id),
        slug: id.to_owned(),
        plan,
        status: TenantStatus::Active,
        limits: TenantLimits { max_behaviors_per_minute, ..TenantLimits::default() },
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

/// A running server bound to an ephemeral loopback port, with its
/// `SharedState` kept around so scenarios can reach into the registry,
/// channels, or presence tracker directly alongside driving the wire
/// protocol.
pub struct Harness {
    pub state: Arc<SharedState>,
    pub addr: std::net::SocketAddr,
    pub shutdown: CancellationToken,
    serve_handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    /// Starts a server for `tenants` with `config` (port is always
    /// overridden to an ephemeral one).
    pub async fn start(mut config: CoreConfig, tenants: Vec<Tenant>) -> Harness {
        config.port = 0;
        config.host = "127.0.0.1".to_owned();

        let repository = InMemoryTenantRepository::new();
        for t in tenants {
            repository.upsert(t);
        }

        let (heartbeat, evictions) = HeartbeatManager::new(config.heartbeat);
        let admission = AdmissionLayer::new(
            Arc::new(repository),
            Arc::new(InMemoryUsageStorage::new()),
            config.admission.clone(),
            config.rate_limiter,
            vec![ResolutionStrategy::Header, ResolutionStrategy::Subdomain, ResolutionStrategy::Query],
        );

        let state = Arc::new(SharedState {
            codec: Arc::new(Codec::new(config.codec)),
            registry: Arc::new(ConnectionRegistry::new()),
            channels: Arc::new(ChannelRouter::new(config.channel)),
            presence: Arc::new(PresenceTracker::new(10_000)),
            heartbeat,
            admission: Arc::new(admission),
            config,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = CancellationToken::new();
        let serve_handle = tokio::spawn(serve_on(listener, state.clone(), evictions, shutdown.clone()));

        Harness { state, addr, shutdown, serve_handle }
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.state.config.codec)
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.expect("client connect")
    }

    /// Connects and completes the auth handshake for `tenant_id`, returning
    /// the socket positioned right after the auth ack.
    pub async fn connect_and_auth(&self, tenant_id: &str) -> TcpStream {
        let codec = self.codec();
        let mut stream = self.connect().await;
        write_packet(&mut stream, &codec, &auth_packet(tenant_id)).await;
        let ack = read_packet(&mut stream, &codec).await;
        match ack.payload {
            Payload::Control { action: ControlAction::Auth, data } => {
                assert_eq!(data.get("status").and_then(|v| v.as_str()), Some("ok"), "handshake should have been admitted");
            }
            other => panic!("expected auth ack, got {other:?}"),
        }
        stream
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.serve_handle.await;
    }
}

pub fn auth_packet(tenant_id: &str) -> Packet {
    Packet::new(
        PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Control, 0),
        Payload::Control { action: ControlAction::Auth, data: serde_json::json!({ "headers": { "X-Tenant-ID": tenant_id } }) },
    )
}

pub fn subscribe_packet(channel: &str, from_history: Option<u64>) -> Packet {
    let mut data = serde_json::json!({ "channel": channel });
    if let Some(n) = from_history {
        data["from_history"] = serde_json::json!(n);
    }
    Packet::new(
        PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Control, 0),
        Payload::Control { action: ControlAction::Subscribe, data },
    )
}

pub fn publish_packet(channel: &str, name: &str, body: serde_json::Value) -> Packet {
    Packet::new(
        PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Control, 0),
        Payload::Control { action: ControlAction::Publish, data: serde_json::json!({ "channel": channel, "name": name, "data": body }) },
    )
}

pub fn presence_packet(channel: &str, user_id: &str, action: &str, status: Option<&str>) -> Packet {
    let mut data = serde_json::json!({ "channel": channel, "user_id": user_id, "action": action });
    if let Some(s) = status {
        data["status"] = serde_json::json!(s);
    }
    Packet::new(
        PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Control, 0),
        Payload::Control { action: ControlAction::Presence, data },
    )
}

pub async fn write_packet(stream: &mut TcpStream, codec: &Codec, packet: &Packet) {
    let bytes = codec.encode(packet).expect("encode packet");
    stream.write_all(&bytes).await.expect("write frame");
}

/// Writes a frame whose payload bytes have been corrupted after encoding,
/// so the header's checksum (computed over the pre-corruption payload) no
/// longer matches on the receiving side.
pub async fn write_tampered_packet(stream: &mut TcpStream, codec: &Codec, packet: &Packet) {
    let mut bytes = codec.encode(packet).expect("encode packet");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    stream.write_all(&bytes).await.expect("write tampered frame");
}

pub async fn read_packet(stream: &mut TcpStream, codec: &Codec) -> Packet {
    let frame = read_frame_bytes(stream).await;
    codec.decode(&frame).expect("decode frame")
}

/// Reads one frame without decoding it, so callers can assert on decode
/// failure themselves (used by the codec-tamper scenario).
pub async fn read_frame_bytes(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read header len");
    let header_len = u32::from_be_bytes(len_buf) as usize;
    let mut header_bytes = vec![0u8; header_len];
    stream.read_exact(&mut header_bytes).await.expect("read header");
    stream.read_exact(&mut len_buf).await.expect("read payload len");
    let payload_len = u32::from_be_bytes(len_buf) as usize;
    let mut payload_bytes = vec![0u8; payload_len];
    stream.read_exact(&mut payload_bytes).await.expect("read payload");

    let mut frame = Vec::with_capacity(8 + header_len + payload_len);
    frame.extend_from_slice(&(header_len as u32).to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
    frame.extend_from_slice(&payload_bytes);
    frame
}
