// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection driver. One reader task per connection
//! decodes frames via the [`Codec`] and routes them by message type; one
//! writer task drains that connection's bounded outbound queue, with a
//! `tokio::select!` over the socket, the ping timer, and `cancel.cancelled()`
//! driving the reader side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::admission::{AdmissionLayer, ResolutionContext, TenantContext, UsageMetric};
use crate::channel::ChannelRouter;
use crate::codec::{Codec, ControlAction, MessageType, Packet, PacketHeader, Payload};
use crate::config::CoreConfig;
use crate::error::{CoreError, ErrorBody};
use crate::heartbeat::HeartbeatManager;
use crate::ids::{ChannelId, ConnectionId, UserId};
use crate::presence::{PresenceStatus, PresenceTracker};
use crate::registry::{Connection, ConnectionRegistry, ConnectionState};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The shared collaborators every connection's dispatch loop needs. One
/// instance is built in `server.rs` and cloned (via `Arc`) per connection.
pub struct SharedState {
    pub config: CoreConfig,
    pub codec: Arc<Codec>,
    pub registry: Arc<ConnectionRegistry>,
    pub channels: Arc<ChannelRouter>,
    pub presence: Arc<PresenceTracker>,
    pub heartbeat: Arc<HeartbeatManager>,
    pub admission: Arc<AdmissionLayer>,
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn new_packet(message_type: MessageType, payload: Payload) -> Packet {
    Packet::new(PacketHeader::new(uuid::Uuid::new_v4().to_string(), message_type, now_ms()), payload)
}

async fn read_frame(reader: &mut OwnedReadHalf, max_frame_bytes: u32) -> Result<Vec<u8>, CoreError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|_| CoreError::InvalidFormat)?;
    let header_len = u32::from_be_bytes(len_buf);

    let mut header_bytes = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_bytes).await.map_err(|_| CoreError::InvalidFormat)?;

    reader.read_exact(&mut len_buf).await.map_err(|_| CoreError::InvalidFormat)?;
    let payload_len = u32::from_be_bytes(len_buf);

    let total = 8u64 + header_len as u64 + payload_len as u64;
    if total > max_frame_bytes as u64 {
        return Err(CoreError::MessageTooLarge);
    }

    let mut payload_bytes = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload_bytes).await.map_err(|_| CoreError::InvalidFormat)?;

    let mut frame = Vec::with_capacity(total as usize);
    frame.extend_from_slice(&header_len.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(&payload_len.to_be_bytes());
    frame.extend_from_slice(&payload_bytes);
    Ok(frame)
}

/// Fields pulled out of the handshake's `Control::Auth` payload and fed to
/// `TenantResolver` as a [`ResolutionContext`]. Kept alive for the duration
/// of the resolve call so the context can borrow from it.
#[derive(Default)]
struct HandshakeRequest {
    host: Option<String>,
    headers: HashMap<String, String>,
    path: String,
    query: HashMap<String, String>,
    jwt_claims: Option<serde_json::Value>,
    tenant_id: Option<String>,
}

fn string_map(value: &serde_json::Value, key: &str) -> HashMap<String, String> {
    value
        .get(key)
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned()))).collect())
        .unwrap_or_default()
}

fn parse_handshake(data: &serde_json::Value) -> HandshakeRequest {
    HandshakeRequest {
        host: data.get("host").and_then(|v| v.as_str()).map(str::to_owned),
        headers: string_map(data, "headers"),
        path: data.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
        query: string_map(data, "query"),
        jwt_claims: data.get("jwt_claims").cloned(),
        tenant_id: data.get("tenant_id").and_then(|v| v.as_str()).map(str::to_owned),
    }
}

async fn send_error(outbound: &mpsc::Sender<Packet>, error: CoreError, connection_id: ConnectionId) {
    let body = error.to_error_body(error.code());
    debug!(connection_id = %connection_id, code = error.code(), "sending error frame");
    let _ = outbound.send(new_packet(MessageType::Error, Payload::Error { body })).await;
}

/// Reads and admits the handshake frame. Returns the bound [`TenantContext`]
/// on success; the caller is responsible for closing the socket on error
/// since no connection has been registered yet.
async fn perform_handshake(reader: &mut OwnedReadHalf, state: &SharedState, connection_id: ConnectionId) -> Result<TenantContext, CoreError> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(reader, state.config.codec.max_frame_bytes))
        .await
        .map_err(|_| CoreError::Timeout)??;
    let packet = state.codec.decode(&frame)?;

    let Payload::Control { action: ControlAction::Auth, data } = packet.payload else {
        return Err(CoreError::InvalidMessage);
    };

    let handshake = parse_handshake(&data);
    let ctx = ResolutionContext {
        host: handshake.host.as_deref(),
        headers: &handshake.headers,
        path: &handshake.path,
        query: &handshake.query,
        jwt_claims: handshake.jwt_claims.as_ref(),
        custom_tenant_id: handshake.tenant_id.as_deref(),
    };

    state.admission.admit(connection_id, &ctx).await
}

/// Drains the connection's outbound queue onto the socket, in order.
async fn run_writer(mut writer: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Packet>, codec: Arc<Codec>, connection_id: ConnectionId) {
    while let Some(packet) = outbound_rx.recv().await {
        match codec.encode(&packet) {
            Ok(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(connection_id = %connection_id, error = %err, "failed to encode outbound packet"),
        }
    }
    debug!(connection_id = %connection_id, "writer task exiting");
}

/// Pumps one channel subscription's [`crate::channel::Outbox`] into the
/// connection's single outbound queue, refusing new deliveries once the
/// connection has moved to `Draining` ("complete in-flight, refuse
/// new", checked at the point of enqueue onto the outbound queue).
async fn run_subscription_forwarder(
    outbox: Arc<crate::channel::Outbox>,
    outbound: mpsc::Sender<Packet>,
    registry: Arc<ConnectionRegistry>,
    connection_id: ConnectionId,
) {
    loop {
        let (packet, lagged) = outbox.pop().await;
        if registry.state_of(&connection_id) == Some(ConnectionState::Draining) {
            continue;
        }
        if lagged {
            let lagged_packet = new_packet(MessageType::Event, Payload::Event { name: "lagged".to_owned(), data: serde_json::Value::Null });
            if outbound.send(lagged_packet).await.is_err() {
                return;
            }
        }
        if outbound.send(packet).await.is_err() {
            return;
        }
    }
}

async fn handle_control(
    action: ControlAction,
    data: serde_json::Value,
    state: &SharedState,
    tenant_context: &TenantContext,
    connection_id: ConnectionId,
    outbound: &mpsc::Sender<Packet>,
    forwarders: &mut HashMap<ChannelId, JoinHandle<()>>,
) -> Result<(), CoreError> {
    match action {
        ControlAction::Auth => Ok(()),
        ControlAction::Subscribe => {
            let channel_id = ChannelId::from(data.get("channel").and_then(|v| v.as_str()).ok_or(CoreError::InvalidMessage)?);
            let from_history = data.get("from_history").and_then(|v| v.as_u64());

            state.registry.add_subscription(&connection_id, channel_id.clone()).map_err(|_| CoreError::SubscriptionFailed)?;

            // Replay the requested history tail before marking the subscriber
            // live, so it sees a contiguous prefix of past events followed by
            // everything published from this point on, with no gap or
            // duplicate at the boundary.
            if let Some(n) = from_history {
                if let Some(channel) = state.channels.get(&channel_id) {
                    let latest_seq = channel.latest_seq().await;
                    let since = latest_seq.saturating_sub(n).saturating_sub(1);
                    let (entries, _gap) = channel.history_since(since).await;
                    for entry in entries {
                        if outbound.send(entry.item).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }

            let outbox = state.channels.subscribe(&channel_id, connection_id).await;
            let handle = tokio::spawn(run_subscription_forwarder(outbox, outbound.clone(), state.registry.clone(), connection_id));
            if let Some(previous) = forwarders.insert(channel_id, handle) {
                previous.abort();
            }
            Ok(())
        }
        ControlAction::Unsubscribe => {
            let channel_id = ChannelId::from(data.get("channel").and_then(|v| v.as_str()).ok_or(CoreError::InvalidMessage)?);
            let _ = state.registry.remove_subscription(&connection_id, &channel_id);
            state.channels.unsubscribe(&channel_id, &connection_id).await;
            state.channels.remove_if_empty(&channel_id).await;
            if let Some(handle) = forwarders.remove(&channel_id) {
                handle.abort();
            }
            Ok(())
        }
        ControlAction::Publish => {
            let channel_id = ChannelId::from(data.get("channel").and_then(|v| v.as_str()).ok_or(CoreError::InvalidMessage)?);
            let name = data.get("name").and_then(|v| v.as_str()).unwrap_or("message").to_owned();
            let body = data.get("data").cloned().unwrap_or(serde_json::Value::Null);

            state.admission.enforce_rate(
                tenant_context.tenant_id(),
                tenant_context.tenant.plan,
                tenant_context.tenant.limits.max_behaviors_per_minute,
                Some(channel_id.0.as_str()),
                now_ms() as i64,
            )?;
            state
                .admission
                .enforce_usage(tenant_context.tenant_id(), &tenant_context.tenant.limits, UsageMetric::ApiCalls, now_ms() as i64)
                .await?;

            state.channels.publish(&channel_id, new_packet(MessageType::Event, Payload::Event { name, data: body })).await?;
            Ok(())
        }
        ControlAction::Presence => {
            let channel_id = ChannelId::from(data.get("channel").and_then(|v| v.as_str()).ok_or(CoreError::InvalidMessage)?);
            let user_id = UserId::from(data.get("user_id").and_then(|v| v.as_str()).ok_or(CoreError::InvalidMessage)?);
            let presence_action = data.get("action").and_then(|v| v.as_str()).unwrap_or("update");
            let metadata = data.get("metadata").cloned().unwrap_or(serde_json::Value::Null);
            let now = now_ms();

            match presence_action {
                "join" => {
                    state.presence.join(&state.channels, &channel_id, user_id.clone(), connection_id, metadata, now).await;
                    let _ = state.registry.add_presence(&connection_id, channel_id, user_id);
                }
                "leave" => {
                    state.presence.leave(&state.channels, &channel_id, &user_id, &connection_id, now).await;
                    let _ = state.registry.remove_presence(&connection_id, &channel_id, &user_id);
                }
                _ => {
                    let status = match data.get("status").and_then(|v| v.as_str()) {
                        Some("online") => PresenceStatus::Online,
                        Some("away") => PresenceStatus::Away,
                        Some("offline") => PresenceStatus::Offline,
                        _ => PresenceStatus::Online,
                    };
                    state.presence.update(&state.channels, &channel_id, &user_id, &connection_id, status, Some(metadata), now).await;
                }
            }
            Ok(())
        }
    }
}

async fn handle_inbound_packet(
    packet: Packet,
    state: &SharedState,
    tenant_context: &TenantContext,
    connection_id: ConnectionId,
    outbound: &mpsc::Sender<Packet>,
    forwarders: &mut HashMap<ChannelId, JoinHandle<()>>,
) -> Result<(), CoreError> {
    match packet.payload {
        Payload::Control { action, data } => {
            handle_control(action, data, state, tenant_context, connection_id, outbound, forwarders).await
        }
        Payload::Empty if packet.header.message_type == MessageType::Ping => {
            let _ = outbound.send(new_packet(MessageType::Pong, Payload::Empty)).await;
            Ok(())
        }
        Payload::Empty if packet.header.message_type == MessageType::Pong => {
            state.heartbeat.record_pong(&connection_id);
            Ok(())
        }
        _ => Err(CoreError::InvalidMessage),
    }
}

async fn run_reader(
    mut reader: OwnedReadHalf,
    outbound: mpsc::Sender<Packet>,
    state: Arc<SharedState>,
    tenant_context: TenantContext,
    connection_id: ConnectionId,
    cancel: CancellationToken,
) {
    let mut forwarders: HashMap<ChannelId, JoinHandle<()>> = HashMap::new();
    let mut ping_ticker = tokio::time::interval(state.config.heartbeat.interval());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ping_ticker.tick() => {
                if state.heartbeat.due_for_ping(&connection_id) {
                    state.heartbeat.mark_ping_sent(&connection_id);
                    if outbound.send(new_packet(MessageType::Ping, Payload::Empty)).await.is_err() {
                        break;
                    }
                }
            }
            frame = read_frame(&mut reader, state.config.codec.max_frame_bytes) => {
                let bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(_) => break,
                };
                match state.codec.decode(&bytes) {
                    Ok(packet) => {
                        if let Err(err) = handle_inbound_packet(packet, &state, &tenant_context, connection_id, &outbound, &mut forwarders).await {
                            send_error(&outbound, err, connection_id).await;
                            if err.closes_connection() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        send_error(&outbound, err, connection_id).await;
                        if err.closes_connection() {
                            break;
                        }
                    }
                }
            }
        }
    }

    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
}

/// Runs one accepted connection end to end: handshake, registration, and
/// the reader/writer task pair, until the socket closes or `cancel` fires.
pub async fn handle_connection(stream: TcpStream, state: Arc<SharedState>, cancel: CancellationToken) {
    let connection_id = ConnectionId::new();
    let (mut reader, writer) = stream.into_split();

    let tenant_context = match perform_handshake(&mut reader, &state, connection_id).await {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(connection_id = %connection_id, error = %err, "handshake failed");
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<Packet>(state.config.channel.subscriber_queue_depth);

    // A child of the server-wide shutdown token: cancelling the parent
    // cancels every connection, but this connection can also be cancelled
    // on its own (heartbeat eviction, tenant suspension) without touching
    // anyone else's.
    let connection_cancel = cancel.child_token();

    state.registry.insert(Connection::new(connection_id, outbound_tx.clone(), connection_cancel.clone()));
    let _ = state.registry.set_tenant(&connection_id, tenant_context.tenant_id().clone());
    let _ = state.registry.transition(&connection_id, ConnectionState::Open);
    state.heartbeat.register(connection_id);

    let writer_handle = tokio::spawn(run_writer(writer, outbound_rx, state.codec.clone(), connection_id));

    let _ = outbound_tx
        .send(new_packet(
            MessageType::Control,
            Payload::Control { action: ControlAction::Auth, data: json!({ "status": "ok", "tenant_id": tenant_context.tenant_id().to_string() }) },
        ))
        .await;

    run_reader(reader, outbound_tx, state.clone(), tenant_context, connection_id, connection_cancel).await;

    // Drop every remaining outbound-queue sender clone (the one held by the
    // registry entry) before waiting on the writer task, so its receiver
    // observes the channel closing and exits instead of waiting forever.
    if let Some(connection) = state.registry.remove(&connection_id) {
        for (channel_id, user_id) in connection.presences {
            state.presence.leave(&state.channels, &channel_id, &user_id, &connection_id, now_ms()).await;
        }
        for channel_id in connection.subscriptions {
            state.channels.unsubscribe(&channel_id, &connection_id).await;
            state.channels.remove_if_empty(&channel_id).await;
        }
    }
    state.heartbeat.remove(&connection_id);

    let _ = writer_handle.await;
    debug!(connection_id = %connection_id, "connection closed");
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
