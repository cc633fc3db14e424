// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence tracking: the request-side API over the presence roster each
//! [`crate::channel::Channel`] owns alongside its subscriber table. Every
//! join/leave/update/cleanup transition is fanned out as an ordinary event
//! through [`ChannelRouter::publish`] (so subscribers get the same
//! history/backpressure semantics presence has always gotten for free) and
//! additionally broadcast on an out-of-band signal channel for listeners
//! that only care about presence, not the full event stream.

pub use crate::channel::{PresenceEvent, PresenceKind, PresenceRecord, PresenceSnapshot, PresenceStats, PresenceStatus};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::ChannelRouter;
use crate::codec::{MessageType, Packet, PacketHeader, Payload};
use crate::ids::{ChannelId, ConnectionId, UserId};

/// Default capacity of the `joined/left/updated/cleaned` signal channel.
/// Slow listeners fall behind and lose the oldest signals rather than
/// backpressuring presence writes; they should call `query`/`stats` to
/// resynchronize instead of relying on catching every signal.
const DEFAULT_SIGNAL_CAPACITY: usize = 1_024;

fn event_to_packet(event: &PresenceEvent, now_ms: u64) -> Packet {
    let header = PacketHeader::new(uuid::Uuid::new_v4().to_string(), MessageType::Event, now_ms);
    let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    Packet::new(header, Payload::Event { name: "presence".to_owned(), data })
}

pub struct PresenceTracker {
    signal_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(_history_capacity: usize) -> Self {
        let (signal_tx, _) = broadcast::channel(DEFAULT_SIGNAL_CAPACITY);
        Self { signal_tx }
    }

    /// Subscribes to `joined/left/updated/cleaned` signals. Delivery is
    /// at-most-once per transition: a lagging receiver misses signals
    /// rather than blocking the transition that produced them.
    pub fn subscribe_signal(&self) -> broadcast::Receiver<PresenceEvent> {
        self.signal_tx.subscribe()
    }

    fn signal(&self, event: &PresenceEvent) {
        let _ = self.signal_tx.send(event.clone());
    }

    pub async fn join(
        &self,
        router: &ChannelRouter,
        channel_id: &ChannelId,
        user_id: UserId,
        connection_id: ConnectionId,
        metadata: serde_json::Value,
        now_ms: u64,
    ) {
        let channel = router.get_or_create(channel_id);
        let event = channel.presence_join(user_id, connection_id, metadata, now_ms).await;
        self.signal(&event);
        let _ = router.publish(channel_id, event_to_packet(&event, now_ms)).await;
    }

    pub async fn leave(&self, router: &ChannelRouter, channel_id: &ChannelId, user_id: &UserId, connection_id: &ConnectionId, now_ms: u64) {
        let Some(channel) = router.get(channel_id) else { return };
        if let Some(event) = channel.presence_leave(user_id, connection_id, now_ms).await {
            self.signal(&event);
            let _ = router.publish(channel_id, event_to_packet(&event, now_ms)).await;
        }
    }

    pub async fn update(
        &self,
        router: &ChannelRouter,
        channel_id: &ChannelId,
        user_id: &UserId,
        connection_id: &ConnectionId,
        status: PresenceStatus,
        metadata: Option<serde_json::Value>,
        now_ms: u64,
    ) {
        let Some(channel) = router.get(channel_id) else { return };
        if let Some(event) = channel.presence_update(user_id, connection_id, status, metadata, now_ms).await {
            self.signal(&event);
            let _ = router.publish(channel_id, event_to_packet(&event, now_ms)).await;
        }
    }

    /// Refreshes liveness for a `(user, connection)` tuple without
    /// recording a status change. Returns `false` if the tuple wasn't
    /// present (the caller should `join` instead).
    pub async fn heartbeat(&self, router: &ChannelRouter, channel_id: &ChannelId, user_id: &UserId, connection_id: &ConnectionId, now_ms: u64) -> bool {
        match router.get(channel_id) {
            Some(channel) => channel.presence_heartbeat(user_id, connection_id, now_ms).await,
            None => false,
        }
    }

    /// Full presence roster for a channel.
    pub async fn query(&self, router: &ChannelRouter, channel_id: &ChannelId) -> Vec<PresenceRecord> {
        match router.get(channel_id) {
            Some(channel) => channel.presence_state().await,
            None => Vec::new(),
        }
    }

    /// Roster counts by status for a channel.
    pub async fn stats(&self, router: &ChannelRouter, channel_id: &ChannelId) -> PresenceStats {
        match router.get(channel_id) {
            Some(channel) => channel.presence_stats().await,
            None => PresenceStats::default(),
        }
    }

    pub async fn diff(&self, router: &ChannelRouter, channel_id: &ChannelId, since_seq: u64) -> (Vec<PresenceEvent>, bool) {
        match router.get(channel_id) {
            Some(channel) => channel.presence_diff(since_seq).await,
            None => (Vec::new(), false),
        }
    }

    /// Scans the given channels for presence entries that have gone stale
    /// (no update since `stale_after_ms` ago) and evicts them, publishing a
    /// `leave` event and a `cleaned` signal for each. `channel_ids` is
    /// re-queried by the caller on every tick rather than fixed at spawn
    /// time, since channels come and go as connections subscribe/unsubscribe.
    pub async fn sweep_stale(&self, router: &ChannelRouter, channel_ids: &[ChannelId], now_ms: u64, stale_after_ms: u64) {
        for channel_id in channel_ids {
            let Some(channel) = router.get(channel_id) else { continue };
            for event in channel.presence_cleanup(now_ms, stale_after_ms).await {
                self.signal(&event);
                let _ = router.publish(channel_id, event_to_packet(&event, now_ms)).await;
            }
        }
    }

    /// Periodically evicts users who went silent without a clean leave.
    /// `now_ms` is supplied by the caller rather than read from the clock
    /// directly, so the sweep cadence stays testable under `tokio::time::pause`.
    pub async fn run_cleanup_sweeper(
        self: Arc<Self>,
        router: Arc<ChannelRouter>,
        channel_ids: Vec<ChannelId>,
        sweep_interval: Duration,
        stale_after_ms: u64,
        now_ms_fn: impl Fn() -> u64 + Send + Sync + 'static,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("presence cleanup sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let now_ms = now_ms_fn();
                    self.sweep_stale(&router, &channel_ids, now_ms, stale_after_ms).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
