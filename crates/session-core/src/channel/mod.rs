// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel fan-out and pub/sub. Each [`Channel`] owns its own
//! subscriber table, history ring, and presence set behind one `RwLock`, so
//! contention on one channel never blocks another.

mod backpressure;
mod history;
mod presence;

pub use backpressure::{Outbox, PushOutcome};
pub use history::{HistoryEntry, HistoryRing};
pub use presence::{PresenceEvent, PresenceKind, PresenceRecord, PresenceSnapshot, PresenceStats, PresenceStatus};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::codec::Packet;
use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::ids::{ChannelId, ConnectionId, UserId};

use presence::PresenceKey;

struct ChannelInner {
    subscribers: HashMap<ConnectionId, Arc<Outbox>>,
    history: HistoryRing<Packet>,
    presence: HashMap<PresenceKey, PresenceRecord>,
    presence_events: HistoryRing<PresenceEvent>,
}

/// A single pub/sub topic: its subscriber set, bounded history, and
/// presence roster, all behind one lock so a subscribe observes a
/// consistent snapshot of all three together.
pub struct Channel {
    id: ChannelId,
    config: ChannelConfig,
    inner: RwLock<ChannelInner>,
}

impl Channel {
    fn new(id: ChannelId, config: ChannelConfig) -> Self {
        let inner = ChannelInner {
            subscribers: HashMap::new(),
            history: HistoryRing::new(config.max_history_size),
            presence: HashMap::new(),
            presence_events: HistoryRing::new(config.max_history_size),
        };
        Self { id, config, inner: RwLock::new(inner) }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub async fn subscribe(&self, connection_id: ConnectionId) -> Arc<Outbox> {
        let mut inner = self.inner.write().await;
        let outbox = Arc::new(Outbox::new(
            self.config.subscriber_queue_depth,
            self.config.backpressure,
            self.config.slow_consumer_timeout(),
        ));
        inner.subscribers.insert(connection_id, outbox.clone());
        debug!(channel = %self.id, connection_id = %connection_id, "subscribed");
        outbox
    }

    pub async fn unsubscribe(&self, connection_id: &ConnectionId) {
        let mut inner = self.inner.write().await;
        inner.subscribers.remove(connection_id);
        debug!(channel = %self.id, connection_id = %connection_id, "unsubscribed");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }

    /// Appends to history and fans the packet out to every current
    /// subscriber, applying each one's backpressure policy independently.
    /// Returns the assigned history sequence number.
    pub async fn publish(&self, packet: Packet) -> u64 {
        let (seq, outboxes) = {
            let mut inner = self.inner.write().await;
            let seq = inner.history.push(packet.clone());
            let outboxes: Vec<Arc<Outbox>> = inner.subscribers.values().cloned().collect();
            (seq, outboxes)
        };
        for outbox in outboxes {
            outbox.push(packet.clone()).await;
        }
        seq
    }

    /// History entries newer than `since`, and whether a gap was detected
    /// (the subscriber is too far behind to catch up from the ring alone).
    pub async fn history_since(&self, since: u64) -> (Vec<HistoryEntry<Packet>>, bool) {
        self.inner.read().await.history.since(since)
    }

    pub async fn latest_seq(&self) -> u64 {
        self.inner.read().await.history.latest_seq()
    }

    /// Records a join for `(user_id, connection_id)`, overwriting any
    /// existing record for that tuple (a re-join after a stale entry was
    /// never cleaned up).
    pub async fn presence_join(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        metadata: serde_json::Value,
        now_ms: u64,
    ) -> PresenceEvent {
        let mut inner = self.inner.write().await;
        let record = PresenceRecord { user_id: user_id.clone(), connection_id, status: PresenceStatus::Online, metadata, updated_at_ms: now_ms };
        inner.presence.insert((user_id, connection_id), record.clone());
        let event = PresenceEvent { channel_id: self.id.clone(), kind: PresenceKind::Join, record };
        inner.presence_events.push(event.clone());
        event
    }

    pub async fn presence_leave(&self, user_id: &UserId, connection_id: &ConnectionId, now_ms: u64) -> Option<PresenceEvent> {
        let mut inner = self.inner.write().await;
        let mut record = inner.presence.remove(&(user_id.clone(), *connection_id))?;
        record.status = PresenceStatus::Offline;
        record.updated_at_ms = now_ms;
        let event = PresenceEvent { channel_id: self.id.clone(), kind: PresenceKind::Leave, record };
        inner.presence_events.push(event.clone());
        Some(event)
    }

    pub async fn presence_update(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        status: PresenceStatus,
        metadata: Option<serde_json::Value>,
        now_ms: u64,
    ) -> Option<PresenceEvent> {
        let mut inner = self.inner.write().await;
        let record = inner.presence.get_mut(&(user_id.clone(), *connection_id))?;
        record.status = status;
        record.updated_at_ms = now_ms;
        if let Some(metadata) = metadata {
            record.metadata = metadata;
        }
        let record = record.clone();
        let event = PresenceEvent { channel_id: self.id.clone(), kind: PresenceKind::Update, record };
        inner.presence_events.push(event.clone());
        Some(event)
    }

    /// Refreshes `updated_at_ms` for a tuple without changing its status, so
    /// a liveness heartbeat doesn't look like a status change in the diff
    /// log. Returns `false` if the tuple isn't present.
    pub async fn presence_heartbeat(&self, user_id: &UserId, connection_id: &ConnectionId, now_ms: u64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.presence.get_mut(&(user_id.clone(), *connection_id)) {
            Some(record) => {
                record.updated_at_ms = now_ms;
                true
            }
            None => false,
        }
    }

    pub async fn presence_state(&self) -> Vec<PresenceRecord> {
        self.inner.read().await.presence.values().cloned().collect()
    }

    pub async fn presence_stats(&self) -> PresenceStats {
        let inner = self.inner.read().await;
        let mut stats = PresenceStats { total: inner.presence.len(), ..Default::default() };
        for record in inner.presence.values() {
            match record.status {
                PresenceStatus::Online => stats.online += 1,
                PresenceStatus::Away => stats.away += 1,
                PresenceStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// Catch-up diff since `since_seq`, collapsing to at most one event per
    /// `(user, connection)` tuple (the most recent transition in the
    /// window). Returns the events and whether the ring had already evicted
    /// entries older than `since_seq` (callers should fall back to
    /// [`Self::presence_state`] in that case).
    pub async fn presence_diff(&self, since_seq: u64) -> (Vec<PresenceEvent>, bool) {
        let inner = self.inner.read().await;
        let (entries, gap) = inner.presence_events.since(since_seq);
        let mut collapsed: HashMap<PresenceKey, PresenceEvent> = HashMap::new();
        for entry in entries {
            let key = (entry.item.record.user_id.clone(), entry.item.record.connection_id);
            collapsed.insert(key, entry.item);
        }
        (collapsed.into_values().collect(), gap)
    }

    pub async fn presence_latest_seq(&self) -> u64 {
        self.inner.read().await.presence_events.latest_seq()
    }

    pub async fn presence_snapshot(&self) -> PresenceSnapshot {
        let inner = self.inner.read().await;
        PresenceSnapshot { channel_id: self.id.clone(), records: inner.presence.values().cloned().collect(), seq: inner.presence_events.latest_seq() }
    }

    pub async fn restore_presence_snapshot(&self, snapshot: PresenceSnapshot) {
        let mut inner = self.inner.write().await;
        inner.presence = snapshot.records.into_iter().map(|r| ((r.user_id.clone(), r.connection_id), r)).collect();
    }

    /// Drops presence tuples whose last update is older than
    /// `stale_after_ms`, as a backstop against connections that vanished
    /// without a clean leave.
    pub async fn presence_cleanup(&self, now_ms: u64, stale_after_ms: u64) -> Vec<PresenceEvent> {
        let mut inner = self.inner.write().await;
        let stale: Vec<PresenceKey> = inner
            .presence
            .iter()
            .filter(|(_, r)| now_ms.saturating_sub(r.updated_at_ms) > stale_after_ms)
            .map(|(key, _)| key.clone())
            .collect();
        let mut events = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(mut record) = inner.presence.remove(&key) {
                record.status = PresenceStatus::Offline;
                record.updated_at_ms = now_ms;
                let event = PresenceEvent { channel_id: self.id.clone(), kind: PresenceKind::Leave, record };
                inner.presence_events.push(event.clone());
                events.push(event);
            }
        }
        events
    }

    pub async fn is_presence_empty(&self) -> bool {
        self.inner.read().await.presence.is_empty()
    }
}

/// Registry of channels, created lazily on first subscribe/publish.
pub struct ChannelRouter {
    channels: DashMap<ChannelId, Arc<Channel>>,
    config: ChannelConfig,
}

impl ChannelRouter {
    pub fn new(config: ChannelConfig) -> Self {
        Self { channels: DashMap::new(), config }
    }

    pub fn get_or_create(&self, channel_id: &ChannelId) -> Arc<Channel> {
        self.channels
            .entry(channel_id.clone())
            .or_insert_with(|| Arc::new(Channel::new(channel_id.clone(), self.config)))
            .clone()
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(channel_id).map(|c| c.clone())
    }

    pub async fn subscribe(&self, channel_id: &ChannelId, connection_id: ConnectionId) -> Arc<Outbox> {
        self.get_or_create(channel_id).subscribe(connection_id).await
    }

    pub async fn unsubscribe(&self, channel_id: &ChannelId, connection_id: &ConnectionId) {
        if let Some(channel) = self.get(channel_id) {
            channel.unsubscribe(connection_id).await;
        }
    }

    pub async fn publish(&self, channel_id: &ChannelId, packet: Packet) -> Result<u64, CoreError> {
        let channel = self.get(channel_id).ok_or(CoreError::ChannelNotFound)?;
        Ok(channel.publish(packet).await)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Snapshot of currently known channel ids, used by the presence cleanup
    /// sweeper to decide which channels to scan each tick.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes a channel once it has no subscribers left. Cheap best-effort
    /// cleanup; callers that just unsubscribed the last member should call
    /// this to bound memory.
    pub async fn remove_if_empty(&self, channel_id: &ChannelId) {
        let empty = match self.channels.get(channel_id) {
            Some(channel) => channel.subscriber_count().await == 0 && channel.is_presence_empty().await,
            None => return,
        };
        if empty {
            self.channels.remove(channel_id);
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
