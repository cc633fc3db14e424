// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ping/pong liveness tracking. Each connection's own task drives
//! its ping cadence; [`HeartbeatManager`] holds the shared liveness table and
//! runs a sweeper that evicts connections whose pong is overdue.

mod state;

pub use state::{ConnectionLiveness, LivenessPhase};

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::HeartbeatConfig;
use crate::ids::ConnectionId;

/// Tracks liveness for every open connection and evicts ones that stop
/// answering pings. Shared behind an `Arc` across the accept loop and every
/// per-connection task.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    connections: DashMap<ConnectionId, ConnectionLiveness>,
    evictions: mpsc::UnboundedSender<ConnectionId>,
}

impl HeartbeatManager {
    /// Returns the manager and the receiving half of its eviction channel;
    /// the caller (typically [`crate::server`]) forwards evictions to the
    /// connection registry to force-close the socket.
    pub fn new(config: HeartbeatConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self { config, connections: DashMap::new(), evictions: tx });
        (manager, rx)
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn register(&self, id: ConnectionId) {
        self.connections.insert(id, ConnectionLiveness::new(Instant::now()));
    }

    pub fn remove(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Whether `interval` has elapsed since the connection's last ping (or
    /// registration, if no ping has been sent yet). The connection's own
    /// task polls this to decide when to emit its next ping frame.
    pub fn due_for_ping(&self, id: &ConnectionId) -> bool {
        let Some(entry) = self.connections.get(id) else { return false };
        let reference = entry.last_ping_at.unwrap_or(entry.last_pong_at);
        reference.elapsed() >= self.config.interval()
    }

    pub fn mark_ping_sent(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.mark_ping_sent(Instant::now());
        }
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.record_pong(Instant::now());
        }
    }

    /// Alive means a pong has been seen within `timeout` of now, regardless
    /// of which liveness phase the connection is currently in (an evicted
    /// connection's entry is removed outright, so this only distinguishes
    /// "present but stale" from "present and recent").
    pub fn is_alive(&self, id: &ConnectionId) -> bool {
        let Some(entry) = self.connections.get(id) else { return false };
        entry.last_pong_at.elapsed() <= self.config.timeout()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sweeps every `AwaitingPong` connection whose pong timeout has elapsed,
    /// recording a miss and evicting once `max_missed` is crossed. Runs until
    /// `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }
    }

    fn sweep_once(&self) {
        let timeout = self.config.timeout();
        let max_missed = self.config.max_missed;
        let mut evicted = Vec::new();

        for mut entry in self.connections.iter_mut() {
            if entry.phase != LivenessPhase::AwaitingPong {
                continue;
            }
            let Some(last_ping_at) = entry.last_ping_at else { continue };
            if last_ping_at.elapsed() < timeout {
                continue;
            }
            if entry.record_missed(max_missed) {
                evicted.push(*entry.key());
            } else {
                debug!(connection_id = %entry.key(), missed = entry.missed_count, "heartbeat missed");
            }
        }

        for id in evicted {
            self.connections.remove(&id);
            let _ = self.evictions.send(id);
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
