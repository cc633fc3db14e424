// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: one entry per open socket, indexed by
//! connection id and by tenant, each guarded by its own `DashMap` shard
//! rather than a single global lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::Packet;
use crate::ids::{ChannelId, ConnectionId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Open,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Valid forward transitions: `Handshaking -> Open`,
    /// `Open -> Draining`, `{Open,Draining} -> Closed`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Handshaking, Open) | (Handshaking, Closed) | (Open, Draining) | (Open, Closed) | (Draining, Closed)
        )
    }
}

/// Outbound sender half held by the registry; the connection's writer task
/// owns the receiver and drains it onto the socket.
pub type OutboundSender = mpsc::Sender<Packet>;

pub struct Connection {
    pub id: ConnectionId,
    pub tenant_id: Option<TenantId>,
    pub state: ConnectionState,
    pub subscriptions: HashSet<ChannelId>,
    /// `(channelId, userId)` pairs this connection holds presence for, so
    /// teardown can emit a `leave` for each without the caller having to
    /// track it separately.
    pub presences: HashSet<(ChannelId, UserId)>,
    pub connected_at: Instant,
    pub outbound: OutboundSender,
    /// Cancelled to force this single connection's reader/writer tasks down,
    /// independent of the server-wide shutdown token it was derived from
    /// (heartbeat eviction, tenant suspension).
    pub cancel: CancellationToken,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: OutboundSender, cancel: CancellationToken) -> Self {
        Self {
            id,
            tenant_id: None,
            state: ConnectionState::Handshaking,
            subscriptions: HashSet::new(),
            presences: HashSet::new(),
            connected_at: Instant::now(),
            outbound,
            cancel,
        }
    }
}

/// Registry error: attempted an invalid state transition or operated on an
/// unknown connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NotFound,
    InvalidTransition,
}

/// Shared table of live connections. Looked up by id for direct delivery and
/// by tenant for fan-out admin operations (e.g. forced tenant suspension).
pub struct ConnectionRegistry {
    by_id: DashMap<ConnectionId, Connection>,
    by_tenant: DashMap<TenantId, HashSet<ConnectionId>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self { by_id: DashMap::new(), by_tenant: DashMap::new() }
    }

    pub fn insert(&self, connection: Connection) {
        let id = connection.id;
        debug!(connection_id = %id, "connection registered");
        self.by_id.insert(id, connection);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.by_id.remove(id).map(|(_, conn)| conn);
        if let Some(conn) = &removed {
            if let Some(tenant_id) = &conn.tenant_id {
                if let Some(mut set) = self.by_tenant.get_mut(tenant_id) {
                    set.remove(id);
                }
            }
        }
        removed
    }

    pub fn set_tenant(&self, id: &ConnectionId, tenant_id: TenantId) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        entry.tenant_id = Some(tenant_id.clone());
        drop(entry);
        self.by_tenant.entry(tenant_id).or_default().insert(*id);
        Ok(())
    }

    pub fn transition(&self, id: &ConnectionId, next: ConnectionState) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        if !entry.state.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition);
        }
        entry.state = next;
        Ok(())
    }

    pub fn add_subscription(&self, id: &ConnectionId, channel: ChannelId) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        entry.subscriptions.insert(channel);
        Ok(())
    }

    pub fn remove_subscription(&self, id: &ConnectionId, channel: &ChannelId) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        entry.subscriptions.remove(channel);
        Ok(())
    }

    pub fn add_presence(&self, id: &ConnectionId, channel: ChannelId, user_id: UserId) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        entry.presences.insert((channel, user_id));
        Ok(())
    }

    pub fn remove_presence(&self, id: &ConnectionId, channel: &ChannelId, user_id: &UserId) -> Result<(), RegistryError> {
        let mut entry = self.by_id.get_mut(id).ok_or(RegistryError::NotFound)?;
        entry.presences.remove(&(channel.clone(), user_id.clone()));
        Ok(())
    }

    pub fn state_of(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.by_id.get(id).map(|e| e.state)
    }

    pub fn outbound_of(&self, id: &ConnectionId) -> Option<OutboundSender> {
        self.by_id.get(id).map(|e| e.outbound.clone())
    }

    pub fn connections_for_tenant(&self, tenant_id: &TenantId) -> Vec<ConnectionId> {
        self.by_tenant.get(tenant_id).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Cancels the connection's own cancellation token, forcing its
    /// reader/writer tasks to tear down without waiting on the client.
    /// Does not remove the registry entry; the connection's own teardown
    /// path does that once its tasks observe the cancellation.
    pub fn force_close(&self, id: &ConnectionId) {
        if let Some(entry) = self.by_id.get(id) {
            entry.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub type SharedRegistry = Arc<ConnectionRegistry>;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
