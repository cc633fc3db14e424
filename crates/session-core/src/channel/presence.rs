// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence record and event types. Owned by [`super::ChannelInner`]
//! alongside the subscriber table so a subscribe/publish/presence-change
//! all serialize through the same per-channel lock.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, ConnectionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// A user's presence within one channel via one connection. The same user
/// can hold independent presence on more than one connection (two open
/// tabs); the tuple `(user_id, connection_id)` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub status: PresenceStatus,
    pub metadata: serde_json::Value,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceKind {
    Join,
    Leave,
    Update,
}

/// A single join/leave/update transition, appended to the channel's
/// presence event ring and returned from a catch-up diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub channel_id: ChannelId,
    pub kind: PresenceKind,
    pub record: PresenceRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub channel_id: ChannelId,
    pub records: Vec<PresenceRecord>,
    pub seq: u64,
}

/// Roster counts by status, as returned by a `PresenceTracker::stats` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStats {
    pub total: usize,
    pub online: usize,
    pub away: usize,
    pub offline: usize,
}

pub(super) type PresenceKey = (UserId, ConnectionId);
