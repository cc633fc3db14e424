// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Packet, header, and version types for the binary wire protocol.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::{CompressionKind, EncryptionKind};
use crate::error::CoreError;

bitflags! {
    /// Per-packet bitfield. `COMPRESSED`/`ENCRYPTED`/`CHECKSUM` are set by the
    /// codec itself during encode; the rest are caller-supplied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        const COMPRESSED = 0x0001;
        const ENCRYPTED  = 0x0002;
        const CHECKSUM   = 0x0004;
        const URGENT     = 0x0008;
        const NO_ACK     = 0x0010;
        const BROADCAST  = 0x0020;
        const RETRY      = 0x0040;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

/// Wire protocol version. The codec only accepts `1.x` frames; anything else
/// fails decode with [`CoreError::InvalidVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const CURRENT: Version = Version { major: 1, minor: 0, patch: 0 };
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let major: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or(CoreError::InvalidFormat)?;
        let minor: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or(CoreError::InvalidFormat)?;
        let patch: u8 = match parts.next() {
            Some(p) => p.parse().map_err(|_| CoreError::InvalidFormat)?,
            None => 0,
        };
        Ok(Version { major, minor, patch })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Ping,
    Pong,
    Event,
    Control,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Event => "event",
            Self::Control => "control",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "event" => Ok(Self::Event),
            "control" => Ok(Self::Control),
            "error" => Ok(Self::Error),
            _ => Err(CoreError::InvalidMessage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
    Publish,
    Presence,
    Auth,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
            Self::Presence => "presence",
            Self::Auth => "auth",
        }
    }
}

impl std::str::FromStr for ControlAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            "publish" => Ok(Self::Publish),
            "presence" => Ok(Self::Presence),
            "auth" => Ok(Self::Auth),
            _ => Err(CoreError::InvalidMessage),
        }
    }
}

/// Header metadata carried alongside every frame. Rendered to the wire as a
/// semicolon-delimited `key:value` ASCII string, never as JSON — see
/// [`super::header`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp_ms: u64,
    pub version: Version,
    pub priority: Option<u8>,
    pub ttl: Option<u32>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub correlation_id: Option<String>,
    pub flags: Flags,
    pub checksum: Option<String>,
    pub compression: CompressionKind,
    pub encryption: EncryptionKind,
}

impl PacketHeader {
    pub fn new(id: impl Into<String>, message_type: MessageType, timestamp_ms: u64) -> Self {
        Self {
            id: id.into(),
            message_type,
            timestamp_ms,
            version: Version::CURRENT,
            priority: None,
            ttl: None,
            source: None,
            destination: None,
            correlation_id: None,
            flags: Flags::empty(),
            checksum: None,
            compression: CompressionKind::None,
            encryption: EncryptionKind::None,
        }
    }
}

/// Message body. Serialized with serde's external tag (`"type"` + `"data"`
/// field pair by default) before any compression/encryption is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Event { name: String, data: serde_json::Value },
    Control { action: ControlAction, data: serde_json::Value },
    Error { body: crate::error::ErrorBody },
    Empty,
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Payload) -> Self {
        Self { header, payload }
    }
}
