// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire rendering and parsing for [`PacketHeader`]: a
//! semicolon-delimited `key:value` ASCII string with a fixed key order.

use std::str::FromStr;

use crate::config::{CompressionKind, EncryptionKind};
use crate::error::CoreError;

use super::packet::{Flags, MessageType, PacketHeader, Version};

const KEY_ID: &str = "id";
const KEY_TYPE: &str = "type";
const KEY_TS: &str = "ts";
const KEY_VER: &str = "ver";
const KEY_PRI: &str = "pri";
const KEY_TTL: &str = "ttl";
const KEY_SRC: &str = "src";
const KEY_DST: &str = "dst";
const KEY_CID: &str = "cid";
const KEY_FLAGS: &str = "flags";
const KEY_CS: &str = "cs";
const KEY_COMP: &str = "comp";
const KEY_ENC: &str = "enc";

fn compression_str(kind: CompressionKind) -> &'static str {
    match kind {
        CompressionKind::None => "none",
        CompressionKind::Gzip => "gzip",
        CompressionKind::Deflate => "deflate",
        CompressionKind::Br => "br",
    }
}

fn compression_from_str(s: &str) -> Result<CompressionKind, CoreError> {
    match s {
        "none" => Ok(CompressionKind::None),
        "gzip" => Ok(CompressionKind::Gzip),
        "deflate" => Ok(CompressionKind::Deflate),
        "br" => Ok(CompressionKind::Br),
        _ => Err(CoreError::InvalidFormat),
    }
}

fn encryption_str(kind: EncryptionKind) -> &'static str {
    match kind {
        EncryptionKind::None => "none",
        EncryptionKind::Aes128 => "aes128",
        EncryptionKind::Aes256 => "aes256",
    }
}

fn encryption_from_str(s: &str) -> Result<EncryptionKind, CoreError> {
    match s {
        "none" => Ok(EncryptionKind::None),
        "aes128" => Ok(EncryptionKind::Aes128),
        "aes256" => Ok(EncryptionKind::Aes256),
        _ => Err(CoreError::InvalidFormat),
    }
}

impl PacketHeader {
    /// Renders the header to its wire form. When `checksum_override` is
    /// `None` the `cs` field is omitted entirely — this is what the codec
    /// hashes over before it has computed the checksum. `self.checksum` is
    /// never consulted here; the caller always passes the value explicitly.
    pub fn render(&self, checksum_override: Option<&str>) -> String {
        let mut parts = Vec::with_capacity(13);
        parts.push(format!("{KEY_ID}:{}", self.id));
        parts.push(format!("{KEY_TYPE}:{}", self.message_type.as_str()));
        parts.push(format!("{KEY_TS}:{}", self.timestamp_ms));
        parts.push(format!("{KEY_VER}:{}", self.version));
        if let Some(p) = self.priority {
            parts.push(format!("{KEY_PRI}:{p}"));
        }
        if let Some(t) = self.ttl {
            parts.push(format!("{KEY_TTL}:{t}"));
        }
        if let Some(ref s) = self.source {
            parts.push(format!("{KEY_SRC}:{s}"));
        }
        if let Some(ref d) = self.destination {
            parts.push(format!("{KEY_DST}:{d}"));
        }
        if let Some(ref c) = self.correlation_id {
            parts.push(format!("{KEY_CID}:{c}"));
        }
        parts.push(format!("{KEY_FLAGS}:{}", self.flags.bits()));
        if let Some(cs) = checksum_override {
            parts.push(format!("{KEY_CS}:{cs}"));
        }
        parts.push(format!("{KEY_COMP}:{}", compression_str(self.compression)));
        parts.push(format!("{KEY_ENC}:{}", encryption_str(self.encryption)));
        parts.join(";")
    }

    /// Parses a header string produced by [`Self::render`]. Any missing
    /// required key, an unparsable version, or a stray key yields
    /// [`CoreError::InvalidMessage`]/[`CoreError::InvalidFormat`].
    pub fn from_wire_str(s: &str) -> Result<Self, CoreError> {
        let mut id = None;
        let mut message_type = None;
        let mut timestamp_ms = None;
        let mut version = None;
        let mut priority = None;
        let mut ttl = None;
        let mut source = None;
        let mut destination = None;
        let mut correlation_id = None;
        let mut flags = None;
        let mut checksum = None;
        let mut compression = CompressionKind::None;
        let mut encryption = EncryptionKind::None;

        for field in s.split(';') {
            if field.is_empty() {
                continue;
            }
            let (key, value) = field.split_once(':').ok_or(CoreError::InvalidFormat)?;
            match key {
                KEY_ID => id = Some(value.to_owned()),
                KEY_TYPE => message_type = Some(MessageType::from_str(value)?),
                KEY_TS => timestamp_ms = Some(value.parse::<u64>().map_err(|_| CoreError::InvalidFormat)?),
                KEY_VER => version = Some(Version::from_str(value)?),
                KEY_PRI => priority = Some(value.parse::<u8>().map_err(|_| CoreError::InvalidFormat)?),
                KEY_TTL => ttl = Some(value.parse::<u32>().map_err(|_| CoreError::InvalidFormat)?),
                KEY_SRC => source = Some(value.to_owned()),
                KEY_DST => destination = Some(value.to_owned()),
                KEY_CID => correlation_id = Some(value.to_owned()),
                KEY_FLAGS => {
                    let bits = value.parse::<u16>().map_err(|_| CoreError::InvalidFormat)?;
                    flags = Some(Flags::from_bits_truncate(bits));
                }
                KEY_CS => checksum = Some(value.to_owned()),
                KEY_COMP => compression = compression_from_str(value)?,
                KEY_ENC => encryption = encryption_from_str(value)?,
                _ => return Err(CoreError::InvalidFormat),
            }
        }

        Ok(PacketHeader {
            id: id.ok_or(CoreError::InvalidMessage)?,
            message_type: message_type.ok_or(CoreError::InvalidMessage)?,
            timestamp_ms: timestamp_ms.ok_or(CoreError::InvalidMessage)?,
            version: version.ok_or(CoreError::InvalidMessage)?,
            priority,
            ttl,
            source,
            destination,
            correlation_id,
            flags: flags.unwrap_or_else(Flags::empty),
            checksum,
            compression,
            encryption,
        })
    }
}

#[cfg(test)]
#[path = "header_tests.rs"]
mod tests;
