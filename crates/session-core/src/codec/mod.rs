// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary wire codec: `u32 header_len ‖ header ‖ u32 payload_len ‖
//! payload`, with optional compression, encryption, and checksum applied to
//! the payload in that order on encode and unwound in reverse on decode.

mod checksum;
mod compression;
mod encryption;
mod header;
mod packet;
mod stats;

pub use encryption::PayloadCipher;
pub use packet::{ControlAction, Flags, MessageType, Packet, PacketHeader, Payload, Version};
pub use stats::{CodecStats, CodecStatsSnapshot};

use std::sync::Arc;
use std::time::Instant;

use crate::config::CodecConfig;
use crate::error::CoreError;

use encryption::AesGcmCipher;

const FRAME_LEN_PREFIX_BYTES: usize = 4;

/// Stateless (beyond stats and an optional symmetric key) encoder/decoder
/// for the wire protocol. One [`Codec`] is shared across every connection.
pub struct Codec {
    config: CodecConfig,
    key: Option<Vec<u8>>,
    cipher: Arc<dyn PayloadCipher>,
    stats: CodecStats,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self::with_cipher(config, Arc::new(AesGcmCipher::new()))
    }

    pub fn with_cipher(config: CodecConfig, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { config, key: None, cipher, stats: CodecStats::default() }
    }

    /// Sets the symmetric key used when `encryption` is not `none`. Required
    /// before calling [`Self::encode`]/[`Self::decode`] if encryption is
    /// configured; otherwise encode/decode fail with `INTERNAL_ERROR`.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn stats(&self) -> CodecStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CoreError> {
        let start = Instant::now();
        let result = self.encode_inner(packet);
        match &result {
            Ok(bytes) => self.stats.record_encode(bytes.len(), start.elapsed()),
            Err(_) => self.stats.record_encode_error(),
        }
        result
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, CoreError> {
        let start = Instant::now();
        let result = self.decode_inner(bytes);
        match &result {
            Ok(_) => self.stats.record_decode(bytes.len(), start.elapsed()),
            Err(_) => self.stats.record_decode_error(),
        }
        result
    }

    fn encode_inner(&self, packet: &Packet) -> Result<Vec<u8>, CoreError> {
        if packet.header.id.is_empty() {
            return Err(CoreError::InvalidMessage);
        }

        let mut payload_bytes = serde_json::to_vec(&packet.payload).map_err(|_| CoreError::InvalidMessage)?;
        let mut flags = packet.header.flags;

        if self.config.compression != crate::config::CompressionKind::None {
            payload_bytes = compression::compress(self.config.compression, &payload_bytes)?;
            flags.insert(Flags::COMPRESSED);
        }
        if self.config.encryption != crate::config::EncryptionKind::None {
            let key = self.key.as_deref().ok_or(CoreError::InternalError)?;
            payload_bytes = self.cipher.encrypt(self.config.encryption, key, &payload_bytes)?;
            flags.insert(Flags::ENCRYPTED);
        }

        let mut header = packet.header.clone();
        header.flags = flags;
        header.compression = self.config.compression;
        header.encryption = self.config.encryption;
        header.version = Version::CURRENT;

        let header_bytes = if self.config.checksum {
            header.flags.insert(Flags::CHECKSUM);
            let pre = header.render(None);
            let sum = checksum::compute(pre.as_bytes(), &payload_bytes);
            header.checksum = Some(sum.clone());
            header.render(Some(&sum)).into_bytes()
        } else {
            header.checksum = None;
            header.render(None).into_bytes()
        };

        let total = 2 * FRAME_LEN_PREFIX_BYTES + header_bytes.len() + payload_bytes.len();
        if total > self.config.max_frame_bytes as usize {
            return Err(CoreError::MessageTooLarge);
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&(payload_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload_bytes);
        Ok(out)
    }

    fn decode_inner(&self, bytes: &[u8]) -> Result<Packet, CoreError> {
        if bytes.len() > self.config.max_frame_bytes as usize {
            return Err(CoreError::MessageTooLarge);
        }
        if bytes.len() < FRAME_LEN_PREFIX_BYTES {
            return Err(CoreError::InvalidFormat);
        }
        let header_len = read_u32(bytes, 0)? as usize;
        let payload_len_offset = FRAME_LEN_PREFIX_BYTES + header_len;
        if bytes.len() < payload_len_offset + FRAME_LEN_PREFIX_BYTES {
            return Err(CoreError::InvalidFormat);
        }
        let payload_len = read_u32(bytes, payload_len_offset)? as usize;
        let payload_offset = payload_len_offset + FRAME_LEN_PREFIX_BYTES;
        if bytes.len() != payload_offset + payload_len {
            return Err(CoreError::InvalidFormat);
        }

        let header_bytes = &bytes[FRAME_LEN_PREFIX_BYTES..FRAME_LEN_PREFIX_BYTES + header_len];
        let payload_bytes = &bytes[payload_offset..payload_offset + payload_len];

        let header_str = std::str::from_utf8(header_bytes).map_err(|_| CoreError::InvalidFormat)?;
        let header = PacketHeader::from_wire_str(header_str)?;

        if header.version.major != Version::CURRENT.major || header.version.minor != Version::CURRENT.minor {
            return Err(CoreError::InvalidVersion);
        }

        if header.flags.contains(Flags::CHECKSUM) {
            let expected = header.checksum.as_deref().ok_or(CoreError::InvalidFormat)?;
            let pre = header.render(None);
            let actual = checksum::compute(pre.as_bytes(), payload_bytes);
            if actual != expected {
                return Err(CoreError::ChecksumMismatch);
            }
        }

        let mut data = payload_bytes.to_vec();
        if header.flags.contains(Flags::ENCRYPTED) {
            let key = self.key.as_deref().ok_or(CoreError::InternalError)?;
            data = self.cipher.decrypt(header.encryption, key, &data)?;
        }
        if header.flags.contains(Flags::COMPRESSED) {
            data = compression::decompress(header.compression, &data)?;
        }

        let payload: Payload = serde_json::from_slice(&data).map_err(|_| CoreError::InvalidMessage)?;
        Ok(Packet { header, payload })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, CoreError> {
    let slice: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(CoreError::InvalidFormat)?;
    Ok(u32::from_be_bytes(slice))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
