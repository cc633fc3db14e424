// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable payload compression: gzip and deflate via `flate2`,
//! Brotli via `brotli`.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

use crate::config::CompressionKind;
use crate::error::CoreError;

pub fn compress(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, CoreError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|_| CoreError::InternalError)?;
            encoder.finish().map_err(|_| CoreError::InternalError)
        }
        CompressionKind::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|_| CoreError::InternalError)?;
            encoder.finish().map_err(|_| CoreError::InternalError)
        }
        CompressionKind::Br => {
            let mut out = Vec::new();
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(data).map_err(|_| CoreError::InternalError)?;
            writer.flush().map_err(|_| CoreError::InternalError)?;
            drop(writer);
            Ok(out)
        }
    }
}

pub fn decompress(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, CoreError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|_| CoreError::InvalidMessage)?;
            Ok(out)
        }
        CompressionKind::Deflate => {
            let mut decoder = DeflateDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|_| CoreError::InvalidMessage)?;
            Ok(out)
        }
        CompressionKind::Br => {
            let mut out = Vec::new();
            let mut reader = brotli::Decompressor::new(data, 4096);
            reader.read_to_end(&mut out).map_err(|_| CoreError::InvalidMessage)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
#[path = "compression_tests.rs"]
mod tests;
