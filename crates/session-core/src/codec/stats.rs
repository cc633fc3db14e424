// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock-free running counters for encode/decode throughput.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CodecStats {
    encoded_count: AtomicU64,
    encoded_bytes: AtomicU64,
    encode_errors: AtomicU64,
    encode_nanos: AtomicU64,
    decoded_count: AtomicU64,
    decoded_bytes: AtomicU64,
    decode_errors: AtomicU64,
    decode_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecStatsSnapshot {
    pub encoded_count: u64,
    pub encoded_bytes: u64,
    pub encode_errors: u64,
    pub avg_encode_nanos: u64,
    pub decoded_count: u64,
    pub decoded_bytes: u64,
    pub decode_errors: u64,
    pub avg_decode_nanos: u64,
}

impl CodecStats {
    pub fn record_encode(&self, bytes: usize, elapsed: Duration) {
        self.encoded_count.fetch_add(1, Ordering::Relaxed);
        self.encoded_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.encode_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode(&self, bytes: usize, elapsed: Duration) {
        self.decoded_count.fetch_add(1, Ordering::Relaxed);
        self.decoded_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.decode_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CodecStatsSnapshot {
        let encoded_count = self.encoded_count.load(Ordering::Relaxed);
        let decoded_count = self.decoded_count.load(Ordering::Relaxed);
        let avg_encode_nanos = self.encode_nanos.load(Ordering::Relaxed).checked_div(encoded_count.max(1)).unwrap_or(0);
        let avg_decode_nanos = self.decode_nanos.load(Ordering::Relaxed).checked_div(decoded_count.max(1)).unwrap_or(0);
        CodecStatsSnapshot {
            encoded_count,
            encoded_bytes: self.encoded_bytes.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            avg_encode_nanos: if encoded_count == 0 { 0 } else { avg_encode_nanos },
            decoded_count,
            decoded_bytes: self.decoded_bytes.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            avg_decode_nanos: if decoded_count == 0 { 0 } else { avg_decode_nanos },
        }
    }
}
