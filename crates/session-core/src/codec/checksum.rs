// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SHA-256 frame checksum, truncated to 16 hex characters.

use sha2::{Digest, Sha256};

const TRUNCATED_LEN: usize = 16;

pub fn compute(header: &[u8], payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(header);
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(TRUNCATED_LEN);
    hex
}

#[cfg(test)]
#[path = "checksum_tests.rs"]
mod tests;
