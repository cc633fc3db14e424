// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable payload encryption. The default implementation is
//! AES-GCM via `ring`, with a random 12-byte nonce prepended to the
//! ciphertext. Swap in another [`PayloadCipher`] for a different algorithm
//! without touching the framing logic in [`super::Codec`].

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::config::EncryptionKind;
use crate::error::CoreError;

const NONCE_LEN: usize = 12;

pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, kind: EncryptionKind, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CoreError>;
    fn decrypt(&self, kind: EncryptionKind, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CoreError>;
}

pub struct AesGcmCipher {
    rng: SystemRandom,
}

impl AesGcmCipher {
    pub fn new() -> Self {
        Self { rng: SystemRandom::new() }
    }
}

impl Default for AesGcmCipher {
    fn default() -> Self {
        Self::new()
    }
}

fn algorithm(kind: EncryptionKind) -> Option<&'static ring::aead::Algorithm> {
    match kind {
        EncryptionKind::None => None,
        EncryptionKind::Aes128 => Some(&AES_128_GCM),
        EncryptionKind::Aes256 => Some(&AES_256_GCM),
    }
}

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, kind: EncryptionKind, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let Some(algo) = algorithm(kind) else {
            return Ok(plaintext.to_vec());
        };
        let unbound = UnboundKey::new(algo, key).map_err(|_| CoreError::InternalError)?;
        let sealing_key = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CoreError::InternalError)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CoreError::InternalError)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn decrypt(&self, kind: EncryptionKind, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let Some(algo) = algorithm(kind) else {
            return Ok(ciphertext.to_vec());
        };
        if ciphertext.len() < NONCE_LEN {
            return Err(CoreError::InvalidMessage);
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| CoreError::InvalidMessage)?;

        let unbound = UnboundKey::new(algo, key).map_err(|_| CoreError::InternalError)?;
        let opening_key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = sealed.to_vec();
        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CoreError::InvalidMessage)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
#[path = "encryption_tests.rs"]
mod tests;
