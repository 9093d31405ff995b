//! Stateless cipher for the two-word login payload.
//!
//! A 2-round Feistel-like mix of the (uid, state) pair. Round constants
//! come from the configured 64-byte key and salt, at offsets selected by
//! the dotted-quad server identifier, so every realm decodes a different
//! ciphertext for the same credentials.

use crate::config::TransportCipherConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportCipherError {
    #[error("transport key must be at least 64 bytes, got {0}")]
    KeyLength(usize),

    #[error("transport salt must be at least 64 bytes, got {0}")]
    SaltLength(usize),
}

const MATERIAL_LEN: usize = 64;
const ROUNDS: usize = 2;

#[derive(Debug, Clone)]
pub struct TransportCipher {
    k: [u32; ROUNDS],
    s: [u32; ROUNDS],
    rot: [u32; ROUNDS],
}

impl TransportCipher {
    pub fn new(config: &TransportCipherConfig) -> Result<Self, TransportCipherError> {
        Self::from_parts(
            config.key.as_bytes(),
            config.salt.as_bytes(),
            &config.ip,
        )
    }

    pub fn from_parts(key: &[u8], salt: &[u8], server_id: &str) -> Result<Self, TransportCipherError> {
        if key.len() < MATERIAL_LEN {
            return Err(TransportCipherError::KeyLength(key.len()));
        }
        if salt.len() < MATERIAL_LEN {
            return Err(TransportCipherError::SaltLength(salt.len()));
        }

        // Word offsets stay at most 55, so every 4-byte read fits the
        // 64-byte material.
        let seed: u32 = server_id.bytes().map(u32::from).sum();
        let offsets = [(seed % 56) as usize, ((seed + 13) % 56) as usize];

        let mut k = [0u32; ROUNDS];
        let mut s = [0u32; ROUNDS];
        let mut rot = [0u32; ROUNDS];
        for r in 0..ROUNDS {
            let o = offsets[r];
            k[r] = u32::from_le_bytes([key[o], key[o + 1], key[o + 2], key[o + 3]]);
            s[r] = u32::from_le_bytes([salt[o], salt[o + 1], salt[o + 2], salt[o + 3]]);
            rot[r] = u32::from(salt[((seed as usize) + r) % MATERIAL_LEN] & 31);
        }
        Ok(Self { k, s, rot })
    }

    fn mix(&self, v: u32, round: usize) -> u32 {
        (v ^ self.k[round])
            .rotate_left(self.rot[round])
            .wrapping_add(self.s[round])
    }

    /// Forward transform, as performed by the client.
    pub fn encrypt(&self, a: u32, b: u32) -> (u32, u32) {
        let a = a ^ self.mix(b, 0);
        let b = b ^ self.mix(a, 1);
        (a, b)
    }

    /// Inverse transform; recovers (uid, state) from the wire words.
    pub fn decrypt(&self, a: u32, b: u32) -> (u32, u32) {
        let b = b ^ self.mix(a, 1);
        let a = a ^ self.mix(b, 0);
        (a, b)
    }
}
