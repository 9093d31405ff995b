//! The 64-bit block primitive.
//!
//! A 16-round Feistel cipher over 64-bit blocks keyed by 128 bits: the
//! schedule expands the key into 16 masking and 16 rotation subkeys, and
//! rounds cycle through three round functions over four 8→32 S-boxes.
//! The stream mode only ever encrypts, so no decrypt path is exposed.

use super::CipherError;
use cast5::cipher::generic_array::GenericArray;
use cast5::cipher::{BlockEncrypt, KeyInit};
use cast5::Cast5;

/// Block width in bytes.
pub const BLOCK_LEN: usize = 8;

/// Bytes of key material consumed; longer keys are truncated.
pub const KEY_LEN: usize = 16;

/// Keyed block cipher. Pure function of its input; no per-block state
/// and no heap allocation on the encrypt path.
pub struct BlockCipher {
    inner: Cast5,
}

impl BlockCipher {
    /// Accepts any key of at least [`KEY_LEN`] bytes; only the first
    /// [`KEY_LEN`] are used.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() < KEY_LEN {
            return Err(CipherError::KeyLength(key.len()));
        }
        let inner = Cast5::new_from_slice(&key[..KEY_LEN]).map_err(|_| CipherError::KeyLength(key.len()))?;
        Ok(Self { inner })
    }

    /// Encrypt one block in place.
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        self.inner
            .encrypt_block(GenericArray::from_mut_slice(&mut block[..]));
    }
}
