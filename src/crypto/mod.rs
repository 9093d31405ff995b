//! Session cryptography: the 64-bit block primitive, the byte-wise
//! stream mode wrapped around it, the key-agreement exchange, and the
//! stateless transport cipher for the login payload.

pub mod block;
pub mod dh;
pub mod stream;
pub mod transport;

pub use block::{BlockCipher, BLOCK_LEN, KEY_LEN};
pub use transport::TransportCipher;
pub use dh::{
    build_exchange_frame, derive_session_key, parse_exchange_body, DhExchange, EXCHANGE_HEAD_LEN,
    GENERATOR_HEX, MAX_EXCHANGE_BODY, PRIME_HEX, SESSION_KEY_LEN,
};
pub use stream::StreamCipher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key too short: {0} bytes")]
    KeyLength(usize),

    #[error("malformed key exchange: {0}")]
    Exchange(&'static str),

    #[error("public key is not valid hex")]
    PublicKey,
}
