//! Key agreement for the session handshake.
//!
//! The server sends its public key (with the group constants echoed
//! verbatim) inside the exchange frame, the client answers in the same
//! shape, and both ends derive the stream key from the shared secret
//! through the MD5 cascade below. Public keys travel as uppercase hex
//! ASCII.

use super::CipherError;
use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand::RngCore;

/// 1024-bit group modulus, hex ASCII, carried verbatim in the exchange.
pub const PRIME_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

/// Group generator, hex ASCII.
pub const GENERATOR_HEX: &str = "05";

/// Zero prefix plus the u32 body-length field; every exchange frame
/// starts with these 15 bytes, so the body length is known before the
/// body arrives.
pub const EXCHANGE_HEAD_LEN: usize = 15;

/// Upper bound on the exchange body; anything larger is a protocol
/// violation.
pub const MAX_EXCHANGE_BODY: usize = 1024;

/// Bytes in a derived session key (the stream cipher uses the first 16).
pub const SESSION_KEY_LEN: usize = 64;

const ZERO_PREFIX_LEN: usize = 11;
const PRIVATE_BYTES: usize = 32;

/// One side of the exchange: a 256-bit private exponent and the
/// matching public key.
pub struct DhExchange {
    private: BigUint,
    public: BigUint,
    prime: BigUint,
}

impl DhExchange {
    pub fn generate() -> Self {
        let prime = BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16).expect("group modulus constant");
        let generator =
            BigUint::parse_bytes(GENERATOR_HEX.as_bytes(), 16).expect("group generator constant");

        let mut seed = [0u8; PRIVATE_BYTES];
        rand::thread_rng().fill_bytes(&mut seed);
        let private = BigUint::from_bytes_be(&seed);

        let public = generator.modpow(&private, &prime);
        Self {
            private,
            public,
            prime,
        }
    }

    /// Uppercase hex ASCII of the public key, as carried on the wire.
    pub fn public_hex(&self) -> String {
        format!("{:X}", self.public)
    }

    /// Combine the peer's public key with our private exponent.
    pub fn shared_secret(&self, peer_public_hex: &str) -> Result<BigUint, CipherError> {
        let peer = BigUint::parse_bytes(peer_public_hex.as_bytes(), 16)
            .ok_or(CipherError::PublicKey)?;
        Ok(peer.modpow(&self.private, &self.prime))
    }
}

/// Derive the 64-byte ASCII session key from a shared secret.
///
/// The big-endian secret is truncated at its first 0x00 byte, hashed,
/// hex-encoded, hashed again over the doubled hex, and the two hex
/// strings concatenated.
pub fn derive_session_key(secret: &BigUint) -> [u8; SESSION_KEY_LEN] {
    let be = secret.to_bytes_be();
    let raw = match be.iter().position(|&b| b == 0) {
        Some(i) => &be[..i],
        None => &be[..],
    };

    let h1 = Md5::digest(raw);
    let hex1 = hex::encode(h1);

    let mut doubled = Vec::with_capacity(hex1.len() * 2);
    doubled.extend_from_slice(hex1.as_bytes());
    doubled.extend_from_slice(hex1.as_bytes());
    let h2 = Md5::digest(&doubled);
    let hex2 = hex::encode(h2);

    let mut key = [0u8; SESSION_KEY_LEN];
    key[..32].copy_from_slice(hex1.as_bytes());
    key[32..].copy_from_slice(hex2.as_bytes());
    key
}

/// Build a complete exchange frame carrying `public_hex`.
///
/// Layout: 11 zero bytes, u32 body length, then three length-prefixed
/// scratch fields (10, 8, 8 bytes), the length-prefixed P, G and public
/// key, and a 2-byte tail pad. All integers little-endian.
pub fn build_exchange_frame(public_hex: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(EXCHANGE_HEAD_LEN + 384 + public_hex.len());
    buf.extend_from_slice(&[0u8; ZERO_PREFIX_LEN]);
    buf.extend_from_slice(&0u32.to_le_bytes()); // patched below

    put_field(&mut buf, &[0u8; 10]);
    put_field(&mut buf, &[0u8; 8]);
    put_field(&mut buf, &[0u8; 8]);
    put_field(&mut buf, PRIME_HEX.as_bytes());
    put_field(&mut buf, GENERATOR_HEX.as_bytes());
    put_field(&mut buf, public_hex.as_bytes());
    buf.extend_from_slice(&[0u8; 2]);

    let body_len = (buf.len() - EXCHANGE_HEAD_LEN) as u32;
    buf[ZERO_PREFIX_LEN..EXCHANGE_HEAD_LEN].copy_from_slice(&body_len.to_le_bytes());
    buf
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Extract the peer public key from an exchange body (everything after
/// the 15-byte head).
pub fn parse_exchange_body(body: &[u8]) -> Result<String, CipherError> {
    let mut pos = 0usize;

    // Three scratch fields, then P and G, all skipped.
    for _ in 0..5 {
        skip_field(body, &mut pos)?;
    }

    let key = read_field(body, &mut pos)?;
    let hex = std::str::from_utf8(key).map_err(|_| CipherError::PublicKey)?;
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CipherError::PublicKey);
    }
    Ok(hex.to_string())
}

fn read_field<'a>(body: &'a [u8], pos: &mut usize) -> Result<&'a [u8], CipherError> {
    let head = body
        .get(*pos..*pos + 4)
        .ok_or(CipherError::Exchange("truncated field length"))?;
    let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
    if len > MAX_EXCHANGE_BODY {
        return Err(CipherError::Exchange("oversized field"));
    }
    let field = body
        .get(*pos + 4..*pos + 4 + len)
        .ok_or(CipherError::Exchange("truncated field body"))?;
    *pos += 4 + len;
    Ok(field)
}

fn skip_field(body: &[u8], pos: &mut usize) -> Result<(), CipherError> {
    read_field(body, pos).map(|_| ())
}
