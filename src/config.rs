//! Server configuration.
//!
//! All options are read-only after startup; the binary loads a TOML file
//! and threads a single `ServerConfig` through server construction.

use crate::types::MapId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid option: {0}")]
    Invalid(String),
}

/// Transport-cipher material for the two-word login payload.
///
/// `key` and `salt` must be at least 64 bytes of ASCII; `ip` is the
/// dotted-quad server identifier that selects the byte offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCipherConfig {
    #[serde(default = "default_transport_ip")]
    pub ip: String,
    #[serde(default = "default_transport_key")]
    pub key: String,
    #[serde(default = "default_transport_salt")]
    pub salt: String,
}

impl Default for TransportCipherConfig {
    fn default() -> Self {
        Self {
            ip: default_transport_ip(),
            key: default_transport_key(),
            salt: default_transport_salt(),
        }
    }
}

fn default_transport_ip() -> String {
    "127.0.0.1".into()
}

fn default_transport_key() -> String {
    "BC234xsXGGTwSN6gyoUVwTAg4SK23c07BC234xsXGGTwSN6gyoUVwTAg4SK23c07".into()
}

fn default_transport_salt() -> String {
    "xs8TQJ3gm1rqLmbanuelx2vviFAmxCDKxs8TQJ3gm1rqLmbanuelx2vviFAmxCDK".into()
}

/// Dimensions for a map synthesized by the built-in flat loader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MapSpec {
    pub id: MapId,
    pub width: u16,
    pub height: u16,
}

fn default_maps() -> Vec<MapSpec> {
    vec![MapSpec {
        id: crate::types::DEFAULT_SPAWN_MAP,
        width: 512,
        height: 512,
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hard cap on concurrent sessions; excess connects are closed on accept.
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,

    /// World update rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    /// Deadline for the dummy + key exchange after accept.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u32,

    /// Disconnect a session after this long with no inbound bytes.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u32,

    /// Bound on the per-session outbound mailbox; overflow disconnects.
    #[serde(default = "default_outbound_mailbox")]
    pub outbound_mailbox: u32,

    /// Refuse new connections while the inbound queue is deeper than this.
    #[serde(default = "default_inbound_highwater")]
    pub inbound_highwater: u32,

    /// Resume accepting once the inbound queue drains below this.
    #[serde(default = "default_inbound_lowwater")]
    pub inbound_lowwater: u32,

    #[serde(default)]
    pub transport_cipher: TransportCipherConfig,

    /// Maps synthesized by the built-in loader when no external loader
    /// is injected.
    #[serde(default = "default_maps")]
    pub maps: Vec<MapSpec>,
}

fn default_port() -> u16 {
    10033
}
fn default_max_clients() -> u32 {
    1000
}
fn default_tick_hz() -> u32 {
    100
}
fn default_handshake_timeout_ms() -> u32 {
    10_000
}
fn default_idle_timeout_ms() -> u32 {
    120_000
}
fn default_outbound_mailbox() -> u32 {
    256
}
fn default_inbound_highwater() -> u32 {
    10_000
}
fn default_inbound_lowwater() -> u32 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_clients: default_max_clients(),
            tick_hz: default_tick_hz(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            outbound_mailbox: default_outbound_mailbox(),
            inbound_highwater: default_inbound_highwater(),
            inbound_lowwater: default_inbound_lowwater(),
            transport_cipher: TransportCipherConfig::default(),
            maps: default_maps(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_hz == 0 {
            return Err(ConfigError::Invalid("tick_hz must be nonzero".into()));
        }
        if self.outbound_mailbox == 0 {
            return Err(ConfigError::Invalid("outbound_mailbox must be nonzero".into()));
        }
        if self.inbound_lowwater > self.inbound_highwater {
            return Err(ConfigError::Invalid(
                "inbound_lowwater must not exceed inbound_highwater".into(),
            ));
        }
        if self.transport_cipher.key.len() < 64 || self.transport_cipher.salt.len() < 64 {
            return Err(ConfigError::Invalid(
                "transport key and salt must be at least 64 bytes".into(),
            ));
        }
        if self.maps.iter().any(|m| m.width == 0 || m.height == 0) {
            return Err(ConfigError::Invalid("map dimensions must be nonzero".into()));
        }
        Ok(())
    }
}
