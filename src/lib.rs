//! Cinnabar game-server core.
//!
//! The per-connection secure framing pipeline, the central packet
//! dispatcher, and the per-map world tick. Persistence, map files,
//! chat routing and game rules are injected collaborators behind the
//! traits in [`store`].

pub mod config;
pub mod crypto;
pub mod net;
pub mod store;
pub mod types;
pub mod world;

pub use config::{MapSpec, ServerConfig, TransportCipherConfig};
pub use net::{GameServer, ServerError};
pub use store::{FlatMapLoader, MapLoader, MemoryStore, PlayerStore};
pub use types::*;
pub use world::{Map, MapObject, ObjectKind, World, WorldError};
