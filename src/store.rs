//! Injected collaborator interfaces: player persistence and map
//! loading. The core never names a concrete backend; the in-memory
//! implementations below serve the binary defaults and the tests.

use crate::config::MapSpec;
use crate::types::{PlayerId, PlayerIdentity};
use crate::world::Map;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Character persistence.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn load(&self, id: PlayerId) -> Option<PlayerIdentity>;

    /// Insert or replace; returns false when the backend rejected the
    /// write.
    async fn upsert(&self, player: &PlayerIdentity) -> bool;

    async fn exists(&self, id: PlayerId) -> bool;

    async fn is_name_available(&self, name: &str) -> bool;
}

/// Map source; produces fully populated cell grids.
pub trait MapLoader: Send + Sync {
    fn all(&self) -> Vec<Map>;
}

/// Volatile store; state dies with the process.
#[derive(Default)]
pub struct MemoryStore {
    players: RwLock<HashMap<PlayerId, PlayerIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn load(&self, id: PlayerId) -> Option<PlayerIdentity> {
        self.players.read().await.get(&id).cloned()
    }

    async fn upsert(&self, player: &PlayerIdentity) -> bool {
        self.players
            .write()
            .await
            .insert(player.id, player.clone());
        true
    }

    async fn exists(&self, id: PlayerId) -> bool {
        self.players.read().await.contains_key(&id)
    }

    async fn is_name_available(&self, name: &str) -> bool {
        !self
            .players
            .read()
            .await
            .values()
            .any(|p| p.name == name)
    }
}

/// Synthesizes all-open maps from configured dimensions.
pub struct FlatMapLoader {
    specs: Vec<MapSpec>,
}

impl FlatMapLoader {
    pub fn new(specs: Vec<MapSpec>) -> Self {
        Self { specs }
    }
}

impl MapLoader for FlatMapLoader {
    fn all(&self) -> Vec<Map> {
        self.specs
            .iter()
            .map(|s| Map::flat(s.id, s.width, s.height))
            .collect()
    }
}
