//! Authoritative game state: the map registry, live players, and the
//! fixed-rate tick.
//!
//! One instance per process. Every mutation happens under the world
//! lease (one async mutex over the whole registry), so a query never
//! observes a half-applied update: operations validate first, then
//! commit.

pub mod map;
pub mod object;
pub mod spatial;

pub use map::{cell_flags, Cell, Map, TickHook};
pub use object::{MapObject, ObjectKind};
pub use spatial::{SpatialHash, GRID_CELL};

use crate::types::{now, MapId, PlayerId, PlayerIdentity, Position};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("unknown map {0}")]
    UnknownMap(MapId),

    #[error("no spawn cell on map {0}")]
    NoSpawnCell(MapId),

    #[error("player {0} is not in the world")]
    UnknownPlayer(PlayerId),

    #[error("cell ({x}, {y}) is not walkable")]
    Blocked { x: i16, y: i16 },
}

struct WorldInner {
    maps: HashMap<MapId, Map>,
    /// Map insertion order; ticks walk it verbatim.
    order: Vec<MapId>,
    players: HashMap<PlayerId, PlayerIdentity>,
}

pub struct World {
    inner: Mutex<WorldInner>,
    tick_hz: u32,
}

impl World {
    pub fn new(maps: Vec<Map>, tick_hz: u32) -> Self {
        let mut registry = HashMap::with_capacity(maps.len());
        let mut order = Vec::with_capacity(maps.len());
        for map in maps {
            if registry.contains_key(&map.id()) {
                warn!(map = map.id(), "duplicate map id ignored");
                continue;
            }
            order.push(map.id());
            registry.insert(map.id(), map);
        }
        info!(maps = order.len(), tick_hz, "world ready");
        Self {
            inner: Mutex::new(WorldInner {
                maps: registry,
                order,
                players: HashMap::new(),
            }),
            tick_hz,
        }
    }

    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Place a character on a map, picking a spawn cell by the map's
    /// policy. Returns the committed identity. The world is untouched
    /// on failure.
    pub async fn spawn(
        &self,
        mut identity: PlayerIdentity,
        map_id: MapId,
    ) -> Result<PlayerIdentity, WorldError> {
        let mut inner = self.inner.lock().await;
        let map = inner.maps.get_mut(&map_id).ok_or(WorldError::UnknownMap(map_id))?;
        let (x, y) = map.find_spawn_cell().ok_or(WorldError::NoSpawnCell(map_id))?;

        identity.map_id = map_id;
        identity.position = Position::at(x, y);
        identity.last_login = now();

        map.insert_entity(MapObject::player(identity.id, map_id, identity.position));
        inner.players.insert(identity.id, identity.clone());
        debug!(player = identity.id, map = map_id, x, y, "spawned");
        Ok(identity)
    }

    /// Detach a player from the world, returning the final identity
    /// for persistence.
    pub async fn despawn(&self, player_id: PlayerId) -> Option<PlayerIdentity> {
        let mut inner = self.inner.lock().await;
        let identity = inner.players.remove(&player_id)?;
        if let Some(map) = inner.maps.get_mut(&identity.map_id) {
            map.remove_entity(player_id);
        }
        debug!(player = player_id, "despawned");
        Some(identity)
    }

    /// Validate the destination, then commit position and spatial index
    /// together under the lease.
    pub async fn move_player(
        &self,
        player_id: PlayerId,
        x: i16,
        y: i16,
    ) -> Result<Position, WorldError> {
        let mut inner = self.inner.lock().await;
        let map_id = inner
            .players
            .get(&player_id)
            .ok_or(WorldError::UnknownPlayer(player_id))?
            .map_id;
        let map = inner
            .maps
            .get_mut(&map_id)
            .ok_or(WorldError::UnknownMap(map_id))?;
        if !map.walkable(x, y) {
            return Err(WorldError::Blocked { x, y });
        }

        let position = map
            .move_entity(player_id, x, y)
            .ok_or(WorldError::UnknownPlayer(player_id))?;
        if let Some(identity) = inner.players.get_mut(&player_id) {
            identity.position = position;
        }
        Ok(position)
    }

    /// Snapshot of everything within Chebyshev `range` of the player on
    /// the player's own map.
    pub async fn entities_in_range(
        &self,
        player_id: PlayerId,
        range: u16,
    ) -> Result<Vec<MapObject>, WorldError> {
        let inner = self.inner.lock().await;
        let identity = inner
            .players
            .get(&player_id)
            .ok_or(WorldError::UnknownPlayer(player_id))?;
        let map = inner
            .maps
            .get(&identity.map_id)
            .ok_or(WorldError::UnknownMap(identity.map_id))?;
        Ok(map.entities_in_range(identity.position, range, None))
    }

    pub async fn player(&self, player_id: PlayerId) -> Option<PlayerIdentity> {
        self.inner.lock().await.players.get(&player_id).cloned()
    }

    pub async fn player_count(&self) -> usize {
        self.inner.lock().await.players.len()
    }

    /// Attach a tick hook to one map.
    pub async fn register_tick(&self, map_id: MapId, hook: TickHook) -> Result<(), WorldError> {
        let mut inner = self.inner.lock().await;
        inner
            .maps
            .get_mut(&map_id)
            .ok_or(WorldError::UnknownMap(map_id))?
            .register_tick(hook);
        Ok(())
    }

    /// Run one tick over every map in insertion order.
    pub async fn tick(&self, dt: f64) {
        let mut inner = self.inner.lock().await;
        let order = inner.order.clone();
        for id in order {
            if let Some(map) = inner.maps.get_mut(&id) {
                map.update(dt);
            }
        }
    }

    /// Spawn the fixed-rate tick task; stops on the shutdown signal.
    pub fn run_ticks(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let world = self.clone();
        let period = Duration::from_secs_f64(1.0 / world.tick_hz as f64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    tick = interval.tick() => {
                        let dt = tick.duration_since(last).as_secs_f64();
                        last = tick;
                        world.tick(dt).await;
                    }
                }
            }
            debug!("tick loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> World {
        World::new(vec![Map::flat(1002, 128, 128)], 100)
    }

    #[tokio::test]
    async fn spawn_places_player_on_walkable_cell() {
        let world = test_world();
        let ident = world
            .spawn(PlayerIdentity::fresh(10_000_001), 1002)
            .await
            .unwrap();
        assert_eq!(ident.map_id, 1002);
        assert_eq!(world.player_count().await, 1);

        let committed = world.player(10_000_001).await.unwrap();
        assert_eq!(committed.position, ident.position);
    }

    #[tokio::test]
    async fn spawn_on_unknown_map_fails_clean() {
        let world = test_world();
        let err = world
            .spawn(PlayerIdentity::fresh(10_000_001), 4242)
            .await
            .unwrap_err();
        assert_eq!(err, WorldError::UnknownMap(4242));
        assert_eq!(world.player_count().await, 0);
    }

    #[tokio::test]
    async fn move_player_checks_walkability() {
        let mut cells = vec![Cell::open(); 64 * 64];
        cells[30 * 64 + 30] = Cell::blocked();
        let world = World::new(vec![Map::new(1002, 64, 64, cells)], 100);
        world
            .spawn(PlayerIdentity::fresh(10_000_001), 1002)
            .await
            .unwrap();

        let pos = world.move_player(10_000_001, 10, 11).await.unwrap();
        assert_eq!((pos.x, pos.y), (10, 11));

        let err = world.move_player(10_000_001, 30, 30).await.unwrap_err();
        assert_eq!(err, WorldError::Blocked { x: 30, y: 30 });
        // Failed move leaves the committed position alone.
        let ident = world.player(10_000_001).await.unwrap();
        assert_eq!((ident.position.x, ident.position.y), (10, 11));

        let err = world.move_player(10_000_001, -1, 0).await.unwrap_err();
        assert_eq!(err, WorldError::Blocked { x: -1, y: 0 });
    }

    #[tokio::test]
    async fn range_query_is_chebyshev_on_own_map() {
        let world = World::new(
            vec![Map::flat(1002, 128, 128), Map::flat(1005, 128, 128)],
            100,
        );
        let a = world
            .spawn(PlayerIdentity::fresh(10_000_001), 1002)
            .await
            .unwrap();
        world
            .spawn(PlayerIdentity::fresh(10_000_002), 1002)
            .await
            .unwrap();
        world
            .spawn(PlayerIdentity::fresh(10_000_003), 1005)
            .await
            .unwrap();

        world.move_player(10_000_002, a.position.x + 4, a.position.y - 4).await.unwrap();

        let near = world.entities_in_range(10_000_001, 4).await.unwrap();
        let ids: Vec<u32> = near.iter().map(|o| o.id).collect();
        assert!(ids.contains(&10_000_001));
        assert!(ids.contains(&10_000_002));
        // The player on the other map never shows up.
        assert!(!ids.contains(&10_000_003));

        let near = world.entities_in_range(10_000_001, 3).await.unwrap();
        let ids: Vec<u32> = near.iter().map(|o| o.id).collect();
        assert!(!ids.contains(&10_000_002));
    }

    #[tokio::test]
    async fn despawn_returns_final_identity() {
        let world = test_world();
        world
            .spawn(PlayerIdentity::fresh(10_000_001), 1002)
            .await
            .unwrap();
        world.move_player(10_000_001, 70, 71).await.unwrap();

        let ident = world.despawn(10_000_001).await.unwrap();
        assert_eq!((ident.position.x, ident.position.y), (70, 71));
        assert_eq!(world.player_count().await, 0);
        assert!(world.despawn(10_000_001).await.is_none());
    }

    #[tokio::test]
    async fn ticks_reach_registered_hooks() {
        let world = test_world();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook_count = count.clone();
        world
            .register_tick(
                1002,
                Box::new(move |_dt| {
                    hook_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }),
            )
            .await
            .unwrap();

        world.tick(0.01).await;
        world.tick(0.01).await;
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}
