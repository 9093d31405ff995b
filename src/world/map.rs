//! One map: immutable cell grid plus the mutable entity set and its
//! spatial index.

use super::object::{MapObject, ObjectKind};
use super::spatial::SpatialHash;
use crate::types::{MapId, ObjectId, Position};
use std::collections::HashMap;

/// Cell attribute flags.
pub mod cell_flags {
    pub const OPEN: u8 = 1 << 0;
    pub const BLOCKED: u8 = 1 << 1;
    pub const STATIC_OBJ: u8 = 1 << 2;
    pub const BLOCKED_OBJ: u8 = 1 << 3;
    pub const PORTAL: u8 = 1 << 4;
    pub const ENTITY: u8 = 1 << 5;
}

/// One tile. Immutable after map load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub flags: u8,
    pub altitude: u16,
    pub floor_type: u16,
}

impl Cell {
    pub fn open() -> Self {
        Self {
            flags: cell_flags::OPEN,
            altitude: 0,
            floor_type: 0,
        }
    }

    pub fn blocked() -> Self {
        Self {
            flags: cell_flags::BLOCKED,
            altitude: 0,
            floor_type: 0,
        }
    }

    /// Walkable iff open and not blocked by terrain or a placed object.
    pub fn walkable(&self) -> bool {
        self.flags & cell_flags::OPEN != 0
            && self.flags & (cell_flags::BLOCKED | cell_flags::BLOCKED_OBJ) == 0
    }
}

/// Advanced every tick with the accumulated dt; registered by external
/// systems (monster AI, item decay).
pub type TickHook = Box<dyn FnMut(f64) + Send>;

/// Bound on the spawn-cell scan around the canonical origin.
const SPAWN_SCAN_RADIUS: i32 = 64;

pub struct Map {
    id: MapId,
    width: u16,
    height: u16,
    cells: Vec<Cell>,
    entities: HashMap<ObjectId, MapObject>,
    spatial: SpatialHash,
    hooks: Vec<TickHook>,
    elapsed: f64,
}

impl Map {
    /// `cells` must hold exactly `width * height` entries, row-major.
    pub fn new(id: MapId, width: u16, height: u16, cells: Vec<Cell>) -> Self {
        debug_assert_eq!(cells.len(), width as usize * height as usize);
        Self {
            id,
            width,
            height,
            cells,
            entities: HashMap::new(),
            spatial: SpatialHash::new(),
            hooks: Vec::new(),
            elapsed: 0.0,
        }
    }

    /// An all-open map of the given size.
    pub fn flat(id: MapId, width: u16, height: u16) -> Self {
        Self::new(
            id,
            width,
            height,
            vec![Cell::open(); width as usize * height as usize],
        )
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cell(&self, x: i16, y: i16) -> Option<&Cell> {
        if x < 0 || y < 0 || x as u16 >= self.width || y as u16 >= self.height {
            return None;
        }
        self.cells
            .get(y as usize * self.width as usize + x as usize)
    }

    pub fn walkable(&self, x: i16, y: i16) -> bool {
        self.cell(x, y).is_some_and(Cell::walkable)
    }

    pub fn entity(&self, id: ObjectId) -> Option<&MapObject> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// First open cell in an outward ring scan from the map center,
    /// bounded by [`SPAWN_SCAN_RADIUS`].
    pub fn find_spawn_cell(&self) -> Option<(i16, i16)> {
        let cx = (self.width / 2) as i32;
        let cy = (self.height / 2) as i32;

        for ring in 0..=SPAWN_SCAN_RADIUS {
            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    // Only the ring perimeter; inner tiles were covered.
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let (x, y) = ((cx + dx) as i16, (cy + dy) as i16);
                    if self.walkable(x, y) {
                        return Some((x, y));
                    }
                }
            }
        }
        None
    }

    /// Attach an entity; replaces any previous entity with the same id.
    pub(super) fn insert_entity(&mut self, object: MapObject) {
        self.spatial
            .insert(object.id, object.position.x, object.position.y);
        self.entities.insert(object.id, object);
    }

    pub(super) fn remove_entity(&mut self, id: ObjectId) -> Option<MapObject> {
        self.spatial.remove(id);
        self.entities.remove(&id)
    }

    /// Move an entity, keeping the spatial index in step. The caller
    /// has already validated the destination.
    pub(super) fn move_entity(&mut self, id: ObjectId, x: i16, y: i16) -> Option<Position> {
        let object = self.entities.get_mut(&id)?;
        object.position = object.position.advanced_to(x, y);
        self.spatial.relocate(id, x, y);
        Some(object.position)
    }

    /// Snapshot of entities within Chebyshev `range` of the center,
    /// optionally restricted to one kind.
    pub fn entities_in_range(
        &self,
        center: Position,
        range: u16,
        kind: Option<ObjectKind>,
    ) -> Vec<MapObject> {
        self.spatial
            .query_radius(center.x, center.y, range)
            .into_iter()
            .filter_map(|id| self.entities.get(&id))
            .filter(|o| kind.is_none_or(|k| o.kind == k))
            .cloned()
            .collect()
    }

    pub fn register_tick(&mut self, hook: TickHook) {
        self.hooks.push(hook);
    }

    /// Advance time-dependent state by `dt` seconds. Runs under the
    /// world lease; hooks see a monotonically accumulated clock.
    pub fn update(&mut self, dt: f64) {
        self.elapsed += dt;
        for hook in &mut self.hooks {
            hook(dt);
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}
