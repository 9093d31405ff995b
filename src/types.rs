//! Shared value types and identifiers.

use serde::{Deserialize, Serialize};

/// Monotonic per-process session identifier.
pub type SessionId = u32;

/// Player account / character identifier.
pub type PlayerId = u32;

/// Map identifier.
pub type MapId = u16;

/// Identifier shared by everything positioned on a map.
pub type ObjectId = u32;

/// Maximum character name length in Unicode scalar values.
pub const MAX_NAME_LEN: usize = 15;

/// Map every freshly authenticated character spawns into.
pub const DEFAULT_SPAWN_MAP: MapId = 1002;

/// Current UNIX time in seconds.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A tile position plus the previously occupied tile.
///
/// Range tests use the Chebyshev metric; direction math uses Euclidean.
/// Positions are value-typed: movement replaces the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub last_x: i16,
    pub last_y: i16,
}

impl Position {
    pub fn at(x: i16, y: i16) -> Self {
        Self {
            x,
            y,
            last_x: x,
            last_y: y,
        }
    }

    /// The position after a step to `(x, y)`, remembering the current tile.
    pub fn advanced_to(self, x: i16, y: i16) -> Self {
        Self {
            x,
            y,
            last_x: self.x,
            last_y: self.y,
        }
    }

    /// Chebyshev distance: max of the absolute coordinate differences.
    pub fn chebyshev(&self, other: &Position) -> u16 {
        let dx = (self.x as i32 - other.x as i32).unsigned_abs();
        let dy = (self.y as i32 - other.y as i32).unsigned_abs();
        dx.max(dy) as u16
    }

    /// Euclidean distance, for direction and ordering.
    pub fn euclidean(&self, other: &Position) -> f64 {
        let dx = (self.x as f64) - (other.x as f64);
        let dy = (self.y as f64) - (other.y as f64);
        (dx * dx + dy * dy).sqrt()
    }
}

/// Primary combat attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub strength: u16,
    pub agility: u16,
    pub vitality: u16,
    pub spirit: u16,
}

/// The authenticated character record.
///
/// Owned jointly by the world (as a map entity) and the session (as the
/// logged-in identity); mutated only by the dispatcher thread running
/// that session's current handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub id: PlayerId,
    pub name: String,
    pub level: u8,
    pub experience: u64,
    pub map_id: MapId,
    pub position: Position,
    pub gold: u32,
    pub stats: Stats,
    pub created_at: u64,
    pub last_login: u64,
}

impl PlayerIdentity {
    /// A level-one character with defaults for everything but the id.
    pub fn fresh(id: PlayerId) -> Self {
        let name: String = format!("Hero{id}").chars().take(MAX_NAME_LEN).collect();
        let created = now();
        Self {
            id,
            name,
            level: 1,
            experience: 0,
            map_id: 0,
            position: Position::default(),
            gold: 0,
            stats: Stats {
                strength: 4,
                agility: 6,
                vitality: 12,
                spirit: 0,
            },
            created_at: created,
            last_login: created,
        }
    }

    pub fn with_name(id: PlayerId, name: &str) -> Self {
        let mut ident = Self::fresh(id);
        ident.name = name.chars().take(MAX_NAME_LEN).collect();
        ident
    }
}
