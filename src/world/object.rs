//! Positioned map entities.
//!
//! One shared record with a kind discriminant; behavior differences
//! live at the dispatch sites, not in a method table.

use crate::types::{MapId, ObjectId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Player,
    Monster,
    SobNpc,
    StaticRole,
    Item,
    Npc,
    PokerTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub position: Position,
    pub map_id: MapId,
    pub active: bool,
}

impl MapObject {
    pub fn new(id: ObjectId, kind: ObjectKind, map_id: MapId, position: Position) -> Self {
        Self {
            id,
            kind,
            position,
            map_id,
            active: true,
        }
    }

    pub fn player(id: ObjectId, map_id: MapId, position: Position) -> Self {
        Self::new(id, ObjectKind::Player, map_id, position)
    }
}
