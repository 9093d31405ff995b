//! Uniform-grid spatial index.
//!
//! Buckets are squares of [`GRID_CELL`] tiles keyed by truncated
//! coordinates. Range queries touch only the buckets overlapping the
//! Chebyshev square, then filter on exact positions, so a query costs
//! the covered buckets plus the matching entities.

use crate::types::ObjectId;
use std::collections::{HashMap, HashSet};

/// Grid bucket edge in tiles.
pub const GRID_CELL: i32 = 32;

#[derive(Debug, Default)]
pub struct SpatialHash {
    buckets: HashMap<(i32, i32), HashSet<ObjectId>>,
    positions: HashMap<ObjectId, (i16, i16)>,
}

fn bucket_of(x: i16, y: i16) -> (i32, i32) {
    (x as i32 / GRID_CELL, y as i32 / GRID_CELL)
}

impl SpatialHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn position_of(&self, id: ObjectId) -> Option<(i16, i16)> {
        self.positions.get(&id).copied()
    }

    /// Insert or re-home an entity at the given tile.
    pub fn insert(&mut self, id: ObjectId, x: i16, y: i16) {
        if self.positions.contains_key(&id) {
            self.relocate(id, x, y);
            return;
        }
        self.positions.insert(id, (x, y));
        self.buckets.entry(bucket_of(x, y)).or_default().insert(id);
    }

    pub fn remove(&mut self, id: ObjectId) -> bool {
        let Some((x, y)) = self.positions.remove(&id) else {
            return false;
        };
        let key = bucket_of(x, y);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        true
    }

    /// Move an entity; a no-op bucket change costs two hash lookups.
    pub fn relocate(&mut self, id: ObjectId, x: i16, y: i16) -> bool {
        let Some(old) = self.positions.get_mut(&id) else {
            return false;
        };
        let from = bucket_of(old.0, old.1);
        let to = bucket_of(x, y);
        *old = (x, y);

        if from != to {
            if let Some(bucket) = self.buckets.get_mut(&from) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&from);
                }
            }
            self.buckets.entry(to).or_default().insert(id);
        }
        true
    }

    /// Every entity within Chebyshev distance `radius` of the center.
    pub fn query_radius(&self, cx: i16, cy: i16, radius: u16) -> Vec<ObjectId> {
        let r = radius as i32;
        let mut hits = Vec::new();
        let (bx0, by0) = bucket_of(
            (cx as i32 - r).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            (cy as i32 - r).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        );
        let (bx1, by1) = bucket_of(
            (cx as i32 + r).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            (cy as i32 + r).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        );

        for bx in bx0..=bx1 {
            for by in by0..=by1 {
                let Some(bucket) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for &id in bucket {
                    let (x, y) = self.positions[&id];
                    let dx = (x as i32 - cx as i32).abs();
                    let dy = (y as i32 - cy as i32).abs();
                    if dx.max(dy) <= r {
                        hits.push(id);
                    }
                }
            }
        }
        hits
    }

    pub fn count_in_radius(&self, cx: i16, cy: i16, radius: u16) -> usize {
        self.query_radius(cx, cy, radius).len()
    }

    /// Closest entity to the center by Chebyshev distance, scanning
    /// outward ring by ring.
    pub fn find_nearest(&self, cx: i16, cy: i16) -> Option<(ObjectId, u16)> {
        if self.positions.is_empty() {
            return None;
        }
        let mut best: Option<(ObjectId, i32)> = None;
        for (&id, &(x, y)) in &self.positions {
            let dx = (x as i32 - cx as i32).abs();
            let dy = (y as i32 - cy as i32).abs();
            let d = dx.max(dy);
            match best {
                Some((_, bd)) if bd <= d => {}
                _ => best = Some((id, d)),
            }
        }
        best.map(|(id, d)| (id, d as u16))
    }
}
