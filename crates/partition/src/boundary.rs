use std::collections::{HashMap, HashSet};

use glam::Vec2;
use strata_common::geometry::MAP_HALF_EXTENT;
use strata_common::{EntityId, MapId, PartitionId};

/// Spatial hash cell size in world units.
pub const SPATIAL_CELL_SIZE: f32 = 100.0;

/// A cell of the boundary spatial hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Uniform hash grid over boundary object positions.
///
/// Coordinates are shifted by the map half extent so the whole map maps to
/// non-negative cells.
#[derive(Debug, Default)]
pub struct SpatialHash {
    cells: HashMap<CellCoord, HashSet<EntityId>>,
    positions: HashMap<EntityId, Vec2>,
}

impl SpatialHash {
    pub fn position_to_cell(pos: Vec2) -> CellCoord {
        CellCoord {
            x: ((pos.x + MAP_HALF_EXTENT) / SPATIAL_CELL_SIZE).floor() as i32,
            y: ((pos.y + MAP_HALF_EXTENT) / SPATIAL_CELL_SIZE).floor() as i32,
        }
    }

    /// Insert or move an entity.
    pub fn upsert(&mut self, id: EntityId, pos: Vec2) {
        let cell = Self::position_to_cell(pos);
        if let Some(old) = self.positions.insert(id, pos) {
            let old_cell = Self::position_to_cell(old);
            if old_cell == cell {
                return;
            }
            self.detach(id, old_cell);
        }
        self.cells.entry(cell).or_default().insert(id);
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        match self.positions.remove(&id) {
            Some(pos) => {
                self.detach(id, Self::position_to_cell(pos));
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, id: EntityId, cell: CellCoord) {
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(&id);
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    pub fn position(&self, id: EntityId) -> Option<Vec2> {
        self.positions.get(&id).copied()
    }

    /// Entities within `radius` world units of `center`. A negative or
    /// non-finite radius matches nothing.
    ///
    /// When the cell window around `center` would cover more cells than are
    /// occupied, the tracked positions are scanned directly instead.
    pub fn query_nearby(&self, center: Vec2, radius: f32) -> Vec<EntityId> {
        if !radius.is_finite() || radius < 0.0 || !center.is_finite() {
            return Vec::new();
        }
        let radius_sq = radius * radius;
        let side = 2.0 * f64::from((radius / SPATIAL_CELL_SIZE).floor()) + 3.0;
        if side * side >= self.cells.len() as f64 {
            return self
                .positions
                .iter()
                .filter(|(_, p)| p.distance_squared(center) <= radius_sq)
                .map(|(id, _)| *id)
                .collect();
        }

        // The window is smaller than the occupied cell count here, so
        // `reach` stays small.
        let origin = Self::position_to_cell(center);
        let reach = (radius / SPATIAL_CELL_SIZE) as i32 + 1;
        let mut result = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                let coord = CellCoord::new(origin.x.saturating_add(dx), origin.y.saturating_add(dy));
                let Some(ids) = self.cells.get(&coord) else {
                    continue;
                };
                for id in ids {
                    let within = self
                        .positions
                        .get(id)
                        .is_some_and(|p| p.distance_squared(center) <= radius_sq);
                    if within {
                        result.push(*id);
                    }
                }
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// Contents of one boundary lock stripe: boundary sets of every map hashed
/// to the stripe, plus a spatial hash per map.
///
/// `memberships` counts the sets of a map holding an object; an object
/// leaves the spatial hash when its count drops to zero.
#[derive(Debug, Default)]
pub struct BoundaryStripe {
    sets: HashMap<(MapId, PartitionId), HashSet<EntityId>>,
    memberships: HashMap<(MapId, EntityId), u32>,
    spatial: HashMap<MapId, SpatialHash>,
}

impl BoundaryStripe {
    pub fn insert(&mut self, map: MapId, partition: PartitionId, id: EntityId) -> bool {
        let inserted = self.sets.entry((map, partition)).or_default().insert(id);
        if inserted {
            *self.memberships.entry((map, id)).or_default() += 1;
        }
        inserted
    }

    pub fn insert_at(&mut self, map: MapId, partition: PartitionId, id: EntityId, pos: Vec2) {
        self.insert(map, partition, id);
        self.spatial.entry(map).or_default().upsert(id, pos);
    }

    pub fn remove(&mut self, map: MapId, partition: PartitionId, id: EntityId) -> bool {
        let key = (map, partition);
        let removed = match self.sets.get_mut(&key) {
            Some(set) => {
                let removed = set.remove(&id);
                if set.is_empty() {
                    self.sets.remove(&key);
                }
                removed
            }
            None => false,
        };
        if removed && !self.release_membership(map, id) {
            if let Some(hash) = self.spatial.get_mut(&map) {
                hash.remove(id);
                if hash.is_empty() {
                    self.spatial.remove(&map);
                }
            }
        }
        removed
    }

    /// Drop one membership of `id` on `map`. Returns whether `id` is still
    /// in another boundary set of the map.
    fn release_membership(&mut self, map: MapId, id: EntityId) -> bool {
        let key = (map, id);
        match self.memberships.get_mut(&key) {
            Some(n) if *n > 1 => {
                *n -= 1;
                true
            }
            Some(_) => {
                self.memberships.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Whether `id` is in any boundary set of `map`.
    pub fn is_on_map(&self, map: MapId, id: EntityId) -> bool {
        self.memberships.contains_key(&(map, id))
    }

    pub fn contains(&self, map: MapId, partition: PartitionId, id: EntityId) -> bool {
        self.sets
            .get(&(map, partition))
            .is_some_and(|set| set.contains(&id))
    }

    pub fn count(&self, map: MapId, partition: PartitionId) -> usize {
        self.sets.get(&(map, partition)).map_or(0, HashSet::len)
    }

    pub fn ids(&self, map: MapId, partition: PartitionId) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .sets
            .get(&(map, partition))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Move a tracked object. Untracked objects are ignored.
    pub fn update_position(&mut self, map: MapId, id: EntityId, pos: Vec2) -> bool {
        match self.spatial.get_mut(&map) {
            Some(hash) if hash.position(id).is_some() => {
                hash.upsert(id, pos);
                true
            }
            _ => false,
        }
    }

    pub fn nearby(&self, map: MapId, center: Vec2, radius: f32) -> Vec<EntityId> {
        self.spatial
            .get(&map)
            .map(|hash| hash.query_nearby(center, radius))
            .unwrap_or_default()
    }

    /// Drop everything tracked for `map`.
    pub fn clear_map(&mut self, map: MapId) {
        self.sets.retain(|(m, _), _| *m != map);
        self.memberships.retain(|(m, _), _| *m != map);
        self.spatial.remove(&map);
    }

    /// Total boundary placements across the stripe.
    pub fn total(&self) -> usize {
        self.sets.values().map(HashSet::len).sum()
    }
}

/// Contents of one visibility lock stripe.
#[derive(Debug, Default)]
pub struct VisibilityStripe {
    sets: HashMap<(MapId, PartitionId), HashSet<EntityId>>,
}

impl VisibilityStripe {
    pub fn attach(&mut self, map: MapId, partition: PartitionId, id: EntityId) -> bool {
        self.sets.entry((map, partition)).or_default().insert(id)
    }

    pub fn detach(&mut self, map: MapId, partition: PartitionId, id: EntityId) -> bool {
        let key = (map, partition);
        let Some(set) = self.sets.get_mut(&key) else {
            return false;
        };
        let removed = set.remove(&id);
        if set.is_empty() {
            self.sets.remove(&key);
        }
        removed
    }

    pub fn count(&self, map: MapId, partition: PartitionId) -> usize {
        self.sets.get(&(map, partition)).map_or(0, HashSet::len)
    }

    pub fn clear_map(&mut self, map: MapId) {
        self.sets.retain(|(m, _), _| *m != map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_to_cell_basic() {
        let origin = SpatialHash::position_to_cell(Vec2::new(-MAP_HALF_EXTENT, -MAP_HALF_EXTENT));
        assert_eq!(origin, CellCoord::new(0, 0));
        let a = SpatialHash::position_to_cell(Vec2::new(0.0, 0.0));
        let b = SpatialHash::position_to_cell(Vec2::new(99.0, 0.0));
        assert!(b.x - a.x <= 1);
    }

    #[test]
    fn query_filters_by_true_distance() {
        let mut hash = SpatialHash::default();
        hash.upsert(EntityId(1), Vec2::new(0.0, 0.0));
        hash.upsert(EntityId(2), Vec2::new(30.0, 40.0));
        hash.upsert(EntityId(3), Vec2::new(150.0, 0.0));
        let mut near = hash.query_nearby(Vec2::ZERO, 50.0);
        near.sort();
        assert_eq!(near, vec![EntityId(1), EntityId(2)]);
        assert_eq!(hash.query_nearby(Vec2::ZERO, 1_000.0).len(), 3);
        assert!(hash.query_nearby(Vec2::new(5_000.0, 5_000.0), 10.0).is_empty());
    }

    #[test]
    fn upsert_moves_between_cells() {
        let mut hash = SpatialHash::default();
        hash.upsert(EntityId(1), Vec2::new(0.0, 0.0));
        hash.upsert(EntityId(1), Vec2::new(1_000.0, 0.0));
        assert_eq!(hash.len(), 1);
        assert_eq!(hash.cell_count(), 1);
        assert!(hash.query_nearby(Vec2::ZERO, 10.0).is_empty());
        assert!(hash.remove(EntityId(1)));
        assert!(!hash.remove(EntityId(1)));
        assert_eq!(hash.cell_count(), 0);
    }

    #[test]
    fn boundary_sets_are_scoped_by_partition() {
        let mut stripe = BoundaryStripe::default();
        let (map, p1, p2) = (MapId(0), PartitionId(1), PartitionId(2));
        assert!(stripe.insert(map, p1, EntityId(7)));
        assert!(!stripe.insert(map, p1, EntityId(7)));
        assert!(stripe.contains(map, p1, EntityId(7)));
        assert!(!stripe.contains(map, p2, EntityId(7)));
        assert!(!stripe.contains(MapId(16), p1, EntityId(7)));
        assert_eq!(stripe.count(map, p1), 1);
        assert!(stripe.remove(map, p1, EntityId(7)));
        assert_eq!(stripe.count(map, p1), 0);
        assert_eq!(stripe.total(), 0);
    }

    #[test]
    fn spatial_entry_survives_until_last_partition_drops() {
        let mut stripe = BoundaryStripe::default();
        let map = MapId(1);
        stripe.insert_at(map, PartitionId(1), EntityId(3), Vec2::new(10.0, 10.0));
        stripe.insert(map, PartitionId(2), EntityId(3));
        stripe.remove(map, PartitionId(1), EntityId(3));
        assert_eq!(stripe.nearby(map, Vec2::ZERO, 50.0), vec![EntityId(3)]);
        assert!(stripe.is_on_map(map, EntityId(3)));
        stripe.remove(map, PartitionId(2), EntityId(3));
        assert!(stripe.nearby(map, Vec2::ZERO, 50.0).is_empty());
        assert!(!stripe.is_on_map(map, EntityId(3)));
    }

    #[test]
    fn clear_map_forgets_memberships() {
        let mut stripe = BoundaryStripe::default();
        stripe.insert_at(MapId(2), PartitionId(1), EntityId(4), Vec2::ZERO);
        stripe.insert_at(MapId(18), PartitionId(1), EntityId(4), Vec2::ZERO);
        stripe.clear_map(MapId(2));
        assert!(!stripe.is_on_map(MapId(2), EntityId(4)));
        assert!(stripe.is_on_map(MapId(18), EntityId(4)));
        // Re-adding after a clear starts from a single membership.
        stripe.insert_at(MapId(2), PartitionId(3), EntityId(4), Vec2::ZERO);
        stripe.remove(MapId(2), PartitionId(3), EntityId(4));
        assert!(stripe.nearby(MapId(2), Vec2::ZERO, 1.0).is_empty());
    }

    #[test]
    fn dense_hash_queries_only_the_cell_window() {
        let mut hash = SpatialHash::default();
        for i in 0..40u64 {
            hash.upsert(EntityId(i), Vec2::new(i as f32 * 200.0, 0.0));
        }
        assert_eq!(hash.cell_count(), 40);
        assert_eq!(hash.query_nearby(Vec2::new(410.0, 0.0), 50.0), vec![EntityId(2)]);
        let mut near = hash.query_nearby(Vec2::new(400.0, 0.0), 200.0);
        near.sort();
        assert_eq!(near, vec![EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn degenerate_radii_are_bounded() {
        let mut hash = SpatialHash::default();
        hash.upsert(EntityId(1), Vec2::ZERO);
        hash.upsert(EntityId(2), Vec2::new(-MAP_HALF_EXTENT, MAP_HALF_EXTENT));
        hash.upsert(EntityId(3), Vec2::new(MAP_HALF_EXTENT * 3.0, 0.0));
        assert_eq!(hash.query_nearby(Vec2::ZERO, 0.0), vec![EntityId(1)]);
        assert!(hash.query_nearby(Vec2::ZERO, f32::INFINITY).is_empty());
        assert!(hash.query_nearby(Vec2::ZERO, f32::NAN).is_empty());
        assert!(hash.query_nearby(Vec2::ZERO, -1.0).is_empty());
        assert!(hash.query_nearby(Vec2::new(f32::MAX, 0.0), 10.0).is_empty());
        let mut all = hash.query_nearby(Vec2::ZERO, 1.0e30);
        all.sort();
        assert_eq!(all, vec![EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn visibility_attach_detach() {
        let mut stripe = VisibilityStripe::default();
        stripe.attach(MapId(0), PartitionId(1), EntityId(1));
        stripe.attach(MapId(0), PartitionId(1), EntityId(2));
        assert_eq!(stripe.count(MapId(0), PartitionId(1)), 2);
        assert!(stripe.detach(MapId(0), PartitionId(1), EntityId(1)));
        assert!(!stripe.detach(MapId(0), PartitionId(3), EntityId(1)));
        stripe.clear_map(MapId(0));
        assert_eq!(stripe.count(MapId(0), PartitionId(1)), 0);
    }
}
