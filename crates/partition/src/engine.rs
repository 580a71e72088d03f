use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use glam::Vec2;
use strata_common::sync::{lock, read, write};
use strata_common::{
    Clock, EngineConfig, EntityId, MapId, PartitionId, StripedLock, ZoneId,
};
use strata_kernel::{OwnershipRecord, PersistenceGateway, WorldGateway};

use crate::boundary::{BoundaryStripe, VisibilityStripe};
use crate::density::{self, DENSITY_CHECK_INTERVAL_MS, RESIZE_COOLDOWN_MS, ResizeDecision};
use crate::layout::PartitionLayout;
use crate::overrides::{OverrideTable, PartitionOverride};
use crate::partition::{Partition, PartitionStats};
use crate::relocation::{RELOCATION_TIMEOUT_MS, RelocationTable, RelocationTxn};

/// Cross-partition handoff events recorded since the last consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffCounts {
    pub combat: u32,
    pub path: u32,
}

struct MapPartitions {
    layout: PartitionLayout,
    partitions: Vec<Partition>,
    last_resize_ms: Option<u64>,
}

impl MapPartitions {
    fn new(map: MapId, count: u32) -> Self {
        let layout = PartitionLayout::for_count(count);
        Self {
            layout,
            partitions: (1..=layout.count)
                .map(|id| Partition::new(map, PartitionId(id)))
                .collect(),
            last_resize_ms: None,
        }
    }

    fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id() == id)
    }
}

#[derive(Default)]
struct PartitionState {
    maps: BTreeMap<MapId, MapPartitions>,
    ownership: HashMap<EntityId, (MapId, PartitionId)>,
}

/// Spatial partition engine.
///
/// The primary `state` lock guards partition layouts and the ownership
/// table. Overrides, relocations, handoff counters, the zone cache and
/// density bookkeeping each sit behind their own mutex; none of them is
/// held while the primary lock is acquired. Boundary and visibility sets are
/// striped by map id.
pub struct PartitionEngine {
    config: RwLock<Arc<EngineConfig>>,
    clock: Arc<dyn Clock>,
    world: Option<Arc<dyn WorldGateway>>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    state: RwLock<PartitionState>,
    layout_epoch: AtomicU64,
    overrides: Mutex<OverrideTable>,
    relocations: Mutex<RelocationTable>,
    handoffs: Mutex<HashMap<MapId, HandoffCounts>>,
    zone_cache: Mutex<HashMap<ZoneId, bool>>,
    density_checks: Mutex<HashMap<MapId, u64>>,
    boundary: StripedLock<BoundaryStripe>,
    visibility: StripedLock<VisibilityStripe>,
}

impl PartitionEngine {
    pub fn new(config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(config),
            clock,
            world: None,
            persistence: None,
            state: RwLock::new(PartitionState::default()),
            layout_epoch: AtomicU64::new(0),
            overrides: Mutex::new(OverrideTable::default()),
            relocations: Mutex::new(RelocationTable::default()),
            handoffs: Mutex::new(HashMap::new()),
            zone_cache: Mutex::new(HashMap::new()),
            density_checks: Mutex::new(HashMap::new()),
            boundary: StripedLock::default(),
            visibility: StripedLock::default(),
        }
    }

    /// Source of map tile counts for tile-based sizing.
    pub fn with_world(mut self, world: Arc<dyn WorldGateway>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&read(&self.config))
    }

    /// Swap the configuration snapshot. Existing partitions keep their
    /// layout until re-initialized.
    pub fn reload_config(&self, config: Arc<EngineConfig>) {
        *write(&self.config) = config;
        lock(&self.zone_cache).clear();
        tracing::info!(target: "strata::partition", "partition config reloaded");
    }

    pub fn is_enabled(&self) -> bool {
        read(&self.config).partitions.enabled
    }

    pub fn border_overlap(&self) -> f32 {
        read(&self.config).partitions.border_overlap
    }

    /// Whether partitioned maps keep objects only in the partition store.
    pub fn use_partition_store_only(&self) -> bool {
        read(&self.config).partitions.store_only
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Bumped whenever any map's partition layout changes.
    pub fn layout_epoch(&self) -> u64 {
        self.layout_epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.layout_epoch.fetch_add(1, Ordering::AcqRel);
    }

    // ---- partitions and layout ----

    /// Register partitions for every configured map and load persisted
    /// ownership. Safe to call again after a config reload.
    pub fn initialize(self: &Arc<Self>) {
        let cfg = self.config();
        if !cfg.partitions.enabled {
            return;
        }
        {
            let mut state = write(&self.state);
            state.maps.clear();
            state.ownership.clear();
        }
        for mut stripe in self.boundary.write_all() {
            *stripe = BoundaryStripe::default();
        }
        for mut stripe in self.visibility.write_all() {
            *stripe = VisibilityStripe::default();
        }
        if cfg.partitions.maps.is_empty() {
            tracing::info!(target: "strata::partition", "partitioning enabled but no maps configured");
            return;
        }
        for &map in &cfg.partitions.maps {
            let count = self.compute_partition_count(map);
            self.register_partitions(map, count);
        }

        if let Some(persistence) = &self.persistence {
            let engine = Arc::downgrade(self);
            persistence.load_all_ownership(Box::new(move |result| {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match result {
                    Ok(rows) => {
                        engine.apply_ownership_rows(&rows);
                    }
                    Err(err) => {
                        tracing::error!(target: "strata::partition", %err, "ownership load failed");
                    }
                }
            }));
        }
    }

    /// Partition count a map should start with: explicit override, then
    /// tile-based sizing, then the default.
    pub fn compute_partition_count(&self, map: MapId) -> u32 {
        let cfg = self.config();
        let p = &cfg.partitions;
        let mut count = p.default_count.max(1);
        if let Some(&forced) = p.count_overrides.get(&map) {
            count = forced;
        } else if p.tile_based {
            let per_partition = p
                .tiles_per_partition_overrides
                .get(&map)
                .copied()
                .unwrap_or(p.tiles_per_partition);
            let tiles = self
                .world
                .as_ref()
                .and_then(|w| w.map_tile_count(map))
                .unwrap_or(0);
            if per_partition > 0 && tiles > 0 {
                count = tiles.div_ceil(per_partition);
            }
        }
        if p.tile_based {
            let min = p.min_count.max(1);
            count = count.clamp(min, p.max_count.max(min));
        }
        count.max(1)
    }

    /// Replace the partitions of `map` with `count` fresh ones.
    pub fn register_partitions(&self, map: MapId, count: u32) {
        let count = count.max(1);
        write(&self.state)
            .maps
            .insert(map, MapPartitions::new(map, count));
        self.bump_epoch();
        tracing::info!(target: "strata::partition", map = %map, count, "partitions registered");
    }

    /// Forget every partition and boundary/visibility set of `map`.
    pub fn clear_partitions(&self, map: MapId) {
        write(&self.state).maps.remove(&map);
        self.boundary.write(map).clear_map(map);
        self.visibility.write(map).clear_map(map);
        lock(&self.overrides).clear_map(map);
        self.bump_epoch();
    }

    pub fn is_map_partitioned(&self, map: MapId) -> bool {
        read(&self.state).maps.contains_key(&map)
    }

    /// Registered partitions of `map`, 0 when the map is not partitioned.
    pub fn partition_count(&self, map: MapId) -> u32 {
        read(&self.state)
            .maps
            .get(&map)
            .map_or(0, |m| m.partitions.len() as u32)
    }

    pub fn layout(&self, map: MapId) -> Option<PartitionLayout> {
        read(&self.state).maps.get(&map).map(|m| m.layout)
    }

    pub fn adjacent_partitions(&self, map: MapId, partition: PartitionId) -> Vec<PartitionId> {
        self.layout(map)
            .map(|l| l.adjacent(partition))
            .unwrap_or_default()
    }

    // ---- lookups ----

    /// Geometric partition of a position. Unpartitioned maps resolve to 1.
    pub fn partition_for_position(&self, map: MapId, x: f32, y: f32) -> PartitionId {
        match self.layout(map) {
            Some(layout) => layout.partition_for_position(x, y),
            None => PartitionId::FIRST,
        }
    }

    /// Partition of an entity: persisted ownership on this map first, then
    /// a live override, then geometry.
    pub fn partition_for_entity(&self, map: MapId, x: f32, y: f32, entity: EntityId) -> PartitionId {
        if let Some(owned) = self.persistent_partition(entity, map) {
            return owned;
        }
        let now = self.now_ms();
        if let Some(forced) = lock(&self.overrides).lookup(entity, map, now) {
            return forced;
        }
        self.partition_for_position(map, x, y)
    }

    /// Like [`Self::partition_for_entity`], but positions inside an
    /// excluded zone always resolve to partition 1.
    pub fn partition_for_zone(
        &self,
        map: MapId,
        zone: ZoneId,
        x: f32,
        y: f32,
        entity: Option<EntityId>,
    ) -> PartitionId {
        if self.is_zone_excluded(zone) {
            return PartitionId::FIRST;
        }
        match entity {
            Some(entity) => self.partition_for_entity(map, x, y, entity),
            None => self.partition_for_position(map, x, y),
        }
    }

    pub fn is_zone_excluded(&self, zone: ZoneId) -> bool {
        if let Some(&hit) = lock(&self.zone_cache).get(&zone) {
            return hit;
        }
        let excluded = read(&self.config).partitions.excluded_zones.contains(&zone);
        lock(&self.zone_cache).insert(zone, excluded);
        excluded
    }

    pub fn is_near_partition_boundary(&self, map: MapId, x: f32, y: f32) -> bool {
        let Some(layout) = self.layout(map) else {
            return false;
        };
        if layout.count <= 1 {
            return false;
        }
        layout.is_near_boundary(x, y, self.border_overlap())
    }

    // ---- overrides and ownership ----

    pub fn set_partition_override(
        &self,
        entity: EntityId,
        map: MapId,
        partition: PartitionId,
        duration_ms: u64,
    ) {
        let expires_at_ms = self.now_ms().saturating_add(duration_ms);
        lock(&self.overrides).set(
            entity,
            PartitionOverride {
                map,
                partition,
                expires_at_ms,
            },
        );
    }

    pub fn batch_set_partition_overrides(
        &self,
        map: MapId,
        entries: &[(EntityId, PartitionId)],
        duration_ms: u64,
    ) {
        let expires_at_ms = self.now_ms().saturating_add(duration_ms);
        let mut overrides = lock(&self.overrides);
        for &(entity, partition) in entries {
            overrides.set(
                entity,
                PartitionOverride {
                    map,
                    partition,
                    expires_at_ms,
                },
            );
        }
    }

    pub fn clear_partition_override(&self, entity: EntityId) -> bool {
        lock(&self.overrides).clear(entity)
    }

    pub fn persistent_partition(&self, entity: EntityId, map: MapId) -> Option<PartitionId> {
        match read(&self.state).ownership.get(&entity) {
            Some(&(owned_map, partition)) if owned_map == map => Some(partition),
            _ => None,
        }
    }

    /// Load ownership rows under one exclusive lock. Rows for partition 0
    /// or unpartitioned maps are skipped. Returns the number applied.
    pub fn apply_ownership_rows(&self, rows: &[OwnershipRecord]) -> usize {
        let mut state = write(&self.state);
        let mut applied = 0;
        for row in rows {
            if row.partition.0 == 0 || !state.maps.contains_key(&row.map) {
                continue;
            }
            state.ownership.insert(row.entity, (row.map, row.partition));
            applied += 1;
        }
        drop(state);
        tracing::info!(target: "strata::partition", applied, total = rows.len(), "ownership loaded");
        applied
    }

    /// Record an entity's owning partition, writing through only on change.
    pub fn persist_partition_ownership(&self, entity: EntityId, map: MapId, partition: PartitionId) {
        if !self.is_enabled() {
            return;
        }
        let previous = {
            let mut state = write(&self.state);
            let previous = state.ownership.insert(entity, (map, partition));
            if previous == Some((map, partition)) {
                return;
            }
            previous
        };
        let Some(persistence) = &self.persistence else {
            return;
        };
        persistence.save_ownership(OwnershipRecord {
            entity,
            map,
            partition,
        });
        let map_changed = match previous {
            Some((old_map, _)) => old_map != map,
            None => true,
        };
        if map_changed {
            persistence.delete_ownership_for_other_maps(entity, map);
        }
    }

    // ---- relocation ----

    pub fn begin_relocation(
        &self,
        entity: EntityId,
        map: MapId,
        from: PartitionId,
        to: PartitionId,
    ) -> bool {
        let now = self.now_ms();
        lock(&self.relocations).begin(entity, map, from, to, now)
    }

    pub fn commit_relocation(&self, entity: EntityId) -> bool {
        let now = self.now_ms();
        lock(&self.relocations).commit(entity, now).is_some()
    }

    pub fn rollback_relocation(&self, entity: EntityId) {
        let now = self.now_ms();
        lock(&self.relocations).rollback(entity, now);
    }

    pub fn relocation(&self, entity: EntityId) -> Option<RelocationTxn> {
        lock(&self.relocations).get(entity)
    }

    // ---- boundary and visibility ----

    pub fn register_boundary_object(&self, map: MapId, partition: PartitionId, entity: EntityId) {
        if self.boundary.write(map).insert(map, partition, entity) {
            tracing::debug!(target: "strata::partition", entity = %entity, map = %map, partition = %partition, "boundary object registered");
        }
    }

    /// Register a boundary object together with its position for
    /// proximity queries.
    pub fn register_boundary_object_at(
        &self,
        map: MapId,
        partition: PartitionId,
        entity: EntityId,
        pos: Vec2,
    ) {
        self.boundary.write(map).insert_at(map, partition, entity, pos);
    }

    pub fn unregister_boundary_object(&self, map: MapId, partition: PartitionId, entity: EntityId) {
        if self.boundary.write(map).remove(map, partition, entity) {
            tracing::debug!(target: "strata::partition", entity = %entity, map = %map, partition = %partition, "boundary object unregistered");
        }
    }

    pub fn batch_unregister_boundary_objects(&self, map: MapId, entries: &[(PartitionId, EntityId)]) {
        let mut stripe = self.boundary.write(map);
        for &(partition, entity) in entries {
            stripe.remove(map, partition, entity);
        }
    }

    pub fn is_object_in_boundary_set(
        &self,
        map: MapId,
        partition: PartitionId,
        entity: EntityId,
    ) -> bool {
        self.boundary.read(map).contains(map, partition, entity)
    }

    pub fn boundary_count(&self, map: MapId, partition: PartitionId) -> usize {
        self.boundary.read(map).count(map, partition)
    }

    pub fn boundary_object_ids(&self, map: MapId, partition: PartitionId) -> Vec<EntityId> {
        self.boundary.read(map).ids(map, partition)
    }

    pub fn update_boundary_object_position(&self, map: MapId, entity: EntityId, pos: Vec2) -> bool {
        self.boundary.write(map).update_position(map, entity, pos)
    }

    /// Move many tracked objects under one stripe lock. Returns how many were tracked.
    pub fn batch_update_boundary_positions(&self, map: MapId, updates: &[(EntityId, Vec2)]) -> usize {
        let mut stripe = self.boundary.write(map);
        updates
            .iter()
            .filter(|(entity, pos)| stripe.update_position(map, *entity, *pos))
            .count()
    }

    pub fn nearby_boundary_objects(&self, map: MapId, center: Vec2, radius: f32) -> Vec<EntityId> {
        self.boundary.read(map).nearby(map, center, radius)
    }

    /// Boundary placements across every map, taken under all stripes at once.
    pub fn total_boundary_objects(&self) -> usize {
        self.boundary.read_all().iter().map(|s| s.total()).sum()
    }

    pub fn notify_visibility_attach(&self, entity: EntityId, map: MapId, partition: PartitionId) {
        self.visibility.write(map).attach(map, partition, entity);
        tracing::debug!(target: "strata::partition", entity = %entity, map = %map, partition = %partition, "visibility attach");
    }

    pub fn notify_visibility_detach(&self, entity: EntityId, map: MapId, partition: PartitionId) {
        self.visibility.write(map).detach(map, partition, entity);
        tracing::debug!(target: "strata::partition", entity = %entity, map = %map, partition = %partition, "visibility detach");
    }

    pub fn visibility_count(&self, map: MapId, partition: PartitionId) -> usize {
        self.visibility.read(map).count(map, partition)
    }

    // ---- handoffs ----

    pub fn record_combat_handoff(&self, map: MapId) {
        lock(&self.handoffs).entry(map).or_default().combat += 1;
    }

    pub fn record_path_handoff(&self, map: MapId) {
        lock(&self.handoffs).entry(map).or_default().path += 1;
    }

    /// Read and reset the combat handoff counter of `map`.
    pub fn consume_combat_handoffs(&self, map: MapId) -> u32 {
        lock(&self.handoffs)
            .get_mut(&map)
            .map_or(0, |c| std::mem::take(&mut c.combat))
    }

    pub fn consume_path_handoffs(&self, map: MapId) -> u32 {
        lock(&self.handoffs)
            .get_mut(&map)
            .map_or(0, |c| std::mem::take(&mut c.path))
    }

    // ---- stats and density ----

    pub fn update_partition_stats(&self, map: MapId, partition: PartitionId, stats: PartitionStats) {
        if let Some(p) = read(&self.state).maps.get(&map).and_then(|m| m.partition(partition)) {
            p.set_counts(stats);
        }
    }

    pub fn update_partition_player_count(&self, map: MapId, partition: PartitionId, players: u32) {
        if let Some(p) = read(&self.state).maps.get(&map).and_then(|m| m.partition(partition)) {
            p.set_players(players);
        }
    }

    pub fn update_partition_creature_count(&self, map: MapId, partition: PartitionId, creatures: u32) {
        if let Some(p) = read(&self.state).maps.get(&map).and_then(|m| m.partition(partition)) {
            p.set_creatures(creatures);
        }
    }

    pub fn update_partition_boundary_count(&self, map: MapId, partition: PartitionId, objects: u32) {
        if let Some(p) = read(&self.state).maps.get(&map).and_then(|m| m.partition(partition)) {
            p.set_boundary_objects(objects);
        }
    }

    pub fn partition_stats(&self, map: MapId, partition: PartitionId) -> Option<PartitionStats> {
        read(&self.state)
            .maps
            .get(&map)
            .and_then(|m| m.partition(partition))
            .map(Partition::stats)
    }

    /// Grow or shrink the partition count of `map` by one based on reported
    /// density. Returns the new count when a resize happened.
    pub fn evaluate_partition_density(&self, map: MapId) -> Option<u32> {
        let cfg = self.config();
        let now = self.now_ms();
        let mut state = write(&self.state);
        let entry = state.maps.get_mut(&map)?;
        if entry
            .last_resize_ms
            .is_some_and(|last| now.saturating_sub(last) < RESIZE_COOLDOWN_MS)
        {
            return None;
        }
        let stats: Vec<PartitionStats> = entry.partitions.iter().map(Partition::stats).collect();
        let (new_count, direction) = match density::evaluate(&stats, &cfg.partitions) {
            ResizeDecision::Keep => return None,
            ResizeDecision::Split(n) => (n, "split"),
            ResizeDecision::Merge(n) => (n, "merge"),
        };
        let old_count = entry.layout.count;
        *entry = MapPartitions::new(map, new_count);
        entry.last_resize_ms = Some(now);
        drop(state);
        self.bump_epoch();
        tracing::info!(
            target: "strata::partition",
            map = %map,
            from = old_count,
            to = new_count,
            direction,
            "partition layout resized"
        );
        Some(new_count)
    }

    /// Periodic upkeep for one map: expire overrides and stale relocations,
    /// then evaluate density at most every few seconds.
    pub fn update(&self, map: MapId, elapsed_ms: u64) {
        let _span = tracing::debug_span!("partition_update", map = %map, elapsed_ms).entered();
        if !self.is_enabled() {
            return;
        }
        let now = self.now_ms();
        let expired = lock(&self.overrides).purge_expired(now);
        let rolled_back = lock(&self.relocations)
            .expire(now, RELOCATION_TIMEOUT_MS)
            .len();

        let due = {
            let mut checks = lock(&self.density_checks);
            let due = checks
                .get(&map)
                .is_none_or(|last| now.saturating_sub(*last) >= DENSITY_CHECK_INTERVAL_MS);
            if due {
                checks.insert(map, now);
            }
            due
        };
        if due {
            self.evaluate_partition_density(map);
        }
        tracing::trace!(expired, rolled_back, "partition update complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{ManualClock, PartitionConfig};
    use strata_kernel::SimWorld;
    use strata_persist::{InlineGateway, RecordStore};

    fn config(maps: &[u32], count: u32) -> EngineConfig {
        EngineConfig {
            partitions: PartitionConfig {
                enabled: true,
                default_count: count,
                maps: maps.iter().map(|&m| MapId(m)).collect(),
                ..PartitionConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn engine(cfg: EngineConfig) -> (Arc<PartitionEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = Arc::new(PartitionEngine::new(Arc::new(cfg), clock.clone()));
        engine.initialize();
        (engine, clock)
    }

    #[test]
    fn initialize_registers_configured_maps() {
        let (e, _) = engine(config(&[0, 1], 4));
        assert!(e.is_map_partitioned(MapId(0)));
        assert!(!e.is_map_partitioned(MapId(2)));
        assert_eq!(e.partition_count(MapId(1)), 4);
        assert_eq!(e.partition_count(MapId(2)), 0);
        assert!(e.layout_epoch() >= 2);
    }

    #[test]
    fn disabled_engine_registers_nothing() {
        let mut cfg = config(&[0], 4);
        cfg.partitions.enabled = false;
        let (e, _) = engine(cfg);
        assert!(!e.is_map_partitioned(MapId(0)));
        assert_eq!(e.partition_for_position(MapId(0), 100.0, 100.0), PartitionId(1));
    }

    #[test]
    fn unpartitioned_map_resolves_to_first() {
        let (e, _) = engine(config(&[0], 4));
        assert_eq!(e.partition_for_position(MapId(9), 5_000.0, 5_000.0), PartitionId::FIRST);
        assert!(!e.is_near_partition_boundary(MapId(9), 0.0, 0.0));
    }

    #[test]
    fn ownership_beats_override_beats_geometry() {
        let (e, clock) = engine(config(&[0], 4));
        let entity = EntityId(42);
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(1));

        e.set_partition_override(entity, MapId(0), PartitionId(3), 2_000);
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(3));

        e.persist_partition_ownership(entity, MapId(0), PartitionId(4));
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(4));
        assert_eq!(e.persistent_partition(entity, MapId(1)), None);

        clock.advance(2_001);
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(4));
    }

    #[test]
    fn override_expires() {
        let (e, clock) = engine(config(&[0], 4));
        let entity = EntityId(7);
        e.set_partition_override(entity, MapId(0), PartitionId(3), 500);
        clock.advance(500);
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(3));
        clock.advance(1);
        assert_eq!(e.partition_for_entity(MapId(0), -100.0, -100.0, entity), PartitionId(1));
    }

    #[test]
    fn excluded_zone_resolves_to_first() {
        let mut cfg = config(&[0], 4);
        cfg.partitions.excluded_zones.insert(ZoneId(1519));
        let (e, _) = engine(cfg);
        assert!(e.is_zone_excluded(ZoneId(1519)));
        assert!(e.is_zone_excluded(ZoneId(1519)));
        assert!(!e.is_zone_excluded(ZoneId(12)));
        assert_eq!(
            e.partition_for_zone(MapId(0), ZoneId(1519), 100.0, 100.0, None),
            PartitionId(1)
        );
        assert_eq!(
            e.partition_for_zone(MapId(0), ZoneId(12), 100.0, 100.0, Some(EntityId(1))),
            PartitionId(4)
        );
    }

    #[test]
    fn tile_based_count_uses_world_tiles() {
        let world = Arc::new(SimWorld::new());
        world.set_tile_count(MapId(0), 100);
        world.set_tile_count(MapId(1), 1_000);
        let mut cfg = config(&[0, 1, 2], 4);
        cfg.partitions.tile_based = true;
        cfg.partitions.tiles_per_partition = 16;
        cfg.partitions.max_count = 9;
        cfg.partitions.count_overrides.insert(MapId(2), 2);
        let e = PartitionEngine::new(Arc::new(cfg), Arc::new(ManualClock::new(0))).with_world(world);
        assert_eq!(e.compute_partition_count(MapId(0)), 7);
        assert_eq!(e.compute_partition_count(MapId(1)), 9);
        assert_eq!(e.compute_partition_count(MapId(2)), 2);
        assert_eq!(e.compute_partition_count(MapId(3)), 4);
    }

    #[test]
    fn relocation_is_exclusive() {
        let (e, _) = engine(config(&[0], 4));
        let entity = EntityId(3);
        assert!(e.begin_relocation(entity, MapId(0), PartitionId(1), PartitionId(2)));
        assert!(!e.begin_relocation(entity, MapId(0), PartitionId(2), PartitionId(3)));
        assert_eq!(e.relocation(entity).map(|t| t.to), Some(PartitionId(2)));
        assert!(e.commit_relocation(entity));
        assert!(!e.commit_relocation(entity));
        assert!(e.begin_relocation(entity, MapId(0), PartitionId(2), PartitionId(3)));
        e.rollback_relocation(entity);
        assert!(e.relocation(entity).is_none());
    }

    #[test]
    fn update_expires_stale_relocations_and_overrides() {
        let (e, clock) = engine(config(&[0], 4));
        e.begin_relocation(EntityId(1), MapId(0), PartitionId(1), PartitionId(2));
        e.set_partition_override(EntityId(2), MapId(0), PartitionId(2), 100);
        clock.advance(600);
        e.update(MapId(0), 600);
        assert!(e.relocation(EntityId(1)).is_none());
        assert!(!e.clear_partition_override(EntityId(2)));
    }

    #[test]
    fn boundary_and_visibility_sets() {
        let (e, _) = engine(config(&[0, 16], 4));
        let (m, p) = (MapId(0), PartitionId(2));
        e.register_boundary_object(m, p, EntityId(1));
        e.register_boundary_object(MapId(16), p, EntityId(2));
        assert!(e.is_object_in_boundary_set(m, p, EntityId(1)));
        assert!(!e.is_object_in_boundary_set(m, p, EntityId(2)));
        assert_eq!(e.boundary_count(m, p), 1);
        assert_eq!(e.total_boundary_objects(), 2);
        e.unregister_boundary_object(m, p, EntityId(1));
        assert_eq!(e.boundary_object_ids(m, p), Vec::<EntityId>::new());

        e.notify_visibility_attach(EntityId(5), m, p);
        e.notify_visibility_attach(EntityId(6), m, p);
        e.notify_visibility_detach(EntityId(5), m, p);
        assert_eq!(e.visibility_count(m, p), 1);
        assert_eq!(e.visibility_count(MapId(16), p), 0);
    }

    #[test]
    fn boundary_positions_and_batches() {
        let (e, _) = engine(config(&[0], 4));
        let m = MapId(0);
        e.register_boundary_object_at(m, PartitionId(1), EntityId(1), Vec2::new(-10.0, -10.0));
        e.register_boundary_object_at(m, PartitionId(2), EntityId(2), Vec2::new(10.0, -10.0));
        let mut near = e.nearby_boundary_objects(m, Vec2::ZERO, 20.0);
        near.sort();
        assert_eq!(near, vec![EntityId(1), EntityId(2)]);

        let moved = e.batch_update_boundary_positions(
            m,
            &[(EntityId(1), Vec2::new(-3_000.0, 0.0)), (EntityId(9), Vec2::ZERO)],
        );
        assert_eq!(moved, 1);
        assert_eq!(e.nearby_boundary_objects(m, Vec2::ZERO, 20.0), vec![EntityId(2)]);

        e.batch_unregister_boundary_objects(m, &[(PartitionId(1), EntityId(1)), (PartitionId(2), EntityId(2))]);
        assert!(e.nearby_boundary_objects(m, Vec2::ZERO, 10_000.0).is_empty());
    }

    #[test]
    fn handoff_counters_consume_and_reset() {
        let (e, _) = engine(config(&[0], 4));
        e.record_combat_handoff(MapId(0));
        e.record_combat_handoff(MapId(0));
        e.record_path_handoff(MapId(0));
        assert_eq!(e.consume_combat_handoffs(MapId(0)), 2);
        assert_eq!(e.consume_combat_handoffs(MapId(0)), 0);
        assert_eq!(e.consume_path_handoffs(MapId(0)), 1);
        assert_eq!(e.consume_path_handoffs(MapId(5)), 0);
    }

    #[test]
    fn ownership_loads_and_writes_through_on_change() {
        let mut store = RecordStore::in_memory();
        for (entity, map, partition) in [(1u64, 0u32, 2u32), (2, 7, 3), (3, 0, 0)] {
            store.put_ownership(OwnershipRecord {
                entity: EntityId(entity),
                map: MapId(map),
                partition: PartitionId(partition),
            });
        }
        let gateway = Arc::new(InlineGateway::new(store));
        let clock = Arc::new(ManualClock::new(0));
        let e = Arc::new(
            PartitionEngine::new(Arc::new(config(&[0], 4)), clock).with_persistence(gateway.clone()),
        );
        e.initialize();
        assert_eq!(e.persistent_partition(EntityId(1), MapId(0)), Some(PartitionId(2)));
        assert_eq!(e.persistent_partition(EntityId(2), MapId(7)), None);
        assert_eq!(e.persistent_partition(EntityId(3), MapId(0)), None);

        let shared = gateway.store();
        shared.lock().unwrap().checkpoint().unwrap();
        e.persist_partition_ownership(EntityId(1), MapId(0), PartitionId(2));
        assert!(!shared.lock().unwrap().is_dirty());
        e.persist_partition_ownership(EntityId(1), MapId(0), PartitionId(3));
        assert!(shared.lock().unwrap().is_dirty());
        let rows = shared.lock().unwrap().ownership_rows();
        assert!(rows.iter().any(|r| r.entity == EntityId(1) && r.partition == PartitionId(3)));
    }

    #[test]
    fn density_split_bumps_epoch_and_honours_cooldown() {
        let mut cfg = config(&[0], 2);
        cfg.partitions.density_split_threshold = 50.0;
        cfg.partitions.max_count = 4;
        let (e, clock) = engine(cfg);
        let epoch = e.layout_epoch();
        e.update_partition_player_count(MapId(0), PartitionId(1), 80);
        assert_eq!(e.evaluate_partition_density(MapId(0)), Some(3));
        assert_eq!(e.layout_epoch(), epoch + 1);
        assert_eq!(e.partition_count(MapId(0)), 3);

        e.update_partition_player_count(MapId(0), PartitionId(1), 80);
        clock.advance(5_000);
        assert_eq!(e.evaluate_partition_density(MapId(0)), None);
        clock.advance(5_000);
        assert_eq!(e.evaluate_partition_density(MapId(0)), Some(4));
    }

    #[test]
    fn partition_stats_are_reported() {
        let (e, _) = engine(config(&[0], 4));
        e.update_partition_stats(
            MapId(0),
            PartitionId(2),
            PartitionStats {
                players: 3,
                creatures: 4,
                boundary_objects: 1,
            },
        );
        e.update_partition_creature_count(MapId(0), PartitionId(2), 9);
        e.update_partition_boundary_count(MapId(0), PartitionId(2), 2);
        let stats = e.partition_stats(MapId(0), PartitionId(2)).unwrap();
        assert_eq!((stats.players, stats.creatures, stats.boundary_objects), (3, 9, 2));
        assert!(e.partition_stats(MapId(0), PartitionId(9)).is_none());
        assert_eq!(e.adjacent_partitions(MapId(0), PartitionId(1)).len(), 3);
    }

    #[test]
    fn clear_partitions_drops_map_state() {
        let (e, _) = engine(config(&[0], 4));
        e.register_boundary_object(MapId(0), PartitionId(1), EntityId(1));
        e.clear_partitions(MapId(0));
        assert!(!e.is_map_partitioned(MapId(0)));
        assert_eq!(e.boundary_count(MapId(0), PartitionId(1)), 0);
    }
}
