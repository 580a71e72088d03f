use strata_common::sync::TtlCache;
use strata_common::{EntityId, MapId, PartitionId};

use crate::engine::PartitionEngine;

pub const LOOKUP_CACHE_TTL_MS: u64 = 250;
const LOOKUP_CACHE_CAPACITY: usize = 1024;

/// Per-caller memo of entity partition lookups.
///
/// Entries carry the layout epoch they were computed under and are ignored
/// once the engine's epoch moves on, so a resize never serves stale ids.
pub struct PartitionLookupCache {
    entries: TtlCache<(EntityId, MapId), (PartitionId, u64)>,
}

impl Default for PartitionLookupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionLookupCache {
    pub fn new() -> Self {
        Self {
            entries: TtlCache::new(LOOKUP_CACHE_TTL_MS, LOOKUP_CACHE_CAPACITY),
        }
    }

    pub fn lookup(
        &mut self,
        engine: &PartitionEngine,
        map: MapId,
        x: f32,
        y: f32,
        entity: EntityId,
    ) -> PartitionId {
        let now = engine.now_ms();
        let epoch = engine.layout_epoch();
        if let Some((partition, cached_epoch)) = self.entries.get(&(entity, map), now) {
            if cached_epoch == epoch {
                return partition;
            }
        }
        let partition = engine.partition_for_entity(map, x, y, entity);
        self.entries.insert((entity, map), (partition, epoch), now);
        partition
    }

    pub fn invalidate(&mut self, entity: EntityId, map: MapId) {
        self.entries.invalidate(&(entity, map));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
