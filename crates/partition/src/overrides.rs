use std::collections::HashMap;

use strata_common::{EntityId, MapId, PartitionId};

/// A temporary sticky partition for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOverride {
    pub map: MapId,
    pub partition: PartitionId,
    pub expires_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct OverrideTable {
    entries: HashMap<EntityId, PartitionOverride>,
}

impl OverrideTable {
    pub fn set(&mut self, entity: EntityId, entry: PartitionOverride) {
        self.entries.insert(entity, entry);
    }

    /// Live override of `entity` on `map`. An expired entry is erased.
    pub fn lookup(&mut self, entity: EntityId, map: MapId, now_ms: u64) -> Option<PartitionId> {
        let entry = *self.entries.get(&entity)?;
        if now_ms > entry.expires_at_ms {
            self.entries.remove(&entity);
            return None;
        }
        (entry.map == map).then_some(entry.partition)
    }

    pub fn clear(&mut self, entity: EntityId) -> bool {
        self.entries.remove(&entity).is_some()
    }

    pub fn clear_map(&mut self, map: MapId) {
        self.entries.retain(|_, e| e.map != map);
    }

    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now_ms <= e.expires_at_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(partition: u32, expires_at_ms: u64) -> PartitionOverride {
        PartitionOverride {
            map: MapId(0),
            partition: PartitionId(partition),
            expires_at_ms,
        }
    }

    #[test]
    fn override_lives_until_expiry() {
        let mut table = OverrideTable::default();
        table.set(EntityId(1), entry(3, 1_000));
        assert_eq!(table.lookup(EntityId(1), MapId(0), 1_000), Some(PartitionId(3)));
        assert_eq!(table.lookup(EntityId(1), MapId(1), 500), None);
        assert_eq!(table.lookup(EntityId(1), MapId(0), 1_001), None);
        assert!(table.is_empty());
    }

    #[test]
    fn purge_drops_expired_entries() {
        let mut table = OverrideTable::default();
        table.set(EntityId(1), entry(2, 10));
        table.set(EntityId(2), entry(2, 100));
        assert_eq!(table.purge_expired(50), 1);
        assert_eq!(table.len(), 1);
        assert!(table.clear(EntityId(2)));
    }
}
