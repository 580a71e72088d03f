use std::collections::BTreeMap;

use strata_common::{EntityId, LayerId, MapId};

/// Attempts before a pending assignment is abandoned.
pub const PENDING_MAX_RETRIES: u32 = 30;
pub const PENDING_RETRY_DELAY_MS: u64 = 1_000;

/// A layer switch waiting for the player to finish joining the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAssignment {
    pub map: MapId,
    pub layer: LayerId,
    pub ready_at_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: BTreeMap<EntityId, PendingAssignment>,
}

impl PendingQueue {
    pub fn queue(&mut self, player: EntityId, entry: PendingAssignment) {
        self.entries.insert(player, entry);
    }

    pub fn take_ready(&mut self, now_ms: u64) -> Vec<(EntityId, PendingAssignment)> {
        let ready: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms >= e.ready_at_ms)
            .map(|(id, _)| *id)
            .collect();
        ready
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e)))
            .collect()
    }

    pub fn remove(&mut self, player: EntityId) -> Option<PendingAssignment> {
        self.entries.remove(&player)
    }

    pub fn get(&self, player: EntityId) -> Option<PendingAssignment> {
        self.entries.get(&player).copied()
    }

    pub fn targets(&self, map: MapId) -> Vec<LayerId> {
        self.entries
            .values()
            .filter(|e| e.map == map)
            .map(|e| e.layer)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ready_entries_are_taken() {
        let mut q = PendingQueue::default();
        for (id, ready) in [(1, 100), (2, 200)] {
            q.queue(
                EntityId(id),
                PendingAssignment {
                    map: MapId(0),
                    layer: LayerId(1),
                    ready_at_ms: ready,
                    retries: 0,
                },
            );
        }
        let ready = q.take_ready(150);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, EntityId(1));
        assert_eq!(q.len(), 1);
        assert!(q.get(EntityId(2)).is_some());
    }
}
