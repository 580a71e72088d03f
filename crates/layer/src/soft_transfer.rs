use std::collections::BTreeMap;

use strata_common::{EntityId, LayerId, MapId};

/// A layer move deferred to the player's next loading screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftTransfer {
    pub map: MapId,
    pub source: LayerId,
    pub target: LayerId,
    pub queued_at_ms: u64,
    pub reason: &'static str,
}

/// At most one pending soft transfer per player.
#[derive(Debug, Default)]
pub(crate) struct SoftTransferQueue {
    entries: BTreeMap<EntityId, SoftTransfer>,
}

impl SoftTransferQueue {
    /// Queue or replace the entry of `player`.
    pub fn queue(&mut self, player: EntityId, entry: SoftTransfer) {
        self.entries.insert(player, entry);
    }

    /// Queue unless `player` already has an entry. Returns true if queued.
    pub fn queue_if_absent(&mut self, player: EntityId, entry: SoftTransfer) -> bool {
        if self.entries.contains_key(&player) {
            return false;
        }
        self.entries.insert(player, entry);
        true
    }

    pub fn take(&mut self, player: EntityId) -> Option<SoftTransfer> {
        self.entries.remove(&player)
    }

    pub fn contains(&self, player: EntityId) -> bool {
        self.entries.contains_key(&player)
    }

    pub fn get(&self, player: EntityId) -> Option<&SoftTransfer> {
        self.entries.get(&player)
    }

    /// Remove and return every entry queued at least `timeout_ms` ago.
    pub fn take_expired(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<(EntityId, SoftTransfer)> {
        let expired: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms >= e.queued_at_ms.saturating_add(timeout_ms))
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e)))
            .collect()
    }

    /// Target layers of the entries heading somewhere on `map`.
    pub fn targets(&self, map: MapId) -> Vec<LayerId> {
        self.entries
            .values()
            .filter(|e| e.map == map)
            .map(|e| e.target)
            .collect()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.keys().copied().collect()
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

    fn entry(queued_at_ms: u64) -> SoftTransfer {
        SoftTransfer {
            map: MapId(0),
            source: LayerId(1),
            target: LayerId::BASE,
            queued_at_ms,
            reason: "rebalance",
        }
    }

    #[test]
    fn one_entry_per_player() {
        let mut q = SoftTransferQueue::default();
        assert!(q.queue_if_absent(EntityId(1), entry(0)));
        assert!(!q.queue_if_absent(EntityId(1), entry(5)));
        q.queue(EntityId(1), entry(10));
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(EntityId(1)).map(|e| e.queued_at_ms), Some(10));
    }

    #[test]
    fn expiry_is_inclusive() {
        let mut q = SoftTransferQueue::default();
        q.queue(EntityId(1), entry(0));
        q.queue(EntityId(2), entry(100));
        assert!(q.take_expired(599_999, 600_000).is_empty());
        let expired = q.take_expired(600_000, 600_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, EntityId(1));
        assert!(q.contains(EntityId(2)));
        assert!(!q.contains(EntityId(1)));
    }
}
