use std::collections::HashMap;

use serde::Serialize;
use strata_common::{EntityId, MapId, PartitionId};

/// Relocations older than this are rolled back by the periodic sweep.
pub const RELOCATION_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelocationState {
    Locked,
    Committed,
    RolledBack,
}

/// An in-flight partition handoff of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelocationTxn {
    pub entity: EntityId,
    pub map: MapId,
    pub from: PartitionId,
    pub to: PartitionId,
    pub state: RelocationState,
    pub started_at_ms: u64,
}

/// At most one transaction per entity.
#[derive(Debug, Default)]
pub struct RelocationTable {
    active: HashMap<EntityId, RelocationTxn>,
}

impl RelocationTable {
    /// Record a new `Locked` transaction. Returns false if one is already in flight.
    pub fn begin(
        &mut self,
        entity: EntityId,
        map: MapId,
        from: PartitionId,
        to: PartitionId,
        now_ms: u64,
    ) -> bool {
        if let Some(existing) = self.active.get(&entity) {
            tracing::warn!(
                target: "strata::partition",
                entity = %entity,
                map = %existing.map,
                from = %existing.from,
                to = %existing.to,
                "relocation already in progress"
            );
            return false;
        }
        self.active.insert(
            entity,
            RelocationTxn {
                entity,
                map,
                from,
                to,
                state: RelocationState::Locked,
                started_at_ms: now_ms,
            },
        );
        tracing::debug!(target: "strata::partition", entity = %entity, map = %map, from = %from, to = %to, "relocation locked");
        true
    }

    /// Finish a transaction successfully.
    pub fn commit(&mut self, entity: EntityId, now_ms: u64) -> Option<RelocationTxn> {
        let mut txn = self.active.remove(&entity)?;
        txn.state = RelocationState::Committed;
        tracing::debug!(
            target: "strata::partition",
            entity = %entity,
            map = %txn.map,
            from = %txn.from,
            to = %txn.to,
            duration_ms = now_ms.saturating_sub(txn.started_at_ms),
            "relocation committed"
        );
        Some(txn)
    }

    /// Abandon a transaction.
    pub fn rollback(&mut self, entity: EntityId, now_ms: u64) -> Option<RelocationTxn> {
        let mut txn = self.active.remove(&entity)?;
        txn.state = RelocationState::RolledBack;
        tracing::warn!(
            target: "strata::partition",
            entity = %entity,
            map = %txn.map,
            from = %txn.from,
            to = %txn.to,
            duration_ms = now_ms.saturating_sub(txn.started_at_ms),
            "relocation rolled back"
        );
        Some(txn)
    }

    pub fn get(&self, entity: EntityId) -> Option<RelocationTxn> {
        self.active.get(&entity).copied()
    }

    /// Roll back every transaction older than `timeout_ms`.
    pub fn expire(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<RelocationTxn> {
        let stale: Vec<EntityId> = self
            .active
            .values()
            .filter(|t| now_ms.saturating_sub(t.started_at_ms) > timeout_ms)
            .map(|t| t.entity)
            .collect();
        stale
            .into_iter()
            .filter_map(|entity| self.rollback(entity, now_ms))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
