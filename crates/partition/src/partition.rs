use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use strata_common::{MapId, PartitionId};

/// Density counters reported for one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub players: u32,
    pub creatures: u32,
    pub boundary_objects: u32,
}

impl PartitionStats {
    pub fn population(&self) -> u32 {
        self.players + self.creatures
    }
}

/// One spatial partition of a map. Counters are written by the simulation
/// under a shared lock, so they are atomics.
#[derive(Debug)]
pub struct Partition {
    map: MapId,
    id: PartitionId,
    players: AtomicU32,
    creatures: AtomicU32,
    boundary_objects: AtomicU32,
}

impl Partition {
    pub fn new(map: MapId, id: PartitionId) -> Self {
        Self {
            map,
            id,
            players: AtomicU32::new(0),
            creatures: AtomicU32::new(0),
            boundary_objects: AtomicU32::new(0),
        }
    }

    pub fn map(&self) -> MapId {
        self.map
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn set_counts(&self, stats: PartitionStats) {
        self.set_players(stats.players);
        self.set_creatures(stats.creatures);
        self.set_boundary_objects(stats.boundary_objects);
    }

    pub fn set_players(&self, n: u32) {
        self.players.store(n, Ordering::Relaxed);
    }

    pub fn set_creatures(&self, n: u32) {
        self.creatures.store(n, Ordering::Relaxed);
    }

    pub fn set_boundary_objects(&self, n: u32) {
        self.boundary_objects.store(n, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            players: self.players.load(Ordering::Relaxed),
            creatures: self.creatures.load(Ordering::Relaxed),
            boundary_objects: self.boundary_objects.load(Ordering::Relaxed),
        }
    }
}
