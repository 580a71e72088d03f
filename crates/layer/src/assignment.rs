use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strata_common::{EntityId, LayerId, MapId, TemplateId, ZoneId};

const EMPTY_SLOT: u64 = u64::MAX;

/// Packs `(map, layer)` as `[map:32][layer:32]`.
pub fn pack(map: MapId, layer: LayerId) -> u64 {
    (u64::from(map.0) << 32) | u64::from(layer.0)
}

pub fn unpack(packed: u64) -> (MapId, LayerId) {
    (MapId((packed >> 32) as u32), LayerId(packed as u32))
}

/// Lock-free reader of one player's assignment.
///
/// The slot is shared with the engine and updated on every move; it reads
/// `None` once the player has been removed.
#[derive(Debug, Clone)]
pub struct AssignmentHandle {
    slot: Arc<AtomicU64>,
}

impl AssignmentHandle {
    pub fn get(&self) -> Option<(MapId, LayerId)> {
        match self.slot.load(Ordering::Acquire) {
            EMPTY_SLOT => None,
            packed => Some(unpack(packed)),
        }
    }

    /// Layer on `map`, or `None` when the player is elsewhere.
    pub fn layer_on(&self, map: MapId) -> Option<LayerId> {
        self.get().filter(|(m, _)| *m == map).map(|(_, l)| l)
    }
}

#[derive(Debug)]
pub(crate) struct PlayerAssignment {
    pub map: MapId,
    pub layer: LayerId,
    slot: Arc<AtomicU64>,
}

/// Layer assignment of one NPC or game object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAssignment {
    pub map: MapId,
    pub zone: ZoneId,
    pub layer: LayerId,
    pub entry: TemplateId,
}

/// NPC or game-object assignments keyed by `(map, id)` with a reverse index
/// by `(map, layer)` for bulk purges.
#[derive(Debug, Default)]
pub(crate) struct ObjectIndex {
    assignments: HashMap<(MapId, EntityId), ObjectAssignment>,
    by_layer: HashMap<(MapId, LayerId), HashSet<EntityId>>,
}

impl ObjectIndex {
    pub fn assign(&mut self, id: EntityId, assignment: ObjectAssignment) {
        let key = (assignment.map, id);
        if let Some(old) = self.assignments.insert(key, assignment) {
            if old.layer != assignment.layer {
                self.unindex(old.map, old.layer, id);
            }
        }
        self.by_layer
            .entry((assignment.map, assignment.layer))
            .or_default()
            .insert(id);
    }

    pub fn remove(&mut self, map: MapId, id: EntityId) -> Option<ObjectAssignment> {
        let old = self.assignments.remove(&(map, id))?;
        self.unindex(old.map, old.layer, id);
        Some(old)
    }

    fn unindex(&mut self, map: MapId, layer: LayerId, id: EntityId) {
        if let Some(ids) = self.by_layer.get_mut(&(map, layer)) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_layer.remove(&(map, layer));
            }
        }
    }

    pub fn get(&self, map: MapId, id: EntityId) -> Option<ObjectAssignment> {
        self.assignments.get(&(map, id)).copied()
    }

    /// First assignment of `id` on any map. Walks the whole table.
    pub fn find_any_map(&self, id: EntityId) -> Option<ObjectAssignment> {
        self.assignments
            .iter()
            .filter(|((_, candidate), _)| *candidate == id)
            .min_by_key(|((map, _), _)| *map)
            .map(|(_, a)| *a)
    }

    /// Drop every assignment on `(map, layer)`. Returns how many went.
    pub fn purge_layer(&mut self, map: MapId, layer: LayerId) -> usize {
        let Some(ids) = self.by_layer.remove(&(map, layer)) else {
            return 0;
        };
        for id in &ids {
            self.assignments.remove(&(map, *id));
        }
        ids.len()
    }

    pub fn counts_by_zone(&self, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, u32>> {
        let mut out: BTreeMap<ZoneId, BTreeMap<LayerId, u32>> = BTreeMap::new();
        for a in self.assignments.values().filter(|a| a.map == map) {
            *out.entry(a.zone).or_default().entry(a.layer).or_default() += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }
}

/// Everything guarded by the engine's primary lock.
#[derive(Debug, Default)]
pub(crate) struct LayerState {
    pub layers: HashMap<MapId, BTreeMap<LayerId, HashSet<EntityId>>>,
    pub players: HashMap<EntityId, PlayerAssignment>,
    pub npcs: ObjectIndex,
    pub gos: ObjectIndex,
}

/// A player taken off their layer.
#[derive(Debug)]
pub(crate) struct Detached {
    pub map: MapId,
    pub layer: LayerId,
    /// The layer emptied and was retired; its clones must be despawned.
    pub retired: bool,
    slot: Arc<AtomicU64>,
}

impl LayerState {
    pub fn player_layer(&self, player: EntityId) -> Option<(MapId, LayerId)> {
        self.players.get(&player).map(|a| (a.map, a.layer))
    }

    pub fn layer_on(&self, map: MapId, player: EntityId) -> Option<LayerId> {
        self.players
            .get(&player)
            .filter(|a| a.map == map)
            .map(|a| a.layer)
    }

    pub fn layer_exists(&self, map: MapId, layer: LayerId) -> bool {
        self.layers
            .get(&map)
            .is_some_and(|layers| layers.contains_key(&layer))
    }

    /// `(layer, population)` pairs of `map`, ascending by layer id.
    pub fn counts(&self, map: MapId) -> Vec<(LayerId, u32)> {
        self.layers
            .get(&map)
            .map(|layers| {
                layers
                    .iter()
                    .map(|(id, players)| (*id, players.len() as u32))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn max_layer_id(&self, map: MapId) -> Option<LayerId> {
        self.layers
            .get(&map)
            .and_then(|layers| layers.keys().next_back().copied())
    }

    /// Take `player` off their layer and retire the layer if it emptied.
    pub fn detach(&mut self, player: EntityId) -> Option<Detached> {
        let assignment = self.players.remove(&player)?;
        if let Some(set) = self
            .layers
            .get_mut(&assignment.map)
            .and_then(|layers| layers.get_mut(&assignment.layer))
        {
            set.remove(&player);
        }
        let retired = self.cleanup_empty_layer(assignment.map, assignment.layer);
        Some(Detached {
            map: assignment.map,
            layer: assignment.layer,
            retired,
            slot: assignment.slot,
        })
    }

    /// Put `player` on `(map, layer)`, creating the layer record if needed.
    /// Returns true when the layer had no players before.
    pub fn attach(
        &mut self,
        player: EntityId,
        map: MapId,
        layer: LayerId,
        previous: Option<&Detached>,
    ) -> bool {
        let set = self
            .layers
            .entry(map)
            .or_default()
            .entry(layer)
            .or_default();
        let was_empty = set.is_empty();
        set.insert(player);
        let slot = previous
            .map(|d| Arc::clone(&d.slot))
            .unwrap_or_else(|| Arc::new(AtomicU64::new(EMPTY_SLOT)));
        slot.store(pack(map, layer), Ordering::Release);
        self.players
            .insert(player, PlayerAssignment { map, layer, slot });
        was_empty
    }

    /// Remove an empty non-base layer and purge the NPC and game-object
    /// assignments indexed under it. Returns true when the layer went away.
    pub fn cleanup_empty_layer(&mut self, map: MapId, layer: LayerId) -> bool {
        if layer.is_base() {
            return false;
        }
        let Some(layers) = self.layers.get_mut(&map) else {
            return false;
        };
        match layers.get(&layer) {
            Some(players) if players.is_empty() => {}
            _ => return false,
        }
        layers.remove(&layer);
        if layers.is_empty() {
            self.layers.remove(&map);
        }
        let npcs = self.npcs.purge_layer(map, layer);
        let gos = self.gos.purge_layer(map, layer);
        tracing::debug!(target: "strata::layer", map = %map, layer = %layer, npcs, gos, "empty layer retired");
        true
    }

    pub fn handle(&self, player: EntityId) -> Option<AssignmentHandle> {
        self.players.get(&player).map(|a| AssignmentHandle {
            slot: Arc::clone(&a.slot),
        })
    }
}

impl Detached {
    /// Mark the shared slot empty; the player is gone for good.
    pub fn release(self) -> (MapId, LayerId, bool) {
        self.slot.store(EMPTY_SLOT, Ordering::Release);
        (self.map, self.layer, self.retired)
    }
}
