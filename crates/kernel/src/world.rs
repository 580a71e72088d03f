use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use strata_common::sync::lock;
use strata_common::{EntityId, GridCell, InstanceId, LayerId, MapId, SpawnId};

use crate::gateway::{
    CellSpawns, CloneKind, EntityDirectory, EntityInfo, InstanceRef, WorldGateway,
};

/// A side effect the engines asked the simulation to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    CloneSpawned {
        instance: InstanceRef,
        kind: CloneKind,
        spawn: SpawnId,
        layer: LayerId,
    },
    ClonesDespawned {
        instance: InstanceRef,
        layer: LayerId,
        count: usize,
    },
    VisibilityRebuilt {
        entity: EntityId,
    },
    ChatSent {
        entity: EntityId,
        text: String,
    },
}

/// Arena key of one layer clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CloneKey {
    instance: InstanceRef,
    layer: LayerId,
    kind: CloneKind,
    spawn: SpawnId,
}

#[derive(Debug, Default)]
struct SimState {
    entities: BTreeMap<EntityId, EntityInfo>,
    instances: BTreeMap<MapId, Vec<InstanceRef>>,
    loaded_grids: BTreeSet<(InstanceRef, GridCell, LayerId)>,
    spawns: BTreeMap<(MapId, u8, u32), CellSpawns>,
    clones: BTreeSet<CloneKey>,
    tiles: BTreeMap<MapId, u32>,
    event_log: Vec<SimEvent>,
}

/// Deterministic in-memory world.
///
/// Implements both [`EntityDirectory`] and [`WorldGateway`]. Every side effect
/// requested through the gateway lands in an append-only event log, and
/// clones live in an arena keyed by `(instance, layer, kind, spawn)`.
/// BTree collections keep iteration order stable across runs.
#[derive(Debug, Default)]
pub struct SimWorld {
    state: Mutex<SimState>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub fn upsert_entity(&self, info: EntityInfo) {
        lock(&self.state).entities.insert(info.id, info);
    }

    /// Mutate an entity in place. Returns false if it does not exist.
    pub fn update_entity(&self, id: EntityId, f: impl FnOnce(&mut EntityInfo)) -> bool {
        match lock(&self.state).entities.get_mut(&id) {
            Some(info) => {
                f(info);
                true
            }
            None => false,
        }
    }

    pub fn remove_entity(&self, id: EntityId) -> Option<EntityInfo> {
        let removed = lock(&self.state).entities.remove(&id);
        if removed.is_some() {
            tracing::trace!(target: "strata::kernel", entity = %id, "entity removed");
        }
        removed
    }

    pub fn entity_count(&self) -> usize {
        lock(&self.state).entities.len()
    }

    /// Register a live instance of `map`.
    pub fn add_instance(&self, map: MapId, instance: InstanceId, spawn_mode: u8) -> InstanceRef {
        let inst = InstanceRef {
            map,
            instance,
            spawn_mode,
        };
        let mut state = lock(&self.state);
        let list = state.instances.entry(map).or_default();
        if !list.contains(&inst) {
            list.push(inst);
            tracing::debug!(target: "strata::kernel", map = %map, instance = instance.0, spawn_mode, "instance registered");
        }
        inst
    }

    /// Mark a base-layer grid cell as loaded, as the simulation would when a
    /// player first walks into it.
    pub fn load_grid(&self, instance: InstanceRef, cell: GridCell) {
        lock(&self.state)
            .loaded_grids
            .insert((instance, cell, LayerId::BASE));
    }

    pub fn add_spawns(
        &self,
        map: MapId,
        spawn_mode: u8,
        cell: GridCell,
        creatures: &[SpawnId],
        game_objects: &[SpawnId],
    ) {
        let mut state = lock(&self.state);
        let entry = state
            .spawns
            .entry((map, spawn_mode, cell.grid_id()))
            .or_default();
        entry.creatures.extend_from_slice(creatures);
        entry.game_objects.extend_from_slice(game_objects);
    }

    pub fn set_tile_count(&self, map: MapId, tiles: u32) {
        lock(&self.state).tiles.insert(map, tiles);
    }

    /// Number of live clones tagged with `layer` on any instance of `map`.
    pub fn clone_count(&self, map: MapId, layer: LayerId) -> usize {
        lock(&self.state)
            .clones
            .iter()
            .filter(|k| k.instance.map == map && k.layer == layer)
            .count()
    }

    pub fn total_clones(&self) -> usize {
        lock(&self.state).clones.len()
    }

    /// Chat lines delivered to `entity`, oldest first.
    pub fn chat_for(&self, entity: EntityId) -> Vec<String> {
        lock(&self.state)
            .event_log
            .iter()
            .filter_map(|e| match e {
                SimEvent::ChatSent { entity: to, text } if *to == entity => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drain and return the event log.
    pub fn drain_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut lock(&self.state).event_log)
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.state).event_log.clone()
    }
}

impl EntityDirectory for SimWorld {
    fn resolve(&self, id: EntityId) -> Option<EntityInfo> {
        lock(&self.state).entities.get(&id).cloned()
    }
}

impl WorldGateway for SimWorld {
    fn live_instances(&self, map: MapId) -> Vec<InstanceRef> {
        lock(&self.state)
            .instances
            .get(&map)
            .cloned()
            .unwrap_or_default()
    }

    fn is_grid_loaded(&self, instance: InstanceRef, cell: GridCell, layer: LayerId) -> bool {
        lock(&self.state)
            .loaded_grids
            .contains(&(instance, cell, layer))
    }

    fn mark_grid_loaded(&self, instance: InstanceRef, cell: GridCell, layer: LayerId) {
        lock(&self.state).loaded_grids.insert((instance, cell, layer));
    }

    fn enumerate_spawns(&self, map: MapId, spawn_mode: u8, grid_id: u32) -> CellSpawns {
        lock(&self.state)
            .spawns
            .get(&(map, spawn_mode, grid_id))
            .cloned()
            .unwrap_or_default()
    }

    fn clone_exists(
        &self,
        instance: InstanceRef,
        kind: CloneKind,
        spawn: SpawnId,
        layer: LayerId,
    ) -> bool {
        lock(&self.state).clones.contains(&CloneKey {
            instance,
            layer,
            kind,
            spawn,
        })
    }

    fn spawn_clone(
        &self,
        instance: InstanceRef,
        kind: CloneKind,
        spawn: SpawnId,
        layer: LayerId,
    ) -> bool {
        let mut state = lock(&self.state);
        let registered = state
            .instances
            .get(&instance.map)
            .is_some_and(|list| list.contains(&instance));
        if !registered {
            tracing::warn!(target: "strata::kernel", map = %instance.map, instance = instance.instance.0, layer = %layer, ?kind, "clone spawn on unknown instance");
            return false;
        }
        let inserted = state.clones.insert(CloneKey {
            instance,
            layer,
            kind,
            spawn,
        });
        if inserted {
            tracing::trace!(target: "strata::kernel", map = %instance.map, layer = %layer, ?kind, spawn = spawn.0, "clone spawned");
            state.event_log.push(SimEvent::CloneSpawned {
                instance,
                kind,
                spawn,
                layer,
            });
        }
        inserted
    }

    fn despawn_clones_matching(&self, instance: InstanceRef, layer: LayerId) -> usize {
        let mut state = lock(&self.state);
        let before = state.clones.len();
        state
            .clones
            .retain(|k| !(k.instance == instance && k.layer == layer));
        let count = before - state.clones.len();
        tracing::debug!(target: "strata::kernel", map = %instance.map, instance = instance.instance.0, layer = %layer, count, "clones despawned");
        if !layer.is_base() {
            state
                .loaded_grids
                .retain(|(inst, _, l)| !(*inst == instance && *l == layer));
        }
        state.event_log.push(SimEvent::ClonesDespawned {
            instance,
            layer,
            count,
        });
        count
    }

    fn rebuild_visibility(&self, entity: EntityId) {
        lock(&self.state)
            .event_log
            .push(SimEvent::VisibilityRebuilt { entity });
    }

    fn notify_chat(&self, entity: EntityId, text: &str) {
        lock(&self.state).event_log.push(SimEvent::ChatSent {
            entity,
            text: text.to_string(),
        });
    }

    fn map_tile_count(&self, map: MapId) -> Option<u32> {
        lock(&self.state).tiles.get(&map).copied()
    }
}
