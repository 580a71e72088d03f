use serde::{Deserialize, Serialize};
use strata_common::{
    EntityId, GridCell, InstanceId, LayerId, MapId, PartitionId, SpawnId, TemplateId, ZoneId,
};

/// A pet, guardian or charmed unit that follows its owner between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlledUnit {
    pub id: EntityId,
    pub zone: ZoneId,
    pub entry: TemplateId,
}

/// Snapshot of a live entity as the engines need to see it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub map: MapId,
    pub zone: ZoneId,
    pub in_world: bool,
    pub in_combat: bool,
    pub dead: bool,
    pub bot: bool,
    /// Leader of the entity's group, `None` when ungrouped.
    pub group_leader: Option<EntityId>,
    pub controlled: Vec<ControlledUnit>,
}

impl EntityInfo {
    pub fn player(id: EntityId, map: MapId, zone: ZoneId) -> Self {
        Self {
            id,
            map,
            zone,
            in_world: true,
            ..Self::default()
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_leader.is_some()
    }

    pub fn is_group_leader(&self) -> bool {
        self.group_leader == Some(self.id)
    }
}

/// Resolves entity ids to live entity snapshots.
pub trait EntityDirectory: Send + Sync {
    fn resolve(&self, id: EntityId) -> Option<EntityInfo>;
}

/// One live copy of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef {
    pub map: MapId,
    pub instance: InstanceId,
    pub spawn_mode: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CloneKind {
    Creature,
    GameObject,
}

/// Spawn definitions registered for one grid cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSpawns {
    pub creatures: Vec<SpawnId>,
    pub game_objects: Vec<SpawnId>,
}

/// The simulation side of the engines: content, clones and notifications.
///
/// Engines call into the gateway only after releasing their own locks, and
/// an implementation must not call back into an engine while holding its
/// own map or instance locks.
pub trait WorldGateway: Send + Sync {
    fn live_instances(&self, map: MapId) -> Vec<InstanceRef>;
    fn is_grid_loaded(&self, instance: InstanceRef, cell: GridCell, layer: LayerId) -> bool;
    fn mark_grid_loaded(&self, instance: InstanceRef, cell: GridCell, layer: LayerId);
    fn enumerate_spawns(&self, map: MapId, spawn_mode: u8, grid_id: u32) -> CellSpawns;
    fn clone_exists(
        &self,
        instance: InstanceRef,
        kind: CloneKind,
        spawn: SpawnId,
        layer: LayerId,
    ) -> bool;
    fn spawn_clone(
        &self,
        instance: InstanceRef,
        kind: CloneKind,
        spawn: SpawnId,
        layer: LayerId,
    ) -> bool;
    /// Destroy every clone tagged with `layer` and forget its loaded grids.
    fn despawn_clones_matching(&self, instance: InstanceRef, layer: LayerId) -> usize;
    fn rebuild_visibility(&self, entity: EntityId);
    fn notify_chat(&self, entity: EntityId, text: &str);
    /// Number of terrain tiles a map has, when known.
    fn map_tile_count(&self, _map: MapId) -> Option<u32> {
        None
    }
}

/// Persisted layer assignment of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub map: MapId,
    pub zone: ZoneId,
    pub layer: LayerId,
}

/// Persisted partition ownership of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub entity: EntityId,
    pub map: MapId,
    pub partition: PartitionId,
}

/// Failure reported to persistence callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("persistence backend is shut down")]
    Closed,
    #[error("storage error: {0}")]
    Storage(String),
}

pub type AssignmentCallback =
    Box<dyn FnOnce(Result<Option<AssignmentRecord>, GatewayError>) + Send + 'static>;
pub type OwnershipCallback =
    Box<dyn FnOnce(Result<Vec<OwnershipRecord>, GatewayError>) + Send + 'static>;

/// Asynchronous record storage. Loads answer through callbacks; writes
/// are fire-and-forget and must never block the caller on storage.
pub trait PersistenceGateway: Send + Sync {
    fn load_assignment(&self, entity: EntityId, done: AssignmentCallback);
    fn save_assignment(&self, entity: EntityId, record: AssignmentRecord);
    fn load_all_ownership(&self, done: OwnershipCallback);
    fn save_ownership(&self, record: OwnershipRecord);
    fn delete_ownership_for_other_maps(&self, entity: EntityId, except: MapId);
}
