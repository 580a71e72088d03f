use strata_common::{GridCell, LayerId, MapId, SpawnId};
use strata_kernel::{CloneKind, InstanceRef};

use crate::engine::LayerEngine;

/// Clones spawned and skipped while populating one layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloneReport {
    pub spawned: usize,
    pub existing: usize,
    pub failed: usize,
}

impl LayerEngine {
    /// Populate `layer` on every live instance of `map` with clones of the
    /// creatures and game objects of each grid the base layer has loaded.
    /// Clones that already exist are left alone, so repeated calls are safe.
    pub fn spawn_layer_clones(&self, map: MapId, layer: LayerId) -> CloneReport {
        let mut report = CloneReport::default();
        if layer.is_base() {
            return report;
        }
        let npcs = self.is_npc_layering_enabled();
        let gos = self.is_go_layering_enabled();
        if !npcs && !gos {
            return report;
        }

        for instance in self.world.live_instances(map) {
            for cell in GridCell::all() {
                if !self.world.is_grid_loaded(instance, cell, LayerId::BASE) {
                    continue;
                }
                self.world.mark_grid_loaded(instance, cell, layer);
                let spawns = self
                    .world
                    .enumerate_spawns(map, instance.spawn_mode, cell.grid_id());
                if npcs {
                    self.spawn_kind(instance, CloneKind::Creature, &spawns.creatures, layer, &mut report);
                }
                if gos {
                    self.spawn_kind(instance, CloneKind::GameObject, &spawns.game_objects, layer, &mut report);
                }
            }
        }

        tracing::debug!(
            target: "strata::layer",
            map = %map,
            layer = %layer,
            spawned = report.spawned,
            existing = report.existing,
            failed = report.failed,
            "layer clones spawned"
        );
        report
    }

    fn spawn_kind(
        &self,
        instance: InstanceRef,
        kind: CloneKind,
        spawns: &[SpawnId],
        layer: LayerId,
        report: &mut CloneReport,
    ) {
        for &spawn in spawns {
            if self.world.clone_exists(instance, kind, spawn, layer) {
                report.existing += 1;
            } else if self.world.spawn_clone(instance, kind, spawn, layer) {
                report.spawned += 1;
            } else {
                report.failed += 1;
            }
        }
    }

    /// Remove every clone tagged with `layer` from the live instances of `map`.
    pub fn despawn_layer_clones(&self, map: MapId, layer: LayerId) -> usize {
        let removed: usize = self
            .world
            .live_instances(map)
            .into_iter()
            .map(|instance| self.world.despawn_clones_matching(instance, layer))
            .sum();
        tracing::debug!(target: "strata::layer", map = %map, layer = %layer, removed, "layer clones despawned");
        removed
    }
}
