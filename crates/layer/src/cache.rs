use strata_common::sync::TtlCache;
use strata_common::{EntityId, LayerId, MapId};

use crate::engine::LayerEngine;

pub const LAYER_CACHE_TTL_MS: u64 = 250;
const LAYER_CACHE_CAPACITY: usize = 2048;

/// Per-caller memo of layer lookups for visibility checks.
///
/// Entries may trail a move by up to the TTL. Callers that just moved a
/// player should invalidate it.
pub struct LayerLookupCache {
    players: TtlCache<(EntityId, MapId), LayerId>,
    npcs: TtlCache<(EntityId, MapId), LayerId>,
    gos: TtlCache<(EntityId, MapId), LayerId>,
}

impl Default for LayerLookupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerLookupCache {
    pub fn new() -> Self {
        Self {
            players: TtlCache::new(LAYER_CACHE_TTL_MS, LAYER_CACHE_CAPACITY),
            npcs: TtlCache::new(LAYER_CACHE_TTL_MS, LAYER_CACHE_CAPACITY),
            gos: TtlCache::new(LAYER_CACHE_TTL_MS, LAYER_CACHE_CAPACITY),
        }
    }

    pub fn player_layer(&mut self, engine: &LayerEngine, map: MapId, player: EntityId) -> LayerId {
        let now = engine.now_ms();
        if let Some(layer) = self.players.get(&(player, map), now) {
            return layer;
        }
        let layer = engine.player_layer(map, player);
        self.players.insert((player, map), layer, now);
        layer
    }

    pub fn npc_layer(&mut self, engine: &LayerEngine, map: MapId, npc: EntityId) -> LayerId {
        let now = engine.now_ms();
        if let Some(layer) = self.npcs.get(&(npc, map), now) {
            return layer;
        }
        let layer = engine.layer_for_npc(map, npc);
        self.npcs.insert((npc, map), layer, now);
        layer
    }

    pub fn go_layer(&mut self, engine: &LayerEngine, map: MapId, go: EntityId) -> LayerId {
        let now = engine.now_ms();
        if let Some(layer) = self.gos.get(&(go, map), now) {
            return layer;
        }
        let layer = engine.layer_for_go(map, go);
        self.gos.insert((go, map), layer, now);
        layer
    }

    pub fn invalidate_player(&mut self, player: EntityId, map: MapId) {
        self.players.invalidate(&(player, map));
    }

    pub fn clear(&mut self) {
        self.players.clear();
        self.npcs.clear();
        self.gos.clear();
    }

    pub fn len(&self) -> usize {
        self.players.len() + self.npcs.len() + self.gos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
