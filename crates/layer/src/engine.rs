use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use strata_common::sync::{TtlCache, lock, read, write};
use strata_common::{
    Clock, EngineConfig, EntityId, HysteresisTimer, LayerId, MapId, TemplateId, ZoneId,
};
use strata_kernel::{AssignmentRecord, EntityDirectory, PersistenceGateway, WorldGateway};

use crate::assignment::{AssignmentHandle, LayerState, ObjectAssignment};
use crate::cooldown::CooldownTable;
use crate::metrics::{MetricsSnapshot, RebalancingMetrics};
use crate::pending::PendingQueue;
use crate::soft_transfer::SoftTransferQueue;

pub const PARTY_CACHE_TTL_MS: u64 = 1_000;
const PARTY_CACHE_CAPACITY: usize = 4_096;

/// Creation and destruction damping of one map, plus how long each empty
/// non-base layer has been idle.
#[derive(Debug, Default)]
pub(crate) struct MapHysteresis {
    pub creation: HysteresisTimer,
    pub destruction: HysteresisTimer,
    pub idle: HashMap<LayerId, HysteresisTimer>,
}

/// Timestamps of the throttled steps of [`LayerEngine::update`].
#[derive(Debug, Default)]
pub(crate) struct SweepTimes {
    pub cache_sweep_ms: u64,
    pub soft_transfer_sweep_ms: u64,
    pub rebalance_checks: HashMap<MapId, u64>,
}

/// Outcome of placing a player, applied once every lock is released.
#[derive(Debug, Default)]
pub(crate) struct Placement {
    pub despawn: Option<(MapId, LayerId)>,
    pub spawn_clones: bool,
}

/// Layer assignment engine.
///
/// `state` is the primary lock. Hysteresis, cooldowns, the party cache, the
/// soft-transfer queue, pending assignments and sweep times each have their
/// own mutex. A secondary mutex may be taken while the primary lock is held,
/// never the other way round, and no two secondary mutexes are nested. The
/// world gateway and the persistence gateway are only called with no lock
/// held.
pub struct LayerEngine {
    pub(crate) config: RwLock<Arc<EngineConfig>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) directory: Arc<dyn EntityDirectory>,
    pub(crate) world: Arc<dyn WorldGateway>,
    pub(crate) persistence: Option<Arc<dyn PersistenceGateway>>,
    pub(crate) state: RwLock<LayerState>,
    pub(crate) hysteresis: Mutex<HashMap<MapId, MapHysteresis>>,
    pub(crate) cooldowns: Mutex<CooldownTable>,
    pub(crate) party_cache: Mutex<TtlCache<EntityId, (MapId, Option<LayerId>)>>,
    pub(crate) soft_transfers: Mutex<SoftTransferQueue>,
    pub(crate) pending: Mutex<PendingQueue>,
    pub(crate) sweeps: Mutex<SweepTimes>,
    pub(crate) metrics: RebalancingMetrics,
}

impl LayerEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn EntityDirectory>,
        world: Arc<dyn WorldGateway>,
    ) -> Self {
        log_config(&config);
        Self {
            config: RwLock::new(config),
            clock,
            directory,
            world,
            persistence: None,
            state: RwLock::new(LayerState::default()),
            hysteresis: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(CooldownTable::default()),
            party_cache: Mutex::new(TtlCache::new(PARTY_CACHE_TTL_MS, PARTY_CACHE_CAPACITY)),
            soft_transfers: Mutex::new(SoftTransferQueue::default()),
            pending: Mutex::new(PendingQueue::default()),
            sweeps: Mutex::new(SweepTimes::default()),
            metrics: RebalancingMetrics::default(),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&read(&self.config))
    }

    /// Swap the configuration snapshot. Existing layers stay as they are.
    pub fn reload_config(&self, config: Arc<EngineConfig>) {
        log_config(&config);
        *write(&self.config) = config;
        lock(&self.party_cache).clear();
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn is_enabled(&self) -> bool {
        read(&self.config).layers.enabled
    }

    pub fn is_npc_layering_enabled(&self) -> bool {
        read(&self.config).layers.npc_layering
    }

    pub fn is_go_layering_enabled(&self) -> bool {
        read(&self.config).layers.go_layering
    }

    pub fn layer_capacity(&self, map: MapId) -> u32 {
        read(&self.config).layers.capacity_for(map)
    }

    /// Configured maximum with 0 read as 1.
    pub fn layer_max(&self) -> u32 {
        read(&self.config).layers.max_layers.max(1)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of NPC and game-object assignments held.
    pub fn object_assignment_counts(&self) -> (usize, usize) {
        let state = read(&self.state);
        (state.npcs.len(), state.gos.len())
    }

    /// Players with a switch history inside the rolling window.
    pub fn tracked_cooldown_count(&self) -> usize {
        lock(&self.cooldowns).len()
    }

    // ---- queries ----

    /// Layer of `player` on `map`; the base layer when unassigned or elsewhere.
    pub fn player_layer(&self, map: MapId, player: EntityId) -> LayerId {
        read(&self.state)
            .layer_on(map, player)
            .unwrap_or(LayerId::BASE)
    }

    /// Map and layer of `player`, wherever they are.
    pub fn player_assignment(&self, player: EntityId) -> Option<(MapId, LayerId)> {
        read(&self.state).player_layer(player)
    }

    /// Lock-free reader that tracks `player` until they are removed.
    pub fn assignment_handle(&self, player: EntityId) -> Option<AssignmentHandle> {
        read(&self.state).handle(player)
    }

    /// Number of layers on `map`, at least 1.
    pub fn layer_count(&self, map: MapId) -> u32 {
        read(&self.state)
            .layers
            .get(&map)
            .map_or(1, |layers| layers.len().max(1) as u32)
    }

    /// Sorted layer ids of `map`, always including the base layer.
    pub fn layer_ids(&self, map: MapId) -> Vec<LayerId> {
        let state = read(&self.state);
        let mut ids: Vec<LayerId> = state
            .layers
            .get(&map)
            .map(|layers| layers.keys().copied().collect())
            .unwrap_or_default();
        if ids.first() != Some(&LayerId::BASE) {
            ids.insert(0, LayerId::BASE);
        }
        ids
    }

    /// Sorted ids of the layers that have players.
    pub fn active_layer_ids(&self, map: MapId) -> Vec<LayerId> {
        read(&self.state)
            .layers
            .get(&map)
            .map(|layers| {
                layers
                    .iter()
                    .filter(|(_, players)| !players.is_empty())
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_layer(&self, map: MapId, layer: LayerId) -> bool {
        read(&self.state).layer_exists(map, layer)
    }

    pub fn has_players_on_map(&self, map: MapId) -> bool {
        read(&self.state)
            .layers
            .get(&map)
            .is_some_and(|layers| layers.values().any(|p| !p.is_empty()))
    }

    /// Population per layer, ascending by layer id.
    pub fn layer_player_counts(&self, map: MapId) -> BTreeMap<LayerId, u32> {
        read(&self.state).counts(map).into_iter().collect()
    }

    pub fn layers_for_two_players(
        &self,
        map: MapId,
        first: EntityId,
        second: EntityId,
    ) -> (LayerId, LayerId) {
        let state = read(&self.state);
        (
            state.layer_on(map, first).unwrap_or(LayerId::BASE),
            state.layer_on(map, second).unwrap_or(LayerId::BASE),
        )
    }

    pub fn player_and_npc_layer(
        &self,
        map: MapId,
        player: EntityId,
        npc: EntityId,
    ) -> (LayerId, LayerId) {
        let state = read(&self.state);
        (
            state.layer_on(map, player).unwrap_or(LayerId::BASE),
            state.npcs.get(map, npc).map_or(LayerId::BASE, |a| a.layer),
        )
    }

    pub fn player_and_go_layer(
        &self,
        map: MapId,
        player: EntityId,
        go: EntityId,
    ) -> (LayerId, LayerId) {
        let state = read(&self.state);
        (
            state.layer_on(map, player).unwrap_or(LayerId::BASE),
            state.gos.get(map, go).map_or(LayerId::BASE, |a| a.layer),
        )
    }

    /// Seeded pick among the existing layers of `map`.
    pub fn default_layer_for_map(&self, map: MapId, seed: u64) -> LayerId {
        let state = read(&self.state);
        let Some(layers) = state.layers.get(&map).filter(|l| !l.is_empty()) else {
            return LayerId::BASE;
        };
        let index = (seed % layers.len() as u64) as usize;
        layers.keys().nth(index).copied().unwrap_or(LayerId::BASE)
    }

    // ---- player placement ----

    /// Move `player` onto `(map, layer)` unconditionally.
    pub fn assign_player_to_layer(&self, map: MapId, player: EntityId, layer: LayerId) {
        let Some(placement) = self.place(map, player, layer) else {
            return;
        };
        tracing::debug!(target: "strata::layer", player = %player, map = %map, layer = %layer, "player assigned");
        self.finish_placement(map, player, layer, &placement);
    }

    /// Update the assignment tables under the primary lock. `None` when the
    /// player is already on `(map, layer)`.
    pub(crate) fn place(&self, map: MapId, player: EntityId, layer: LayerId) -> Option<Placement> {
        let mut state = write(&self.state);
        if state.layer_on(map, player) == Some(layer) {
            return None;
        }
        let detached = state.detach(player);
        let despawn = detached
            .as_ref()
            .filter(|d| d.retired)
            .map(|d| (d.map, d.layer));
        let was_empty = state.attach(player, map, layer, detached.as_ref());
        Some(Placement {
            despawn,
            spawn_clones: was_empty && !layer.is_base(),
        })
    }

    /// Side effects of a placement: despawn retired clones, move controlled
    /// units, then populate a freshly occupied layer.
    pub(crate) fn finish_placement(
        &self,
        map: MapId,
        player: EntityId,
        layer: LayerId,
        placement: &Placement,
    ) {
        if let Some((old_map, old_layer)) = placement.despawn {
            self.layer_retired(old_map, old_layer);
        }
        self.sync_controlled_to_layer(map, player, layer);
        if placement.spawn_clones {
            self.spawn_layer_clones(map, layer);
        }
    }

    /// Take `player` off their layer on `map`. No-op when they are elsewhere.
    pub fn remove_player_from_layer(&self, map: MapId, player: EntityId) {
        let retired = {
            let mut state = write(&self.state);
            if state.layer_on(map, player).is_none() {
                return;
            }
            match state.detach(player) {
                Some(detached) => detached.release(),
                None => return,
            }
        };
        let (map, layer, despawn) = retired;
        tracing::debug!(target: "strata::layer", player = %player, map = %map, layer = %layer, "player removed");
        if despawn {
            self.layer_retired(map, layer);
        }
    }

    /// Drop every trace of `player`: assignment, cooldown, party cache entry,
    /// soft transfer and pending assignment.
    pub fn force_remove_player(&self, player: EntityId) {
        let removed = write(&self.state).detach(player).map(|d| d.release());
        if let Some((map, layer, despawn)) = removed {
            tracing::debug!(target: "strata::layer", player = %player, map = %map, layer = %layer, "player force removed");
            if despawn {
                self.layer_retired(map, layer);
            }
        }
        lock(&self.cooldowns).remove(player);
        lock(&self.party_cache).invalidate(&player);
        lock(&self.soft_transfers).take(player);
        lock(&self.pending).remove(player);
    }

    /// Retire `layer` if it has no players left. Returns true if it went away.
    pub fn cleanup_empty_layers(&self, map: MapId, layer: LayerId) -> bool {
        let retired = write(&self.state).cleanup_empty_layer(map, layer);
        if retired {
            self.layer_retired(map, layer);
        }
        retired
    }

    /// Forget party targets pointing at a retired layer and despawn its
    /// clones. Called with no lock held.
    pub(crate) fn layer_retired(&self, map: MapId, layer: LayerId) {
        let stale = lock(&self.party_cache).retain(|_, (m, l)| !(*m == map && *l == Some(layer)));
        if stale > 0 {
            tracing::trace!(target: "strata::layer", map = %map, layer = %layer, stale, "party targets dropped");
        }
        self.despawn_layer_clones(map, layer);
    }

    /// Place a player entering `map`.
    ///
    /// A player already on the map stays put unless their party leader is on
    /// another layer, or they are a bot on an overfull layer while another
    /// layer has room. Otherwise the lowest layer with room wins; with none,
    /// a new layer is created once the creation warmup has elapsed, and the
    /// least-populated layer takes the overflow meanwhile and at the maximum.
    pub fn auto_assign_player_to_layer(&self, map: MapId, player: EntityId) -> LayerId {
        let cfg = self.config();
        if !cfg.layers.enabled {
            return LayerId::BASE;
        }
        let Some(info) = self.directory.resolve(player) else {
            return LayerId::BASE;
        };
        let party_target = self.party_target_layer(map, player);
        let is_bot = info.bot;
        let capacity = cfg.layers.capacity_for(map) as usize;
        let max_layers = cfg.layers.max_layers.max(1) as usize;
        let now = self.now_ms();

        let mut previous = None;
        let mut created = false;
        let reason;
        let target;
        let placement;
        {
            let mut state = write(&self.state);
            let current = state.layer_on(map, player);
            let counts = state.counts(map);
            // A cached leader layer may have been retired since.
            let party_target = party_target.filter(|l| state.layer_exists(map, *l));
            match current {
                Some(current) => {
                    if let Some(leader_layer) = party_target.filter(|l| *l != current) {
                        target = leader_layer;
                        reason = "party";
                    } else if is_bot {
                        let current_count = counts
                            .iter()
                            .find(|(id, _)| *id == current)
                            .map_or(0, |(_, n)| *n as usize);
                        let roomy = counts
                            .iter()
                            .find(|(id, n)| *id != current && (*n as usize) < capacity);
                        match roomy {
                            Some((id, _)) if current_count > capacity => target = *id,
                            _ => return current,
                        }
                        reason = "bot rebalance";
                    } else {
                        return current;
                    }
                    previous = Some(current);
                }
                None => {
                    if let Some(leader_layer) = party_target {
                        target = leader_layer;
                        reason = "party";
                    } else if let Some((id, _)) =
                        counts.iter().find(|(_, n)| (*n as usize) < capacity)
                    {
                        lock(&self.hysteresis).entry(map).or_default().creation.reset();
                        target = *id;
                        reason = "auto";
                    } else if counts.is_empty() {
                        target = LayerId::BASE;
                        reason = "auto";
                    } else if counts.len() >= max_layers {
                        target = least_populated(&counts);
                        reason = "capacity";
                    } else {
                        let ready = lock(&self.hysteresis).entry(map).or_default().creation.poll(
                            true,
                            now,
                            cfg.layers.creation_warmup_ms,
                        );
                        if ready {
                            target = state.max_layer_id(map).unwrap_or(LayerId::BASE).next();
                            created = true;
                            reason = "new layer";
                        } else {
                            target = least_populated(&counts);
                            reason = "hysteresis overflow";
                        }
                    }
                }
            }

            let detached = state.detach(player);
            let despawn = detached
                .as_ref()
                .filter(|d| d.retired)
                .map(|d| (d.map, d.layer));
            let was_empty = state.attach(player, map, target, detached.as_ref());
            placement = Placement {
                despawn,
                spawn_clones: (created || was_empty) && !target.is_base(),
            };
        }

        tracing::debug!(target: "strata::layer", player = %player, map = %map, layer = %target, reason, "player auto-assigned");
        if created {
            tracing::info!(target: "strata::layer", map = %map, layer = %target, reason, "layer created");
        }

        self.save_persistent_assignment(player, map, info.zone, target);
        self.finish_placement(map, player, target, &placement);
        if let Some(from) = previous {
            self.notify_layer_change(player, from, target, reason);
        }
        if info.in_world {
            self.world.rebuild_visibility(player);
        }
        target
    }

    /// Layer of the party leader when `player` is a grouped non-leader and
    /// the leader is placed on `map`. Cached for a second per player.
    pub fn party_target_layer(&self, map: MapId, player: EntityId) -> Option<LayerId> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.now_ms();
        if let Some((cached_map, layer)) = lock(&self.party_cache).get(&player, now) {
            if cached_map == map {
                return layer;
            }
        }
        let info = self.directory.resolve(player)?;
        let leader = info.group_leader.filter(|l| *l != player)?;
        let layer = read(&self.state).layer_on(map, leader);
        tracing::trace!(target: "strata::layer", player = %player, leader = %leader, map = %map, "party target resolved");
        lock(&self.party_cache).insert(player, (map, layer), now);
        layer
    }

    pub(crate) fn notify_layer_change(
        &self,
        player: EntityId,
        from: LayerId,
        to: LayerId,
        reason: &str,
    ) {
        if from == to {
            return;
        }
        self.world
            .notify_chat(player, &format!("Layer change: {from} -> {to} ({reason})"));
    }

    // ---- NPCs and game objects ----

    pub fn assign_npc_to_layer(
        &self,
        map: MapId,
        zone: ZoneId,
        npc: EntityId,
        entry: TemplateId,
        layer: LayerId,
    ) {
        if !self.is_npc_layering_enabled() {
            return;
        }
        if npc.0 == 0 {
            tracing::warn!(target: "strata::layer", map = %map, zone = %zone, layer = %layer, "npc assignment without id ignored");
            return;
        }
        write(&self.state).npcs.assign(
            npc,
            ObjectAssignment {
                map,
                zone,
                layer,
                entry,
            },
        );
        tracing::debug!(target: "strata::layer", npc = %npc, map = %map, zone = %zone, layer = %layer, "npc assigned");
    }

    pub fn remove_npc_from_layer(&self, map: MapId, npc: EntityId) {
        if npc.0 == 0 {
            return;
        }
        write(&self.state).npcs.remove(map, npc);
    }

    pub fn layer_for_npc(&self, map: MapId, npc: EntityId) -> LayerId {
        read(&self.state)
            .npcs
            .get(map, npc)
            .map_or(LayerId::BASE, |a| a.layer)
    }

    /// Layer of `npc` on whichever map holds it. Scans every NPC
    /// assignment; prefer [`Self::layer_for_npc`] on hot paths.
    pub fn layer_for_npc_any_map(&self, npc: EntityId) -> LayerId {
        read(&self.state)
            .npcs
            .find_any_map(npc)
            .map_or(LayerId::BASE, |a| a.layer)
    }

    pub fn npc_assignment(&self, map: MapId, npc: EntityId) -> Option<ObjectAssignment> {
        read(&self.state).npcs.get(map, npc)
    }

    pub fn npc_layer_counts_by_zone(&self, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, u32>> {
        read(&self.state).npcs.counts_by_zone(map)
    }

    pub fn assign_go_to_layer(
        &self,
        map: MapId,
        zone: ZoneId,
        go: EntityId,
        entry: TemplateId,
        layer: LayerId,
    ) {
        if !self.is_go_layering_enabled() {
            return;
        }
        if go.0 == 0 {
            tracing::warn!(target: "strata::layer", map = %map, zone = %zone, layer = %layer, "game object assignment without id ignored");
            return;
        }
        write(&self.state).gos.assign(
            go,
            ObjectAssignment {
                map,
                zone,
                layer,
                entry,
            },
        );
        tracing::debug!(target: "strata::layer", go = %go, map = %map, zone = %zone, layer = %layer, "game object assigned");
    }

    pub fn remove_go_from_layer(&self, map: MapId, go: EntityId) {
        if go.0 == 0 {
            return;
        }
        write(&self.state).gos.remove(map, go);
    }

    pub fn layer_for_go(&self, map: MapId, go: EntityId) -> LayerId {
        read(&self.state)
            .gos
            .get(map, go)
            .map_or(LayerId::BASE, |a| a.layer)
    }

    /// Game-object counterpart of [`Self::layer_for_npc_any_map`]; same cost.
    pub fn layer_for_go_any_map(&self, go: EntityId) -> LayerId {
        read(&self.state)
            .gos
            .find_any_map(go)
            .map_or(LayerId::BASE, |a| a.layer)
    }

    pub fn go_layer_counts_by_zone(&self, map: MapId) -> BTreeMap<ZoneId, BTreeMap<LayerId, u32>> {
        read(&self.state).gos.counts_by_zone(map)
    }

    /// Move the pets, guardians and charmed creatures of `player` onto `layer`.
    pub(crate) fn sync_controlled_to_layer(&self, map: MapId, player: EntityId, layer: LayerId) {
        if !self.is_npc_layering_enabled() {
            return;
        }
        let Some(info) = self.directory.resolve(player) else {
            return;
        };
        if !info.in_world {
            return;
        }
        for unit in &info.controlled {
            self.assign_npc_to_layer(map, unit.zone, unit.id, unit.entry, layer);
        }
    }

    // ---- persistence ----

    /// Ask storage for the last saved layer of `player` and restore it when
    /// it still exists.
    pub fn load_persistent_assignment(self: &Arc<Self>, player: EntityId) {
        if !read(&self.config).layers.persistence {
            return;
        }
        let Some(persistence) = &self.persistence else {
            return;
        };
        let engine = Arc::downgrade(self);
        persistence.load_assignment(
            player,
            Box::new(move |result| {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match result {
                    Ok(Some(record)) => {
                        engine.apply_persistent_assignment(player, record);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(target: "strata::layer", player = %player, %err, "assignment load failed");
                    }
                }
            }),
        );
    }

    /// Apply a stored assignment. Ignored when the stored layer is gone or
    /// the player is on another map. Returns true when state changed.
    pub fn apply_persistent_assignment(&self, player: EntityId, record: AssignmentRecord) -> bool {
        if !read(&self.config).layers.persistence {
            return false;
        }
        let (moved, placement) = {
            let mut state = write(&self.state);
            if !state.layer_exists(record.map, record.layer) {
                return false;
            }
            match state.player_layer(player) {
                None => {
                    state.attach(player, record.map, record.layer, None);
                    (false, Placement::default())
                }
                Some((map, layer)) if map == record.map && layer != record.layer => {
                    let detached = state.detach(player);
                    let despawn = detached
                        .as_ref()
                        .filter(|d| d.retired)
                        .map(|d| (d.map, d.layer));
                    state.attach(player, record.map, record.layer, detached.as_ref());
                    (
                        true,
                        Placement {
                            despawn,
                            spawn_clones: false,
                        },
                    )
                }
                Some(_) => return false,
            }
        };
        tracing::debug!(target: "strata::layer", player = %player, map = %record.map, layer = %record.layer, "persisted layer restored");
        if let Some((map, layer)) = placement.despawn {
            self.layer_retired(map, layer);
        }
        if moved
            && self
                .directory
                .resolve(player)
                .is_some_and(|i| i.in_world)
        {
            self.world.rebuild_visibility(player);
        }
        true
    }

    pub fn save_persistent_assignment(
        &self,
        player: EntityId,
        map: MapId,
        zone: ZoneId,
        layer: LayerId,
    ) {
        if !read(&self.config).layers.persistence {
            return;
        }
        if let Some(persistence) = &self.persistence {
            persistence.save_assignment(player, AssignmentRecord { map, zone, layer });
        }
    }
}

fn log_config(config: &EngineConfig) {
    let layers = &config.layers;
    let rebalancing = &layers.rebalancing;
    tracing::info!(
        target: "strata::config",
        enabled = layers.enabled,
        capacity = layers.capacity,
        max_layers = layers.max_layers,
        npc_layering = layers.npc_layering,
        go_layering = layers.go_layering,
        soft_transfers = layers.soft_transfers,
        "layer config"
    );
    tracing::info!(
        target: "strata::config",
        enabled = rebalancing.enabled,
        interval_ms = rebalancing.check_interval_ms,
        min_players = rebalancing.min_players_per_layer,
        threshold = rebalancing.imbalance_threshold,
        batch = rebalancing.migration_batch_size,
        "rebalancing config"
    );
}

/// Least-populated layer, lowest id on ties. `counts` must not be empty.
pub(crate) fn least_populated(counts: &[(LayerId, u32)]) -> LayerId {
    counts
        .iter()
        .min_by_key(|(id, n)| (*n, *id))
        .map_or(LayerId::BASE, |(id, _)| *id)
}
