use std::collections::BTreeSet;

use strata_common::sync::{lock, read};
use strata_common::{EntityId, LayerId, MapId};

use crate::engine::LayerEngine;
use crate::soft_transfer::SoftTransfer;

const DEFAULT_CAPACITY: u32 = 50;
const DEFAULT_BATCH: u32 = 10;
const DEFAULT_SOFT_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_CHECK_INTERVAL_MS: u64 = 300_000;
const CACHE_SWEEP_INTERVAL_MS: u64 = 1_000;
const SOFT_TRANSFER_SWEEP_INTERVAL_MS: u64 = 5_000;

fn or_default_u32(value: u32, fallback: u32) -> u32 {
    if value == 0 { fallback } else { value }
}

fn or_default_u64(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}

impl LayerEngine {
    /// Moves are deferred when configured, and always on maps whose
    /// partitions run in parallel.
    fn defers_moves(&self, map: MapId) -> bool {
        let cfg = read(&self.config);
        cfg.layers.soft_transfers || cfg.partitions.runs_parallel(map)
    }

    /// Consolidate `map` into the base layer once its total population has
    /// stayed below one layer's capacity for the destruction cooldown.
    pub fn evaluate_layer_rebalancing(&self, map: MapId) {
        let cfg = self.config();
        let counts = read(&self.state).counts(map);
        if counts.len() <= 1 {
            lock(&self.hysteresis).entry(map).or_default().destruction.reset();
            return;
        }
        let capacity = or_default_u32(cfg.layers.capacity_for(map), DEFAULT_CAPACITY);
        let total: u32 = counts.iter().map(|(_, n)| n).sum();
        let now = self.now_ms();
        let ready = lock(&self.hysteresis).entry(map).or_default().destruction.poll(
            total < capacity,
            now,
            cfg.layers.destruction_cooldown_ms,
        );
        if !ready {
            return;
        }

        let mut layers = 0u32;
        for (layer, _) in counts.iter().filter(|(id, _)| !id.is_base()) {
            self.consolidate_layers(map, *layer, LayerId::BASE);
            self.metrics.record_consolidated();
            layers += 1;
        }
        self.metrics.record_rebalance();
        tracing::info!(target: "strata::layer", map = %map, layers, total, capacity, "layers consolidated");
    }

    /// Move every player of `source` onto `target`.
    pub fn consolidate_layers(&self, map: MapId, source: LayerId, target: LayerId) -> usize {
        if source == target {
            return 0;
        }
        let players: Vec<EntityId> = {
            let state = read(&self.state);
            let mut ids: Vec<EntityId> = state
                .layers
                .get(&map)
                .and_then(|layers| layers.get(&source))
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            ids.sort_unstable();
            ids
        };

        if self.defers_moves(map) {
            for &player in &players {
                // Repeated passes keep the first entry so its timeout still runs.
                let queued = lock(&self.soft_transfers).queue_if_absent(
                    player,
                    SoftTransfer {
                        map,
                        source,
                        target,
                        queued_at_ms: self.now_ms(),
                        reason: "rebalance",
                    },
                );
                if !queued {
                    continue;
                }
                tracing::debug!(target: "strata::layer", player = %player, map = %map, from = %source, to = %target, "soft transfer queued");
                self.world.notify_chat(
                    player,
                    &format!(
                        "You will be moved from Layer {source} to Layer {target} on your next loading screen (rebalancing)."
                    ),
                );
            }
        } else {
            for &player in &players {
                self.move_player(map, player, target);
                self.notify_layer_change(player, source, target, "rebalance");
                self.world.rebuild_visibility(player);
            }
            self.cleanup_empty_layers(map, source);
        }

        self.metrics.record_migrated(players.len() as u64);
        tracing::debug!(target: "strata::layer", map = %map, from = %source, to = %target, players = players.len(), "layer consolidated");
        players.len()
    }

    /// At the layer cap and over aggregate capacity, even out populations by
    /// moving ungrouped players from the fullest layer to the emptiest.
    pub fn balance_layers_at_max(&self, map: MapId) -> usize {
        let cfg = self.config();
        let max_layers = cfg.layers.max_layers.max(1) as usize;
        let capacity = or_default_u32(cfg.layers.capacity_for(map), DEFAULT_CAPACITY);
        let batch = or_default_u32(cfg.layers.rebalancing.migration_batch_size, DEFAULT_BATCH) as usize;
        let defer = self.defers_moves(map);
        let queued: BTreeSet<EntityId> = lock(&self.soft_transfers).ids().into_iter().collect();

        let moves: Vec<(EntityId, LayerId, LayerId)> = {
            let state = read(&self.state);
            let mut counts = state.counts(map);
            let total: u32 = counts.iter().map(|(_, n)| n).sum();
            if counts.len() < max_layers
                || counts.len() <= 1
                || u64::from(total) <= u64::from(capacity) * counts.len() as u64
            {
                return 0;
            }
            counts.sort_by_key(|(id, n)| (*n, *id));
            let (Some(&(_, lowest)), Some(&(_, highest))) = (counts.first(), counts.last()) else {
                return 0;
            };
            let spread = f64::from(highest - lowest) / f64::from(highest.max(1));
            if spread < f64::from(cfg.layers.rebalancing.imbalance_threshold) {
                return 0;
            }

            let mut planned = Vec::new();
            let mut planned_ids = BTreeSet::new();
            while planned.len() < batch {
                counts.sort_by_key(|(id, n)| (*n, *id));
                let (low_id, low) = counts[0];
                let (high_id, high) = counts[counts.len() - 1];
                if high <= low + 1 {
                    break;
                }
                let mut candidates: Vec<EntityId> = state
                    .layers
                    .get(&map)
                    .and_then(|layers| layers.get(&high_id))
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                candidates.sort_unstable();
                let pick = candidates.into_iter().find(|p| {
                    !planned_ids.contains(p)
                        && !queued.contains(p)
                        && self.directory.resolve(*p).is_some_and(|i| !i.is_grouped())
                });
                let Some(player) = pick else {
                    break;
                };
                planned_ids.insert(player);
                planned.push((player, high_id, low_id));
                let last = counts.len() - 1;
                counts[last].1 -= 1;
                counts[0].1 += 1;
            }
            planned
        };

        for &(player, from, to) in &moves {
            if defer {
                lock(&self.soft_transfers).queue_if_absent(
                    player,
                    SoftTransfer {
                        map,
                        source: from,
                        target: to,
                        queued_at_ms: self.now_ms(),
                        reason: "balance",
                    },
                );
            } else {
                self.move_player(map, player, to);
                self.notify_layer_change(player, from, to, "balance");
                self.world.rebuild_visibility(player);
            }
        }
        if !moves.is_empty() {
            self.metrics.record_migrated(moves.len() as u64);
            tracing::info!(target: "strata::layer", map = %map, moved = moves.len(), deferred = defer, "layers balanced at max");
        }
        moves.len()
    }

    /// Move ungrouped bots off an overfull layer onto one with room.
    pub fn rebalance_bot_layers(&self, map: MapId) -> usize {
        let cfg = self.config();
        let capacity = or_default_u32(cfg.layers.capacity_for(map), DEFAULT_CAPACITY);
        let batch = or_default_u32(cfg.layers.rebalancing.migration_batch_size, DEFAULT_BATCH) as usize;

        let (source, target, bots) = {
            let state = read(&self.state);
            let mut counts = state.counts(map);
            if counts.len() <= 1 {
                return 0;
            }
            counts.sort_by_key(|(id, n)| (*n, *id));
            let Some(&(source, source_count)) = counts.last() else {
                return 0;
            };
            if source_count <= capacity {
                return 0;
            }
            let Some(&(target, target_count)) = counts
                .iter()
                .find(|(id, n)| *id != source && *n < capacity)
            else {
                return 0;
            };
            let mut players: Vec<EntityId> = state
                .layers
                .get(&map)
                .and_then(|layers| layers.get(&source))
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            players.sort_unstable();
            let room = (capacity - target_count) as usize;
            let bots: Vec<EntityId> = players
                .into_iter()
                .filter(|p| {
                    self.directory
                        .resolve(*p)
                        .is_some_and(|i| i.in_world && i.bot && !i.is_grouped())
                })
                .take(batch.min(room))
                .collect();
            (source, target, bots)
        };

        for &bot in &bots {
            self.move_player(map, bot, target);
            self.notify_layer_change(bot, source, target, "bot balance");
            self.world.rebuild_visibility(bot);
        }
        if !bots.is_empty() {
            self.metrics.record_migrated(bots.len() as u64);
            tracing::info!(target: "strata::layer", map = %map, from = %source, to = %target, bots = bots.len(), "bots rebalanced");
        }
        bots.len()
    }

    /// Force-apply every soft transfer older than the configured timeout.
    /// Entries whose target layer is gone are dropped.
    pub fn process_pending_soft_transfers(&self) -> usize {
        let timeout = or_default_u64(
            read(&self.config).layers.soft_transfer_timeout_ms,
            DEFAULT_SOFT_TIMEOUT_MS,
        );
        let now = self.now_ms();
        let expired = lock(&self.soft_transfers).take_expired(now, timeout);
        let mut applied = 0;
        for (player, entry) in &expired {
            if self.apply_soft_transfer(*player, entry, "rebalance (timeout)") {
                applied += 1;
            }
        }
        if !expired.is_empty() {
            tracing::info!(target: "strata::layer", expired = expired.len(), applied, "soft transfers forced");
        }
        applied
    }

    /// Drop expired party-cache entries and stale cooldowns.
    pub fn sweep_caches(&self) {
        let now = self.now_ms();
        let parties = lock(&self.party_cache).purge_expired(now);
        let cooldowns = lock(&self.cooldowns).sweep(now);
        tracing::trace!(target: "strata::layer", parties, cooldowns, "caches swept");
    }

    /// Per-tick driver for `map`.
    pub fn update(&self, map: MapId, elapsed_ms: u64) {
        let _span = tracing::debug_span!("layer_update", map = %map, elapsed_ms).entered();
        let cfg = self.config();
        if !cfg.layers.enabled {
            return;
        }
        let now = self.now_ms();

        let (sweep_caches, sweep_soft, check_rebalance) = {
            let mut sweeps = lock(&self.sweeps);
            let sweep_caches = now > sweeps.cache_sweep_ms + CACHE_SWEEP_INTERVAL_MS;
            if sweep_caches {
                sweeps.cache_sweep_ms = now;
            }
            let sweep_soft = now > sweeps.soft_transfer_sweep_ms + SOFT_TRANSFER_SWEEP_INTERVAL_MS;
            if sweep_soft {
                sweeps.soft_transfer_sweep_ms = now;
            }
            let interval = or_default_u64(
                cfg.layers.rebalancing.check_interval_ms,
                DEFAULT_CHECK_INTERVAL_MS,
            );
            let last = sweeps.rebalance_checks.get(&map).copied().unwrap_or(0);
            let check_rebalance = cfg.layers.rebalancing.enabled && now >= last + interval;
            if check_rebalance {
                sweeps.rebalance_checks.insert(map, now);
            }
            (sweep_caches, sweep_soft, check_rebalance)
        };

        if sweep_caches {
            self.sweep_caches();
        }
        if sweep_soft && !lock(&self.soft_transfers).is_empty() {
            self.process_pending_soft_transfers();
        }
        self.process_pending_assignments();
        if check_rebalance {
            self.retire_idle_layers(map);
        }
        self.evaluate_layer_pressure(map);
        self.rebalance_bot_layers(map);
        self.balance_layers_at_max(map);
        if check_rebalance {
            self.evaluate_layer_rebalancing(map);
        }
    }

    /// Retire non-base layers that have stayed empty for the destruction
    /// cooldown. Layers a queued move is heading to are kept.
    pub fn retire_idle_layers(&self, map: MapId) -> usize {
        let cooldown = read(&self.config).layers.destruction_cooldown_ms;
        let now = self.now_ms();
        let empty: Vec<LayerId> = read(&self.state)
            .counts(map)
            .into_iter()
            .filter(|(id, n)| !id.is_base() && *n == 0)
            .map(|(id, _)| id)
            .collect();
        let awaited: BTreeSet<LayerId> = {
            let soft = lock(&self.soft_transfers).targets(map);
            let pending = lock(&self.pending).targets(map);
            soft.into_iter().chain(pending).collect()
        };

        let due: Vec<LayerId> = {
            let mut hysteresis = lock(&self.hysteresis);
            let idle = &mut hysteresis.entry(map).or_default().idle;
            idle.retain(|layer, _| empty.contains(layer));
            empty
                .iter()
                .copied()
                .filter(|layer| {
                    idle.entry(*layer)
                        .or_default()
                        .poll(!awaited.contains(layer), now, cooldown)
                })
                .collect()
        };

        let mut retired = 0;
        for layer in due {
            if self.cleanup_empty_layers(map, layer) {
                lock(&self.hysteresis)
                    .entry(map)
                    .or_default()
                    .idle
                    .remove(&layer);
                tracing::info!(target: "strata::layer", map = %map, layer = %layer, "idle layer retired");
                retired += 1;
            }
        }
        retired
    }

    /// Open a new layer once aggregate demand has exceeded every layer's
    /// capacity for the creation warmup.
    fn evaluate_layer_pressure(&self, map: MapId) {
        let cfg = self.config();
        let (count, total, next) = {
            let state = read(&self.state);
            let counts = state.counts(map);
            if counts.is_empty() {
                return;
            }
            let total: u64 = counts.iter().map(|(_, n)| u64::from(*n)).sum();
            let next = state.max_layer_id(map).unwrap_or(LayerId::BASE).next();
            (counts.len() as u64, total, next)
        };
        let capacity = u64::from(cfg.layers.capacity_for(map));
        let pressure = total > capacity * count && count < u64::from(cfg.layers.max_layers.max(1));
        let now = self.now_ms();
        let ready = lock(&self.hysteresis).entry(map).or_default().creation.poll(
            pressure,
            now,
            cfg.layers.creation_warmup_ms,
        );
        if ready {
            self.create_layer(map, next, "auto-pressure");
        }
    }
}
