use std::collections::HashSet;

use strata_common::sync::{lock, read, write};
use strata_common::{EntityId, LayerId, MapId, ZoneId};
use thiserror::Error;

use crate::engine::LayerEngine;
use crate::pending::{PENDING_MAX_RETRIES, PENDING_RETRY_DELAY_MS, PendingAssignment};
use crate::soft_transfer::SoftTransfer;

/// Why a voluntary layer switch was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwitchDenied {
    #[error("layering is disabled")]
    Disabled,
    #[error("player not found")]
    NotFound,
    #[error("in combat")]
    InCombat,
    #[error("dead")]
    Dead,
    #[error("on cooldown for {}s", .remaining_ms.div_ceil(1000))]
    OnCooldown { remaining_ms: u64 },
    #[error("no such layer")]
    NoSuchLayer,
    #[error("already on that layer")]
    AlreadyThere,
}

impl LayerEngine {
    /// First reason `player` may not switch layers right now, if any.
    /// Only covers the player; the target layer is checked by
    /// [`Self::switch_player_to_layer`].
    pub fn switch_denial(&self, player: EntityId) -> Option<SwitchDenied> {
        if !self.is_enabled() {
            return Some(SwitchDenied::Disabled);
        }
        let Some(info) = self.directory.resolve(player) else {
            return Some(SwitchDenied::NotFound);
        };
        if info.in_combat {
            return Some(SwitchDenied::InCombat);
        }
        if info.dead {
            return Some(SwitchDenied::Dead);
        }
        let now = self.now_ms();
        let cooldown = lock(&self.cooldowns).get(player)?;
        (!cooldown.can_switch(now)).then(|| SwitchDenied::OnCooldown {
            remaining_ms: cooldown.remaining_ms(now),
        })
    }

    pub fn can_switch_layer(&self, player: EntityId) -> bool {
        self.switch_denial(player).is_none()
    }

    /// Milliseconds until `player` may switch again; 0 when free to switch.
    pub fn switch_cooldown_remaining_ms(&self, player: EntityId) -> u64 {
        let now = self.now_ms();
        lock(&self.cooldowns)
            .get(player)
            .map_or(0, |c| if c.can_switch(now) { 0 } else { c.remaining_ms(now) })
    }

    fn check_switch(&self, player: EntityId, target: LayerId) -> Result<(MapId, LayerId), SwitchDenied> {
        if let Some(denied) = self.switch_denial(player) {
            return Err(denied);
        }
        let map = self
            .directory
            .resolve(player)
            .map(|i| i.map)
            .ok_or(SwitchDenied::NotFound)?;
        let state = read(&self.state);
        if !state.layer_exists(map, target) {
            return Err(SwitchDenied::NoSuchLayer);
        }
        let current = state.layer_on(map, player).unwrap_or(LayerId::BASE);
        if current == target {
            return Err(SwitchDenied::AlreadyThere);
        }
        Ok((map, current))
    }

    /// Voluntary move of `player` to an existing layer of their current map.
    /// Records the switch against the player's cooldown.
    pub fn switch_player_to_layer(&self, player: EntityId, target: LayerId, reason: &str) -> bool {
        match self.check_switch(player, target) {
            Ok((map, current)) => {
                self.move_player(map, player, target);
                self.notify_layer_change(player, current, target, reason);
                self.world.rebuild_visibility(player);
                let cooldown = lock(&self.cooldowns).record(player, self.now_ms());
                tracing::debug!(
                    target: "strata::layer",
                    player = %player,
                    map = %map,
                    from = %current,
                    to = %target,
                    reason,
                    switches = cooldown.switch_count,
                    "player switched layer"
                );
                true
            }
            Err(denied) => {
                tracing::debug!(target: "strata::layer", player = %player, layer = %target, %denied, "layer switch refused");
                false
            }
        }
    }

    /// Player-initiated switch. A refusal is reported back in chat.
    pub fn request_layer_switch(&self, player: EntityId, target: LayerId) -> bool {
        match self.check_switch(player, target) {
            Ok(_) => self.switch_player_to_layer(player, target, "player request"),
            Err(denied) => {
                self.world
                    .notify_chat(player, &format!("Cannot switch layer: {denied}"));
                false
            }
        }
    }

    /// Open an empty layer on `map` and populate its clones. Fails when the
    /// layer exists or the map is at its maximum layer count.
    pub fn create_layer(&self, map: MapId, layer: LayerId, reason: &str) -> bool {
        let cfg = self.config();
        if !cfg.layers.enabled {
            return false;
        }
        {
            let mut state = write(&self.state);
            let count = state.layers.get(&map).map_or(0, |l| l.len());
            if state.layer_exists(map, layer) || count >= cfg.layers.max_layers.max(1) as usize {
                return false;
            }
            state
                .layers
                .entry(map)
                .or_default()
                .insert(layer, HashSet::new());
        }
        tracing::info!(target: "strata::layer", map = %map, layer = %layer, reason, "layer created");
        self.spawn_layer_clones(map, layer);
        true
    }

    /// Switch `player` to `layer` once they have finished joining `map`.
    pub fn queue_pending_assignment(&self, player: EntityId, map: MapId, layer: LayerId, delay_ms: u64) {
        let ready_at_ms = self.now_ms().saturating_add(delay_ms);
        lock(&self.pending).queue(
            player,
            PendingAssignment {
                map,
                layer,
                ready_at_ms,
                retries: 0,
            },
        );
        tracing::debug!(target: "strata::layer", player = %player, map = %map, layer = %layer, delay_ms, "pending assignment queued");
    }

    /// Retry due pending assignments. Failed attempts are requeued one
    /// second later until the retry limit.
    pub fn process_pending_assignments(&self) {
        let now = self.now_ms();
        let ready = lock(&self.pending).take_ready(now);
        for (player, mut entry) in ready {
            let on_map = self
                .directory
                .resolve(player)
                .is_some_and(|i| i.map == entry.map);
            if on_map && self.switch_player_to_layer(player, entry.layer, "post-join") {
                continue;
            }
            entry.retries += 1;
            if entry.retries >= PENDING_MAX_RETRIES {
                tracing::warn!(target: "strata::layer", player = %player, map = %entry.map, layer = %entry.layer, "pending assignment dropped after retries");
                continue;
            }
            entry.ready_at_ms = now + PENDING_RETRY_DELAY_MS;
            lock(&self.pending).queue(player, entry);
        }
    }

    pub fn has_pending_soft_transfer(&self, player: EntityId) -> bool {
        lock(&self.soft_transfers).contains(player)
    }

    pub fn pending_soft_transfer(&self, player: EntityId) -> Option<SoftTransfer> {
        lock(&self.soft_transfers).get(player).cloned()
    }

    pub fn pending_soft_transfer_count(&self) -> usize {
        lock(&self.soft_transfers).len()
    }

    pub fn pending_assignment(&self, player: EntityId) -> Option<PendingAssignment> {
        lock(&self.pending).get(player)
    }

    pub fn pending_assignment_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Defer a move of `player` to their next loading screen.
    pub fn queue_soft_transfer(
        &self,
        player: EntityId,
        map: MapId,
        source: LayerId,
        target: LayerId,
        reason: &'static str,
    ) {
        lock(&self.soft_transfers).queue(
            player,
            SoftTransfer {
                map,
                source,
                target,
                queued_at_ms: self.now_ms(),
                reason,
            },
        );
        tracing::debug!(target: "strata::layer", player = %player, map = %map, from = %source, to = %target, reason, "soft transfer queued");
    }

    /// Apply the pending soft transfer of `player`, called at a loading
    /// screen. Returns false when there was none or its target layer is
    /// gone; the caller then falls back to auto-assignment.
    pub fn process_soft_transfer_for_player(&self, player: EntityId) -> bool {
        let Some(entry) = lock(&self.soft_transfers).take(player) else {
            return false;
        };
        self.apply_soft_transfer(player, &entry, entry.reason)
    }

    pub(crate) fn apply_soft_transfer(&self, player: EntityId, entry: &SoftTransfer, reason: &str) -> bool {
        if !self.has_layer(entry.map, entry.target) {
            tracing::debug!(target: "strata::layer", player = %player, map = %entry.map, layer = %entry.target, "soft transfer target gone");
            return false;
        }
        let from = self.player_layer(entry.map, player);
        self.move_player(entry.map, player, entry.target);
        self.notify_layer_change(player, from, entry.target, reason);
        self.world.rebuild_visibility(player);
        tracing::debug!(target: "strata::layer", player = %player, map = %entry.map, from = %from, to = %entry.target, reason, "soft transfer applied");
        true
    }

    /// Assign, persist and populate. Cooldowns are not touched.
    pub(crate) fn move_player(&self, map: MapId, player: EntityId, target: LayerId) {
        let Some(placement) = self.place(map, player, target) else {
            return;
        };
        let zone = self
            .directory
            .resolve(player)
            .map_or(ZoneId(0), |i| i.zone);
        self.save_persistent_assignment(player, map, zone, target);
        self.finish_placement(map, player, target, &placement);
    }
}
