use std::collections::HashMap;

use strata_common::EntityId;

pub const SWITCH_COOLDOWN_TIER1_MS: u64 = 60_000;
pub const SWITCH_COOLDOWN_TIER2_MS: u64 = 120_000;
pub const SWITCH_COOLDOWN_TIER3_MS: u64 = 300_000;
pub const SWITCH_COOLDOWN_MAX_MS: u64 = 600_000;
/// Switches older than this no longer count towards the tier.
pub const SWITCH_WINDOW_MS: u64 = 3_600_000;

/// Voluntary layer-switch history of one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCooldown {
    pub last_switch_ms: u64,
    pub switch_count: u32,
}

impl SwitchCooldown {
    /// Cooldown after the recorded switches: 1 min, 2 min, 5 min for the
    /// third to fifth switch, 10 min beyond.
    pub fn current_cooldown_ms(&self) -> u64 {
        match self.switch_count {
            0 => 0,
            1 => SWITCH_COOLDOWN_TIER1_MS,
            2 => SWITCH_COOLDOWN_TIER2_MS,
            3..=5 => SWITCH_COOLDOWN_TIER3_MS,
            _ => SWITCH_COOLDOWN_MAX_MS,
        }
    }

    pub fn can_switch(&self, now_ms: u64) -> bool {
        self.switch_count == 0
            || now_ms.saturating_sub(self.last_switch_ms) >= self.current_cooldown_ms()
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.last_switch_ms);
        self.current_cooldown_ms().saturating_sub(elapsed)
    }

    pub fn record_switch(&mut self, now_ms: u64) {
        if self.switch_count > 0 && now_ms.saturating_sub(self.last_switch_ms) > SWITCH_WINDOW_MS {
            self.switch_count = 0;
        }
        self.last_switch_ms = now_ms;
        self.switch_count += 1;
    }

    /// The rolling window has fully elapsed; the entry can be dropped.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.switch_count == 0 || now_ms.saturating_sub(self.last_switch_ms) > SWITCH_WINDOW_MS
    }
}

#[derive(Debug, Default)]
pub(crate) struct CooldownTable {
    entries: HashMap<EntityId, SwitchCooldown>,
}

impl CooldownTable {
    pub fn get(&self, player: EntityId) -> Option<SwitchCooldown> {
        self.entries.get(&player).copied()
    }

    pub fn record(&mut self, player: EntityId, now_ms: u64) -> SwitchCooldown {
        let entry = self.entries.entry(player).or_default();
        entry.record_switch(now_ms);
        *entry
    }

    pub fn remove(&mut self, player: EntityId) {
        self.entries.remove(&player);
    }

    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, c| !c.is_stale(now_ms));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
