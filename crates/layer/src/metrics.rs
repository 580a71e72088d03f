use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals of rebalancing work.
#[derive(Debug, Default)]
pub struct RebalancingMetrics {
    total_rebalances: AtomicU64,
    players_migrated: AtomicU64,
    layers_consolidated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_rebalances: u64,
    pub players_migrated: u64,
    pub layers_consolidated: u64,
}

impl RebalancingMetrics {
    pub fn record_rebalance(&self) {
        self.total_rebalances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_migrated(&self, players: u64) {
        if players > 0 {
            self.players_migrated.fetch_add(players, Ordering::Relaxed);
        }
    }

    pub fn record_consolidated(&self) {
        self.layers_consolidated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_rebalances: self.total_rebalances.load(Ordering::Relaxed),
            players_migrated: self.players_migrated.load(Ordering::Relaxed),
            layers_consolidated: self.layers_consolidated.load(Ordering::Relaxed),
        }
    }
}
