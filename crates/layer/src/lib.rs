//! Layer assignment for crowded maps.
//!
//! A map can run several player-visible copies, called layers. The engine
//! places players on layers by capacity and party, opens new layers under
//! sustained pressure, merges them back into the base layer once demand
//! drops, and keeps NPC and game-object clones in step with the layers that
//! exist.
//!
//! # Invariants
//! - A player is on exactly one layer of exactly one map, or on none.
//! - Layer 0 of a map is never removed.
//! - A map never holds more layers than the configured maximum.
//! - Layer birth and death are damped by hysteresis; a reversed condition
//!   disarms the timer.
//! - Clones are only spawned or despawned with every engine lock released.

mod assignment;
mod cache;
mod clones;
mod cooldown;
mod engine;
mod metrics;
mod pending;
mod rebalance;
mod soft_transfer;
mod switching;

pub use assignment::{AssignmentHandle, ObjectAssignment, pack, unpack};
pub use cache::{LAYER_CACHE_TTL_MS, LayerLookupCache};
pub use clones::CloneReport;
pub use cooldown::{
    SWITCH_COOLDOWN_MAX_MS, SWITCH_COOLDOWN_TIER1_MS, SWITCH_COOLDOWN_TIER2_MS,
    SWITCH_COOLDOWN_TIER3_MS, SWITCH_WINDOW_MS, SwitchCooldown,
};
pub use engine::{LayerEngine, PARTY_CACHE_TTL_MS};
pub use metrics::{MetricsSnapshot, RebalancingMetrics};
pub use pending::{PENDING_MAX_RETRIES, PENDING_RETRY_DELAY_MS, PendingAssignment};
pub use soft_transfer::SoftTransfer;
pub use switching::SwitchDenied;
