//! Shared types and primitives for the strata engines.
//!
//! # Invariants
//! - Ids are plain numeric newtypes; nothing here holds a reference to a live entity.
//! - Lock helpers recover from poisoning; engine state is consistent between lock releases.
//! - Striped locks are always taken in stripe index order when more than one is held.

pub mod clock;
pub mod config;
pub mod geometry;
pub mod sync;
mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    ConfigError, ConfigProvider, EngineConfig, LayerConfig, PartitionConfig, RebalancingConfig,
    SettingValue, SettingsMap,
};
pub use geometry::GridCell;
pub use sync::{HysteresisTimer, StripedLock, TtlCache};
pub use types::{
    EntityId, InstanceId, LayerId, MapId, PartitionId, SpawnId, TemplateId, ZoneId,
};
