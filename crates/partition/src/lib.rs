//! Spatial partitioning of continent maps.
//!
//! Each partitioned map is split into a rectangular layout of partitions over
//! the 64x64 grid. The engine resolves which partition owns a position or an
//! entity, tracks objects near partition edges, and runs the short
//! transactions that move an entity between partitions.
//!
//! # Invariants
//! - Entity lookups resolve ownership first, then a live override, then geometry.
//! - An entity has at most one relocation transaction in flight.
//! - Every layout change bumps the layout epoch; cached lookups from an older
//!   epoch are never served.
//! - Boundary membership is plain set bookkeeping; it never moves an entity.

mod boundary;
mod cache;
mod density;
mod engine;
mod layout;
mod overrides;
mod partition;
mod relocation;

pub use boundary::{BoundaryStripe, CellCoord, SPATIAL_CELL_SIZE, SpatialHash, VisibilityStripe};
pub use cache::{LOOKUP_CACHE_TTL_MS, PartitionLookupCache};
pub use density::{DENSITY_CHECK_INTERVAL_MS, RESIZE_COOLDOWN_MS, ResizeDecision};
pub use engine::{HandoffCounts, PartitionEngine};
pub use layout::PartitionLayout;
pub use overrides::{OverrideTable, PartitionOverride};
pub use partition::{Partition, PartitionStats};
pub use relocation::{RELOCATION_TIMEOUT_MS, RelocationState, RelocationTable, RelocationTxn};
