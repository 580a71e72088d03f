//! Kernel boundary: how the engines see the simulation and storage.
//!
//! # Invariants
//! - Engines hold identifiers only; live entities stay owned by the simulation.
//! - Gateway calls are made with no engine lock held.
//! - Persistence is asynchronous; every load answers through a callback.

pub mod gateway;
pub mod world;

pub use gateway::{
    AssignmentCallback, AssignmentRecord, CellSpawns, CloneKind, ControlledUnit, EntityDirectory,
    EntityInfo, GatewayError, InstanceRef, OwnershipCallback, OwnershipRecord, PersistenceGateway,
    WorldGateway,
};
pub use world::{SimEvent, SimWorld};
