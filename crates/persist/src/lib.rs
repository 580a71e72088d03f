//! Persistence for layer assignments and partition ownership.
//!
//! # Invariants
//! - In-memory engine state is authoritative; storage failures are logged, never propagated.
//! - Checkpoints are verified against the manifest hash chain before they are read.

mod gateway;
mod store;

pub use gateway::{AsyncGateway, InlineGateway};
pub use store::{IntegrityManifest, ManifestEntry, RecordSet, RecordStore, StoreError, StoreMeta};
