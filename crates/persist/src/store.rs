//! Record store for layer assignments and partition ownership.
//!
//! Records live in memory; a store opened on a directory also checkpoints
//! them to disk:
//! ```text
//! store.meta.json                   - schema version and checkpoint count
//! checkpoints/
//!   000001.records.cbor.zst         - CBOR+zstd compressed record set
//! integrity/
//!   manifest.json                   - hash chain over checkpoints
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use strata_common::{EntityId, MapId, PartitionId};
use strata_kernel::{AssignmentRecord, OwnershipRecord};

const RECORD_SCHEMA_VERSION: u32 = 1;

/// Errors from file-backed record storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub checkpoint_count: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Everything the store persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub assignments: BTreeMap<EntityId, AssignmentRecord>,
    pub ownership: BTreeMap<EntityId, BTreeMap<MapId, PartitionId>>,
}

struct DiskState {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

/// Assignment and ownership tables with optional on-disk checkpoints.
pub struct RecordStore {
    records: RecordSet,
    disk: Option<DiskState>,
    dirty: bool,
}

impl RecordStore {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            records: RecordSet::default(),
            disk: None,
            dirty: false,
        }
    }

    /// Open or create a store at the given path, loading the latest verified checkpoint.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("checkpoints"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != RECORD_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: RECORD_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: RECORD_SCHEMA_VERSION,
                checkpoint_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        let mut store = Self {
            records: RecordSet::default(),
            disk: Some(DiskState {
                root,
                meta,
                manifest,
            }),
            dirty: false,
        };
        store.records = store.load_latest()?;
        tracing::debug!(
            target: "strata::persist",
            assignments = store.records.assignments.len(),
            owners = store.records.ownership.len(),
            "record store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> Option<&Path> {
        self.disk.as_ref().map(|d| d.root.as_path())
    }

    pub fn meta(&self) -> Option<&StoreMeta> {
        self.disk.as_ref().map(|d| &d.meta)
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    /// Whether records changed since the last checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn assignment(&self, entity: EntityId) -> Option<AssignmentRecord> {
        self.records.assignments.get(&entity).copied()
    }

    /// Replace the assignment row of `entity`.
    pub fn put_assignment(&mut self, entity: EntityId, record: AssignmentRecord) {
        if self.records.assignments.insert(entity, record) != Some(record) {
            self.dirty = true;
        }
    }

    /// All ownership rows, ordered by entity then map.
    pub fn ownership_rows(&self) -> Vec<OwnershipRecord> {
        self.records
            .ownership
            .iter()
            .flat_map(|(entity, maps)| {
                maps.iter().map(move |(map, partition)| OwnershipRecord {
                    entity: *entity,
                    map: *map,
                    partition: *partition,
                })
            })
            .collect()
    }

    /// Replace the `(entity, map)` ownership row.
    pub fn put_ownership(&mut self, record: OwnershipRecord) {
        let maps = self.records.ownership.entry(record.entity).or_default();
        if maps.insert(record.map, record.partition) != Some(record.partition) {
            self.dirty = true;
        }
    }

    /// Remove every ownership row of `entity` except the one on `keep`.
    pub fn delete_ownership_except(&mut self, entity: EntityId, keep: MapId) -> usize {
        let Some(maps) = self.records.ownership.get_mut(&entity) else {
            return 0;
        };
        let before = maps.len();
        maps.retain(|map, _| *map == keep);
        let removed = before - maps.len();
        if maps.is_empty() {
            self.records.ownership.remove(&entity);
        }
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Write the current records as a new checkpoint. No-op for in-memory
    /// stores and when nothing changed.
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(disk) = self.disk.as_mut() else {
            self.dirty = false;
            return Ok(());
        };

        let index = disk.meta.checkpoint_count + 1;
        let filename = format!("{:06}.records.cbor.zst", index);
        let path = disk.root.join("checkpoints").join(&filename);
        let tmp_path = disk.root.join("checkpoints").join(format!("{filename}.tmp"));

        let cbor_bytes = cbor_serialize(&self.records)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        let hash = sha256_hex(&compressed);
        let prev_hash = disk.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(&tmp_path, &compressed)?;
        std::fs::rename(&tmp_path, &path)?;

        disk.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
        });
        disk.meta.checkpoint_count = index;
        save_meta(disk)?;
        save_manifest(disk)?;
        self.dirty = false;

        tracing::debug!(target: "strata::persist", checkpoint = index, "records checkpointed");
        Ok(())
    }

    /// Verify every checkpoint hash and the chain linking them.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let Some(disk) = self.disk.as_ref() else {
            return Ok(());
        };
        let mut prev_hash: Option<String> = None;
        for entry in &disk.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(disk.root.join("checkpoints").join(&entry.filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    fn load_latest(&self) -> Result<RecordSet, StoreError> {
        let Some(disk) = self.disk.as_ref() else {
            return Ok(RecordSet::default());
        };
        let Some(entry) = disk.manifest.entries.last() else {
            return Ok(RecordSet::default());
        };
        let compressed = std::fs::read(disk.root.join("checkpoints").join(&entry.filename))?;
        let actual = sha256_hex(&compressed);
        if actual != entry.sha256 {
            return Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        let cbor_bytes = zstd_decompress(&compressed)?;
        cbor_deserialize(&cbor_bytes)
    }
}

fn save_meta(disk: &DiskState) -> Result<(), StoreError> {
    let path = disk.root.join("store.meta.json");
    serde_json::to_writer_pretty(std::fs::File::create(path)?, &disk.meta)?;
    Ok(())
}

fn save_manifest(disk: &DiskState) -> Result<(), StoreError> {
    let path = disk.root.join("integrity").join("manifest.json");
    serde_json::to_writer_pretty(std::fs::File::create(path)?, &disk.manifest)?;
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{LayerId, ZoneId};

    fn assignment(map: u32, layer: u32) -> AssignmentRecord {
        AssignmentRecord {
            map: MapId(map),
            zone: ZoneId(0),
            layer: LayerId(layer),
        }
    }

    fn owner(entity: u64, map: u32, partition: u32) -> OwnershipRecord {
        OwnershipRecord {
            entity: EntityId(entity),
            map: MapId(map),
            partition: PartitionId(partition),
        }
    }

    #[test]
    fn in_memory_put_and_get() {
        let mut store = RecordStore::in_memory();
        store.put_assignment(EntityId(1), assignment(0, 2));
        assert_eq!(store.assignment(EntityId(1)), Some(assignment(0, 2)));
        assert!(store.is_dirty());
        store.checkpoint().unwrap();
        assert!(!store.is_dirty());
        assert!(store.root().is_none());
    }

    #[test]
    fn unchanged_writes_do_not_dirty() {
        let mut store = RecordStore::in_memory();
        store.put_ownership(owner(1, 0, 2));
        store.checkpoint().unwrap();
        store.put_ownership(owner(1, 0, 2));
        assert!(!store.is_dirty());
    }

    #[test]
    fn delete_ownership_keeps_one_map() {
        let mut store = RecordStore::in_memory();
        store.put_ownership(owner(1, 0, 2));
        store.put_ownership(owner(1, 1, 3));
        store.put_ownership(owner(2, 1, 1));
        assert_eq!(store.delete_ownership_except(EntityId(1), MapId(1)), 1);
        assert_eq!(store.delete_ownership_except(EntityId(9), MapId(1)), 0);
        assert_eq!(store.ownership_rows(), vec![owner(1, 1, 3), owner(2, 1, 1)]);
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(tmp.path().join("records")).unwrap();
        assert_eq!(store.meta().map(|m| m.checkpoint_count), Some(0));
        assert!(tmp.path().join("records").join("checkpoints").is_dir());
        assert!(tmp.path().join("records").join("integrity").is_dir());
        assert_eq!(store.records(), &RecordSet::default());
    }

    #[test]
    fn checkpoint_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("records");
        {
            let mut store = RecordStore::open(&dir).unwrap();
            store.put_assignment(EntityId(7), assignment(1, 1));
            store.put_ownership(owner(7, 1, 4));
            store.checkpoint().unwrap();
            store.put_assignment(EntityId(8), assignment(1, 0));
            store.checkpoint().unwrap();
            store.verify_integrity().unwrap();
        }
        let reopened = RecordStore::open(&dir).unwrap();
        assert_eq!(reopened.meta().map(|m| m.checkpoint_count), Some(2));
        assert_eq!(reopened.assignment(EntityId(7)), Some(assignment(1, 1)));
        assert_eq!(reopened.assignment(EntityId(8)), Some(assignment(1, 0)));
        assert_eq!(reopened.ownership_rows(), vec![owner(7, 1, 4)]);
    }

    #[test]
    fn corrupted_checkpoint_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("records");
        {
            let mut store = RecordStore::open(&dir).unwrap();
            store.put_assignment(EntityId(1), assignment(0, 1));
            store.checkpoint().unwrap();
        }
        let file = dir.join("checkpoints").join("000001.records.cbor.zst");
        let mut data = std::fs::read(&file).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&file, &data).unwrap();

        assert!(matches!(
            RecordStore::open(&dir),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("records");
        RecordStore::open(&dir).unwrap();
        let meta = StoreMeta {
            schema_version: 99,
            checkpoint_count: 0,
        };
        serde_json::to_writer(std::fs::File::create(dir.join("store.meta.json")).unwrap(), &meta)
            .unwrap();
        assert!(matches!(
            RecordStore::open(&dir),
            Err(StoreError::SchemaMismatch {
                file_version: 99,
                ..
            })
        ));
    }
}
