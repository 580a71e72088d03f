//! Settings lookup and the typed configuration snapshot handed to the engines.
//!
//! Engines never read settings on the hot path: a [`EngineConfig`] is built once
//! from a [`ConfigProvider`] and swapped explicitly on reload.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{MapId, ZoneId};

/// Errors from loading a settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("settings root must be a mapping")]
    NotAMapping,
    #[error("settings key must be a string, got {0}")]
    InvalidKey(String),
    #[error("unsupported value for key {key}")]
    InvalidValue { key: String },
}

/// Key/value settings source.
pub trait ConfigProvider: Send + Sync {
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_float(&self, key: &str) -> Option<f64>;
    fn get_string(&self, key: &str) -> Option<String>;
}

/// A single raw setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// In-memory settings keyed by dotted path (`layers.capacity`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsMap {
    values: BTreeMap<String, SettingValue>,
}

impl SettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: SettingValue) -> &mut Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: SettingValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse YAML. Nested mappings flatten into dotted keys and sequences
    /// into comma lists, so `partitions: { maps: [0, 1] }` reads back as
    /// `partitions.maps = "0,1"`.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let root: serde_yaml::Value = serde_yaml::from_str(text)?;
        if !matches!(root, serde_yaml::Value::Mapping(_) | serde_yaml::Value::Null) {
            return Err(ConfigError::NotAMapping);
        }
        let mut settings = Self::new();
        flatten_yaml("", &root, &mut settings)?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    fn raw(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }
}

fn flatten_yaml(
    prefix: &str,
    value: &serde_yaml::Value,
    out: &mut SettingsMap,
) -> Result<(), ConfigError> {
    use serde_yaml::Value;
    match value {
        Value::Mapping(mapping) => {
            for (k, v) in mapping {
                let key = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => return Err(ConfigError::InvalidKey(format!("{other:?}"))),
                };
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_yaml(&full, v, out)?;
            }
        }
        Value::Null => {}
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out)?,
        Value::Sequence(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match scalar(item) {
                    Some(SettingValue::Text(s)) => parts.push(s),
                    Some(SettingValue::Int(i)) => parts.push(i.to_string()),
                    Some(SettingValue::Float(f)) => parts.push(f.to_string()),
                    Some(SettingValue::Bool(b)) => parts.push(b.to_string()),
                    None => {
                        return Err(ConfigError::InvalidValue {
                            key: prefix.to_string(),
                        });
                    }
                }
            }
            out.set(prefix, SettingValue::Text(parts.join(",")));
        }
        scalar_value => match scalar(scalar_value) {
            Some(v) => {
                out.set(prefix, v);
            }
            None => {
                return Err(ConfigError::InvalidValue {
                    key: prefix.to_string(),
                });
            }
        },
    }
    Ok(())
}

fn scalar(value: &serde_yaml::Value) -> Option<SettingValue> {
    use serde_yaml::Value;
    match value {
        Value::Bool(b) => Some(SettingValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SettingValue::Int)
            .or_else(|| n.as_f64().map(SettingValue::Float)),
        Value::String(s) => Some(SettingValue::Text(s.clone())),
        _ => None,
    }
}

impl ConfigProvider for SettingsMap {
    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.raw(key)? {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Int(i) => Some(*i != 0),
            SettingValue::Float(_) => None,
            SettingValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            },
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.raw(key)? {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Bool(b) => Some(i64::from(*b)),
            SettingValue::Float(_) => None,
            SettingValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        match self.raw(key)? {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Bool(_) => None,
            SettingValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        Some(match self.raw(key)? {
            SettingValue::Text(s) => s.clone(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Bool(b) => b.to_string(),
        })
    }
}

/// Layer engine settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerConfig {
    pub enabled: bool,
    pub capacity: u32,
    pub capacity_overrides: BTreeMap<MapId, u32>,
    /// Maximum layers per map, base layer included. 0 is treated as 1.
    pub max_layers: u32,
    pub npc_layering: bool,
    pub go_layering: bool,
    pub persistence: bool,
    pub soft_transfers: bool,
    pub soft_transfer_timeout_ms: u64,
    pub creation_warmup_ms: u64,
    pub destruction_cooldown_ms: u64,
    pub rebalancing: RebalancingConfig,
}

impl LayerConfig {
    pub fn capacity_for(&self, map: MapId) -> u32 {
        self.capacity_overrides
            .get(&map)
            .copied()
            .unwrap_or(self.capacity)
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100,
            capacity_overrides: BTreeMap::new(),
            max_layers: 4,
            npc_layering: false,
            go_layering: false,
            persistence: true,
            soft_transfers: false,
            soft_transfer_timeout_ms: 600_000,
            creation_warmup_ms: 0,
            destruction_cooldown_ms: 0,
            rebalancing: RebalancingConfig::default(),
        }
    }
}

/// Periodic consolidation and balancing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalancingConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    pub min_players_per_layer: u32,
    pub imbalance_threshold: f32,
    pub migration_batch_size: u32,
}

impl Default for RebalancingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 300_000,
            min_players_per_layer: 5,
            imbalance_threshold: 0.3,
            migration_batch_size: 10,
        }
    }
}

/// Partition engine settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionConfig {
    pub enabled: bool,
    /// Partitions of one map are updated concurrently.
    pub parallel: bool,
    pub border_overlap: f32,
    pub store_only: bool,
    pub default_count: u32,
    pub maps: BTreeSet<MapId>,
    pub excluded_zones: BTreeSet<ZoneId>,
    pub count_overrides: BTreeMap<MapId, u32>,
    pub tile_based: bool,
    pub tiles_per_partition: u32,
    pub tiles_per_partition_overrides: BTreeMap<MapId, u32>,
    pub min_count: u32,
    pub max_count: u32,
    /// Players plus creatures in one partition that triggers a split. 0 disables.
    pub density_split_threshold: f32,
    /// Mean population per partition under which partitions merge. 0 disables.
    pub density_merge_threshold: f32,
}

impl PartitionConfig {
    pub fn is_partitioned_map(&self, map: MapId) -> bool {
        self.enabled && self.maps.contains(&map)
    }

    /// Whether moves on this map must be deferred to a safe point.
    pub fn runs_parallel(&self, map: MapId) -> bool {
        self.parallel && self.is_partitioned_map(map)
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            parallel: false,
            border_overlap: 40.0,
            store_only: false,
            default_count: 4,
            maps: BTreeSet::new(),
            excluded_zones: BTreeSet::new(),
            count_overrides: BTreeMap::new(),
            tile_based: false,
            tiles_per_partition: 16,
            tiles_per_partition_overrides: BTreeMap::new(),
            min_count: 1,
            max_count: 16,
            density_split_threshold: 0.0,
            density_merge_threshold: 0.0,
        }
    }
}

/// Full configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineConfig {
    pub layers: LayerConfig,
    pub partitions: PartitionConfig,
}

impl EngineConfig {
    /// Read every known key, falling back to defaults for missing or
    /// out-of-range values.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let d = EngineConfig::default();
        let flag = |key: &str, default: bool| provider.get_bool(key).unwrap_or(default);
        let count = |key: &str, default: u32| read_u32(provider, key).unwrap_or(default);
        let millis = |key: &str, default: u64| {
            provider
                .get_int(key)
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(default)
        };
        let ratio = |key: &str, default: f32| {
            provider
                .get_float(key)
                .map(|v| v as f32)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default)
        };
        let text = |key: &str| provider.get_string(key).unwrap_or_default();

        let layers = LayerConfig {
            enabled: flag("layers.enabled", d.layers.enabled),
            capacity: count("layers.capacity", d.layers.capacity),
            capacity_overrides: parse_map_values(
                "layers.capacity_overrides",
                &text("layers.capacity_overrides"),
            ),
            max_layers: count("layers.max", d.layers.max_layers),
            npc_layering: flag("layers.npc_enabled", d.layers.npc_layering),
            go_layering: flag("layers.go_enabled", d.layers.go_layering),
            persistence: flag("layers.persistence.enabled", d.layers.persistence),
            soft_transfers: flag("layers.soft_transfers.enabled", d.layers.soft_transfers),
            soft_transfer_timeout_ms: millis(
                "layers.soft_transfers.timeout_ms",
                d.layers.soft_transfer_timeout_ms,
            ),
            creation_warmup_ms: millis(
                "layers.hysteresis.creation_warmup_ms",
                d.layers.creation_warmup_ms,
            ),
            destruction_cooldown_ms: millis(
                "layers.hysteresis.destruction_cooldown_ms",
                d.layers.destruction_cooldown_ms,
            ),
            rebalancing: RebalancingConfig {
                enabled: flag("layers.rebalancing.enabled", d.layers.rebalancing.enabled),
                check_interval_ms: millis(
                    "layers.rebalancing.interval_ms",
                    d.layers.rebalancing.check_interval_ms,
                ),
                min_players_per_layer: count(
                    "layers.rebalancing.min_players",
                    d.layers.rebalancing.min_players_per_layer,
                ),
                imbalance_threshold: ratio(
                    "layers.rebalancing.imbalance_threshold",
                    d.layers.rebalancing.imbalance_threshold,
                ),
                migration_batch_size: count(
                    "layers.rebalancing.migration_batch",
                    d.layers.rebalancing.migration_batch_size,
                ),
            },
        };

        let partitions = PartitionConfig {
            enabled: flag("partitions.enabled", d.partitions.enabled),
            parallel: flag("partitions.parallel", d.partitions.parallel),
            border_overlap: ratio("partitions.border_overlap", d.partitions.border_overlap),
            store_only: flag("partitions.store_only", d.partitions.store_only),
            default_count: count("partitions.default_count", d.partitions.default_count),
            maps: parse_id_list("partitions.maps", &text("partitions.maps"))
                .into_iter()
                .map(MapId)
                .collect(),
            excluded_zones: parse_id_list("partitions.exclude_zones", &text("partitions.exclude_zones"))
                .into_iter()
                .map(ZoneId)
                .collect(),
            count_overrides: parse_map_values(
                "partitions.count_overrides",
                &text("partitions.count_overrides"),
            ),
            tile_based: flag("partitions.tile_based.enabled", d.partitions.tile_based),
            tiles_per_partition: count(
                "partitions.tile_based.tiles_per_partition",
                d.partitions.tiles_per_partition,
            ),
            tiles_per_partition_overrides: parse_map_values(
                "partitions.tile_based.tiles_per_partition_overrides",
                &text("partitions.tile_based.tiles_per_partition_overrides"),
            ),
            min_count: count("partitions.tile_based.min", d.partitions.min_count),
            max_count: count("partitions.tile_based.max", d.partitions.max_count),
            density_split_threshold: ratio(
                "partitions.density.split_threshold",
                d.partitions.density_split_threshold,
            ),
            density_merge_threshold: ratio(
                "partitions.density.merge_threshold",
                d.partitions.density_merge_threshold,
            ),
        };

        Self { layers, partitions }
    }
}

fn read_u32(provider: &dyn ConfigProvider, key: &str) -> Option<u32> {
    let raw = provider.get_int(key)?;
    match u32::try_from(raw) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(target: "strata::config", key, value = raw, "value out of range, using default");
            None
        }
    }
}

/// Parse a comma separated id list, skipping malformed tokens.
pub fn parse_id_list(key: &str, raw: &str) -> BTreeSet<u32> {
    let mut ids = BTreeSet::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u32>() {
            Ok(id) => {
                ids.insert(id);
            }
            Err(_) => {
                tracing::warn!(target: "strata::config", key, token, "skipping invalid id");
            }
        }
    }
    ids
}

/// Parse a `mapId:value` comma list, skipping malformed tokens and zero values.
pub fn parse_map_values(key: &str, raw: &str) -> BTreeMap<MapId, u32> {
    let mut values = BTreeMap::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let parsed = token.split_once(':').and_then(|(map, value)| {
            Some((map.trim().parse::<u32>().ok()?, value.trim().parse::<u32>().ok()?))
        });
        match parsed {
            Some((_, 0)) => {
                tracing::warn!(target: "strata::config", key, token, "skipping zero value");
            }
            Some((map, value)) => {
                values.insert(MapId(map), value);
            }
            None => {
                tracing::warn!(target: "strata::config", key, token, "skipping malformed entry");
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_provider_is_empty() {
        let cfg = EngineConfig::from_provider(&SettingsMap::new());
        assert_eq!(cfg, EngineConfig::default());
        assert!(!cfg.layers.enabled);
        assert_eq!(cfg.layers.soft_transfer_timeout_ms, 600_000);
    }

    #[test]
    fn map_value_list_skips_bad_tokens() {
        let parsed = parse_map_values("k", " 0:50, bogus, 1:x, 530:0 ,571:120,");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&MapId(0)], 50);
        assert_eq!(parsed[&MapId(571)], 120);
    }

    #[test]
    fn id_list_skips_bad_tokens() {
        let ids = parse_id_list("k", "1, 2,,x,3");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn yaml_nested_keys_flatten() {
        let yaml = r#"
layers:
  enabled: true
  capacity: 2
  capacity_overrides: "1:10"
  hysteresis:
    creation_warmup_ms: 5000
partitions:
  enabled: true
  maps: [0, 1]
  border_overlap: 12.5
"#;
        let settings = SettingsMap::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.get_string("partitions.maps").as_deref(), Some("0,1"));
        let cfg = EngineConfig::from_provider(&settings);
        assert!(cfg.layers.enabled);
        assert_eq!(cfg.layers.capacity, 2);
        assert_eq!(cfg.layers.capacity_for(MapId(1)), 10);
        assert_eq!(cfg.layers.capacity_for(MapId(0)), 2);
        assert_eq!(cfg.layers.creation_warmup_ms, 5_000);
        assert!(cfg.partitions.is_partitioned_map(MapId(1)));
        assert!(!cfg.partitions.is_partitioned_map(MapId(2)));
        assert_eq!(cfg.partitions.border_overlap, 12.5);
    }

    #[test]
    fn yaml_root_must_be_mapping() {
        assert!(matches!(
            SettingsMap::from_yaml_str("- 1\n- 2\n"),
            Err(ConfigError::NotAMapping)
        ));
    }

    #[test]
    fn negative_counts_fall_back_to_default() {
        let settings = SettingsMap::new().with("layers.capacity", SettingValue::Int(-5));
        let cfg = EngineConfig::from_provider(&settings);
        assert_eq!(cfg.layers.capacity, 100);
    }

    #[test]
    fn text_values_coerce() {
        let settings = SettingsMap::new()
            .with("a", SettingValue::Text("yes".into()))
            .with("b", SettingValue::Text(" 42 ".into()))
            .with("c", SettingValue::Int(3));
        assert_eq!(settings.get_bool("a"), Some(true));
        assert_eq!(settings.get_int("b"), Some(42));
        assert_eq!(settings.get_float("c"), Some(3.0));
        assert_eq!(settings.get_string("c").as_deref(), Some("3"));
        assert_eq!(settings.get_int("missing"), None);
    }

    #[test]
    fn parallel_requires_partitioned_map() {
        let mut cfg = PartitionConfig {
            parallel: true,
            ..PartitionConfig::default()
        };
        cfg.maps.insert(MapId(0));
        assert!(!cfg.runs_parallel(MapId(0)));
        cfg.enabled = true;
        assert!(cfg.runs_parallel(MapId(0)));
        assert!(!cfg.runs_parallel(MapId(1)));
    }
}
