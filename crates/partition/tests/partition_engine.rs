use std::sync::Arc;

use glam::Vec2;
use strata_common::geometry::{GRID_CELL_SIZE, MAP_HALF_EXTENT};
use strata_common::{EngineConfig, EntityId, ManualClock, MapId, PartitionConfig, PartitionId};
use strata_kernel::OwnershipRecord;
use strata_partition::{PartitionEngine, PartitionLayout, PartitionLookupCache};
use strata_persist::{AsyncGateway, RecordStore};

fn partition_config(maps: &[u32], count: u32) -> EngineConfig {
    EngineConfig {
        partitions: PartitionConfig {
            enabled: true,
            default_count: count,
            maps: maps.iter().map(|&m| MapId(m)).collect(),
            ..PartitionConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[test]
fn every_position_resolves_inside_the_layout() {
    for count in [1, 2, 3, 4, 5, 7, 9, 16] {
        let layout = PartitionLayout::for_count(count);
        let mut seen = std::collections::BTreeSet::new();
        let step = GRID_CELL_SIZE / 2.0;
        let mut y = -MAP_HALF_EXTENT;
        while y < MAP_HALF_EXTENT {
            let mut x = -MAP_HALF_EXTENT;
            while x < MAP_HALF_EXTENT {
                let id = layout.partition_for_position(x, y);
                assert!(id.0 >= 1 && id.0 <= count, "count {count}: {id} at ({x}, {y})");
                seen.insert(id);
                x += step;
            }
            y += step;
        }
        assert_eq!(seen.len() as u32, count, "count {count} left partitions unreachable");
    }
}

#[test]
fn quadrant_layout_splits_at_the_origin() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Arc::new(PartitionEngine::new(Arc::new(partition_config(&[0], 4)), clock));
    engine.initialize();
    let m = MapId(0);
    assert_eq!(engine.partition_for_position(m, -1.0, -1.0), PartitionId(1));
    assert_eq!(engine.partition_for_position(m, 1.0, -1.0), PartitionId(2));
    assert_eq!(engine.partition_for_position(m, -1.0, 1.0), PartitionId(3));
    assert_eq!(engine.partition_for_position(m, 1.0, 1.0), PartitionId(4));

    assert!(engine.is_near_partition_boundary(m, 0.0, -1_000.0));
    assert!(engine.is_near_partition_boundary(m, -40.0, -1_000.0));
    assert!(!engine.is_near_partition_boundary(m, -41.0, -1_000.0));
    assert!(engine.is_near_partition_boundary(m, MAP_HALF_EXTENT + 1.0, 0.0));
}

#[test]
fn single_partition_map_has_no_boundary() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Arc::new(PartitionEngine::new(Arc::new(partition_config(&[0], 1)), clock));
    engine.initialize();
    assert!(!engine.is_near_partition_boundary(MapId(0), 0.0, 0.0));
    assert!(engine.adjacent_partitions(MapId(0), PartitionId(1)).is_empty());
}

#[test]
fn ownership_survives_a_restart_through_the_async_gateway() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = RecordStore::open(dir.path()).unwrap();
        store.put_ownership(OwnershipRecord {
            entity: EntityId(10),
            map: MapId(1),
            partition: PartitionId(2),
        });
        store.put_ownership(OwnershipRecord {
            entity: EntityId(10),
            map: MapId(0),
            partition: PartitionId(3),
        });
        store.checkpoint().unwrap();
    }

    let gateway = Arc::new(AsyncGateway::spawn(RecordStore::open(dir.path()).unwrap()).unwrap());
    let clock = Arc::new(ManualClock::new(0));
    let engine = Arc::new(
        PartitionEngine::new(Arc::new(partition_config(&[0, 1], 4)), clock)
            .with_persistence(gateway.clone()),
    );
    engine.initialize();
    gateway.flush();

    assert_eq!(engine.persistent_partition(EntityId(10), MapId(1)), Some(PartitionId(2)));
    assert_eq!(engine.partition_for_entity(MapId(1), 1.0, 1.0, EntityId(10)), PartitionId(2));

    // Ownership moves to map 0 alone; the stale map 1 row is deleted.
    engine.persist_partition_ownership(EntityId(10), MapId(0), PartitionId(4));
    gateway.flush();
    let rows = gateway.store().lock().unwrap().ownership_rows();
    assert_eq!(
        rows,
        vec![OwnershipRecord {
            entity: EntityId(10),
            map: MapId(0),
            partition: PartitionId(4),
        }]
    );
}

#[test]
fn resize_invalidates_cached_lookups() {
    let clock = Arc::new(ManualClock::new(0));
    let mut cfg = partition_config(&[0], 1);
    cfg.partitions.density_split_threshold = 10.0;
    cfg.partitions.max_count = 4;
    let engine = Arc::new(PartitionEngine::new(Arc::new(cfg), clock.clone()));
    engine.initialize();
    let mut cache = PartitionLookupCache::new();

    assert_eq!(cache.lookup(&engine, MapId(0), 100.0, 0.0, EntityId(1)), PartitionId(1));
    engine.update_partition_player_count(MapId(0), PartitionId(1), 25);
    engine.update(MapId(0), 50);
    assert_eq!(engine.partition_count(MapId(0)), 2);
    assert_eq!(cache.lookup(&engine, MapId(0), 100.0, 0.0, EntityId(1)), PartitionId(2));
}

#[test]
fn concurrent_boundary_updates_on_distinct_maps() {
    let clock = Arc::new(ManualClock::new(0));
    let maps: Vec<u32> = (0..8).collect();
    let engine = Arc::new(PartitionEngine::new(Arc::new(partition_config(&maps, 4)), clock));
    engine.initialize();

    let handles: Vec<_> = maps
        .iter()
        .map(|&m| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..200u64 {
                    let entity = EntityId(u64::from(m) * 1_000 + i);
                    let pos = Vec2::new(i as f32, 0.0);
                    engine.register_boundary_object_at(MapId(m), PartitionId(1), entity, pos);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.total_boundary_objects(), 8 * 200);
    for m in maps {
        assert_eq!(engine.boundary_count(MapId(m), PartitionId(1)), 200);
    }
}

#[test]
fn nearby_query_handles_extreme_radii() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Arc::new(PartitionEngine::new(Arc::new(partition_config(&[0], 4)), clock));
    engine.initialize();
    let m = MapId(0);
    let corners = [
        Vec2::new(-MAP_HALF_EXTENT, -MAP_HALF_EXTENT),
        Vec2::new(MAP_HALF_EXTENT, -MAP_HALF_EXTENT),
        Vec2::new(-MAP_HALF_EXTENT, MAP_HALF_EXTENT),
        Vec2::new(MAP_HALF_EXTENT, MAP_HALF_EXTENT),
    ];
    engine.register_boundary_object_at(m, PartitionId(1), EntityId(1), Vec2::ZERO);
    for (i, pos) in corners.into_iter().enumerate() {
        engine.register_boundary_object_at(m, PartitionId(i as u32 + 1), EntityId(i as u64 + 10), pos);
    }

    assert_eq!(engine.nearby_boundary_objects(m, Vec2::ZERO, 0.0), vec![EntityId(1)]);

    let start = std::time::Instant::now();
    let mut all = engine.nearby_boundary_objects(m, Vec2::ZERO, 200_000.0);
    all.sort();
    assert_eq!(all, vec![EntityId(1), EntityId(10), EntityId(11), EntityId(12), EntityId(13)]);
    assert!(start.elapsed() < std::time::Duration::from_secs(1));

    assert!(engine.nearby_boundary_objects(m, Vec2::ZERO, f32::INFINITY).is_empty());
    assert!(engine.nearby_boundary_objects(m, Vec2::ZERO, f32::NAN).is_empty());
    assert!(engine.nearby_boundary_objects(m, Vec2::ZERO, -5.0).is_empty());
}
