use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec2;
use strata_common::geometry::MAP_HALF_EXTENT;
use strata_common::{EngineConfig, EntityId, MapId, MonotonicClock, PartitionConfig, PartitionId};
use strata_partition::{PartitionEngine, PartitionLookupCache};

fn make_engine(count: u32) -> Arc<PartitionEngine> {
    let cfg = EngineConfig {
        partitions: PartitionConfig {
            enabled: true,
            default_count: count,
            maps: [MapId(0)].into_iter().collect(),
            ..PartitionConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = Arc::new(PartitionEngine::new(Arc::new(cfg), Arc::new(MonotonicClock::new())));
    engine.initialize();
    engine
}

fn positions(n: usize) -> Vec<(f32, f32)> {
    let side = (n as f32).sqrt().ceil() as usize;
    let step = (MAP_HALF_EXTENT * 2.0) / side as f32;
    (0..n)
        .map(|i| {
            let x = (i % side) as f32 * step - MAP_HALF_EXTENT;
            let y = (i / side) as f32 * step - MAP_HALF_EXTENT;
            (x, y)
        })
        .collect()
}

fn bench_position_lookup(count: u32, iterations: usize) {
    let engine = make_engine(count);
    let points = positions(1024);

    let start = Instant::now();
    for i in 0..iterations {
        let (x, y) = points[i % points.len()];
        let _ = black_box(engine.partition_for_position(MapId(0), black_box(x), black_box(y)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  position lookup ({count} partitions, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_cached_entity_lookup(entities: usize, iterations: usize) {
    let engine = make_engine(4);
    let points = positions(entities);
    let mut cache = PartitionLookupCache::new();

    let start = Instant::now();
    for i in 0..iterations {
        let idx = i % entities;
        let (x, y) = points[idx];
        let _ = black_box(cache.lookup(&engine, MapId(0), x, y, EntityId(idx as u64 + 1)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  cached entity lookup ({entities} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_boundary_query(objects: usize, radius: f32, iterations: usize) {
    let engine = make_engine(4);
    for (i, (x, y)) in positions(objects).into_iter().enumerate() {
        let pos = Vec2::new(x * 0.05, y * 0.05);
        let partition = engine.partition_for_position(MapId(0), pos.x, pos.y);
        engine.register_boundary_object_at(MapId(0), partition, EntityId(i as u64 + 1), pos);
    }

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(engine.nearby_boundary_objects(MapId(0), black_box(Vec2::ZERO), black_box(radius)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  boundary query ({objects} objects, r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
    let _ = engine.boundary_count(MapId(0), PartitionId(1));
}

fn main() {
    println!("=== Partition Lookup Benchmarks ===\n");

    println!("Position lookup:");
    bench_position_lookup(4, 100_000);
    bench_position_lookup(16, 100_000);

    println!("\nCached entity lookup:");
    bench_cached_entity_lookup(100, 100_000);
    bench_cached_entity_lookup(10_000, 100_000);

    println!("\nBoundary proximity query:");
    bench_boundary_query(1000, 50.0, 10_000);
    bench_boundary_query(1000, 200.0, 10_000);

    println!("\n=== Done ===");
}
