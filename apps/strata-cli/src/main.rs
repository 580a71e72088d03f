use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use strata_common::geometry::MAP_HALF_EXTENT;
use strata_common::{
    EngineConfig, EntityId, GridCell, InstanceId, ManualClock, MapId, PartitionId, SettingsMap,
    SpawnId, ZoneId,
};
use strata_kernel::{EntityInfo, PersistenceGateway, SimEvent, SimWorld};
use strata_layer::LayerEngine;
use strata_partition::{PartitionEngine, PartitionLayout};
use strata_persist::{AsyncGateway, RecordStore};
use tracing_subscriber::EnvFilter;

const SIM_MAP: MapId = MapId(0);
const SIM_ZONE: ZoneId = ZoneId(1);

#[derive(Parser)]
#[command(name = "strata-cli", about = "CLI for the layer and partition engines")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML settings file of flat `key: value` pairs
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Print the grid layout used for a partition count
    Layout {
        #[arg(short, long, default_value = "4")]
        count: u32,
    },
    /// Resolve a world position to its partition
    Resolve {
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(short, long, allow_hyphen_values = true)]
        x: f32,
        #[arg(short, long, allow_hyphen_values = true)]
        y: f32,
    },
    /// Join players to one map and drive both engines
    Simulate {
        #[arg(short, long, default_value = "200")]
        players: u64,
        #[arg(short, long, default_value = "120")]
        ticks: u64,
        /// Simulated milliseconds per tick
        #[arg(long, default_value = "1000")]
        tick_ms: u64,
        /// Directory for a file-backed record store
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    Ok(match path {
        Some(path) => EngineConfig::from_provider(&SettingsMap::load(path)?),
        None => EngineConfig::default(),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Layout { count } => {
            let layout = PartitionLayout::for_count(count);
            println!("partitions: {}", layout.count);
            println!("grid: {} rows x {} cols", layout.rows, layout.cols);
            println!(
                "cell: {}x{} grids ({:.1} x {:.1} world units)",
                layout.cell_width,
                layout.cell_height,
                layout.cell_world_width(),
                layout.cell_world_height()
            );
        }
        Commands::Resolve { map, x, y } => {
            let map = MapId(map);
            let clock = Arc::new(ManualClock::new(0));
            let engine = Arc::new(PartitionEngine::new(Arc::new(config), clock));
            engine.initialize();
            println!(
                "map {map}: partitioned={} count={}",
                engine.is_map_partitioned(map),
                engine.partition_count(map)
            );
            println!(
                "({x}, {y}) -> partition {} near_boundary={}",
                engine.partition_for_position(map, x, y),
                engine.is_near_partition_boundary(map, x, y)
            );
        }
        Commands::Simulate {
            players,
            ticks,
            tick_ms,
            store,
        } => simulate(config, players, ticks, tick_ms, store.as_deref())?,
    }

    Ok(())
}

/// Both engines are switched on for the simulated map whatever the settings
/// file says; every other option is taken as configured.
fn simulate(
    mut config: EngineConfig,
    players: u64,
    ticks: u64,
    tick_ms: u64,
    store: Option<&Path>,
) -> anyhow::Result<()> {
    config.layers.enabled = true;
    config.partitions.enabled = true;
    config.partitions.maps.insert(SIM_MAP);
    let config = Arc::new(config);

    let clock = Arc::new(ManualClock::new(0));
    let world = Arc::new(SimWorld::new());
    seed_world(&world);

    let gateway = match store {
        Some(dir) => Some(Arc::new(AsyncGateway::spawn(RecordStore::open(dir)?)?)),
        None => None,
    };

    let mut layers = LayerEngine::new(Arc::clone(&config), clock.clone(), world.clone(), world.clone());
    let mut partitions = PartitionEngine::new(Arc::clone(&config), clock.clone()).with_world(world.clone());
    if let Some(gateway) = &gateway {
        let persistence: Arc<dyn PersistenceGateway> = gateway.clone();
        layers = layers.with_persistence(Arc::clone(&persistence));
        partitions = partitions.with_persistence(persistence);
    }
    let layers = Arc::new(layers);
    let partitions = Arc::new(partitions);
    partitions.initialize();

    println!("Simulating {players} players for {ticks} ticks of {tick_ms}ms");
    for id in 1..=players {
        let player = EntityId(id);
        world.upsert_entity(EntityInfo {
            bot: id % 4 == 0,
            ..EntityInfo::player(player, SIM_MAP, SIM_ZONE)
        });
        layers.load_persistent_assignment(player);
        layers.auto_assign_player_to_layer(SIM_MAP, player);
        let (x, y) = spawn_position(id, players);
        let partition = partitions.partition_for_entity(SIM_MAP, x, y, player);
        partitions.persist_partition_ownership(player, SIM_MAP, partition);
        if partitions.is_near_partition_boundary(SIM_MAP, x, y) {
            partitions.register_boundary_object(SIM_MAP, partition, player);
        }
    }

    let leave_at = ticks / 2;
    for tick in 1..=ticks {
        clock.advance(tick_ms);
        if tick == leave_at {
            let leaving = players * 3 / 4;
            for id in 1..=leaving {
                layers.force_remove_player(EntityId(id));
                world.remove_entity(EntityId(id));
            }
            println!("tick {tick}: {leaving} players left");
        }
        layers.update(SIM_MAP, tick_ms);
        partitions.update(SIM_MAP, tick_ms);
    }

    if let Some(gateway) = &gateway {
        gateway.flush();
        gateway.checkpoint();
        gateway.flush();
    }

    println!("\nLayers on map {SIM_MAP}:");
    for (layer, count) in layers.layer_player_counts(SIM_MAP) {
        println!("  layer {layer}: {count} players, {} clones", world.clone_count(SIM_MAP, layer));
    }
    println!("\nPartitions on map {SIM_MAP}:");
    for index in 1..=partitions.partition_count(SIM_MAP) {
        let partition = PartitionId(index);
        println!(
            "  partition {partition}: {} boundary objects",
            partitions.boundary_count(SIM_MAP, partition)
        );
    }
    let (npcs, gos) = layers.object_assignment_counts();
    let chats = world
        .events()
        .iter()
        .filter(|e| matches!(e, SimEvent::ChatSent { .. }))
        .count();
    println!(
        "\nsoft transfers pending: {}, npc assignments: {npcs}, go assignments: {gos}, chat lines: {chats}",
        layers.pending_soft_transfer_count()
    );
    println!("rebalancing: {}", serde_json::to_string_pretty(&layers.metrics())?);
    Ok(())
}

/// One instance of the simulated map with a handful of loaded grids around
/// the origin, each carrying creature and game-object spawns.
fn seed_world(world: &SimWorld) {
    let instance = world.add_instance(SIM_MAP, InstanceId(1), 0);
    let mut next_spawn = 1;
    for gy in 30..34 {
        for gx in 30..34 {
            let cell = GridCell::new(gx, gy);
            world.load_grid(instance, cell);
            let creatures: Vec<SpawnId> = (0..3).map(|i| SpawnId(next_spawn + i)).collect();
            let objects = [SpawnId(next_spawn + 3)];
            world.add_spawns(SIM_MAP, 0, cell, &creatures, &objects);
            next_spawn += 4;
        }
    }
}

/// Players spread evenly over the middle half of the map.
fn spawn_position(id: u64, players: u64) -> (f32, f32) {
    let side = (players as f64).sqrt().ceil().max(1.0) as u64;
    let step = MAP_HALF_EXTENT / side as f32;
    let i = id - 1;
    let x = (i % side) as f32 * step - MAP_HALF_EXTENT / 2.0;
    let y = (i / side) as f32 * step - MAP_HALF_EXTENT / 2.0;
    (x, y)
}
