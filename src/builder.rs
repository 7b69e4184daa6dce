use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::connections::{self, ConnectionEdge};
use crate::departures;
use crate::graph_tile::{GraphTileBuilder, TransitStopRecord};
use crate::ids::{self, GraphId};
use crate::merge;
use crate::tile_store::TileStore;
use crate::transit_format;

/// Counters a worker accumulates over its tile range.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuilderStats {
    pub tiles_built: u64,
    pub tiles_failed: u64,
    pub nodes_added: u64,
    pub edges_added: u64,
    pub departures_rejected: u64,
    pub stops_unconnected: u64,
}

impl BuilderStats {
    fn absorb(&mut self, other: BuilderStats) {
        self.tiles_built += other.tiles_built;
        self.tiles_failed += other.tiles_failed;
        self.nodes_added += other.nodes_added;
        self.edges_added += other.edges_added;
        self.departures_rejected += other.departures_rejected;
        self.stops_unconnected += other.stops_unconnected;
    }
}

/// Tile counts per worker: the first `n % workers` ranges get one extra.
fn partition(n: usize, workers: usize) -> Vec<usize> {
    let floor = n / workers;
    let at_ceiling = n % workers;
    (0..workers)
        .map(|i| if i < at_ceiling { floor + 1 } else { floor })
        .collect()
}

/// Adds transit data to every road tile that has an overlapping transit tile.
/// Individual tile failures are logged and skipped; previously committed
/// tiles stand.
pub fn build(config: &Config) -> Result<()> {
    let started = Instant::now();

    let Some(transit_dir) = config.transit_dir.as_deref() else {
        info!("Transit directory not configured. Transit will not be added.");
        return Ok(());
    };
    if !transit_dir.is_dir() {
        info!("Transit directory not found. Transit will not be added.");
        return Ok(());
    }

    let mut store = TileStore::new(config.tile_dir.clone(), config.tile_cache_bytes);

    // Discover transit tiles whose road tile exists and remember the road
    // tile's pre-existing node count for graph-space translation.
    let level_dir = transit_dir.join(config.local_level.to_string());
    let mut tiles: BTreeMap<GraphId, usize> = BTreeMap::new();
    for entry in WalkDir::new(&level_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(tile_id) = ids::tile_id_from_transit_path(transit_dir, entry.path()) else {
            continue;
        };
        if !store.tile_exists(tile_id) {
            continue;
        }
        match store.get_tile(tile_id) {
            Ok(tile) => {
                tiles.insert(tile_id, tile.nodes.len());
            }
            Err(e) => error!("Skipping tile {}: {:#}", tile_id, e),
        }
    }
    store.clear();

    if tiles.is_empty() {
        info!("No transit tiles found. Transit will not be added.");
        return Ok(());
    }

    let workers = config
        .concurrency
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1);
    info!(
        "Adding {} transit tiles to the local graph with {} workers",
        tiles.len(),
        workers
    );

    let progress = ProgressBar::new(tiles.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) - Splicing transit")?
            .progress_chars("##-"),
    );

    let keys: Vec<GraphId> = tiles.keys().copied().collect();
    let store = Mutex::new(store);

    let counts = partition(keys.len(), workers);
    let mut totals = BuilderStats::default();
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        let mut start = 0usize;
        for count in counts {
            let range = &keys[start..start + count];
            start += count;
            let store = &store;
            let tiles = &tiles;
            let progress = &progress;
            handles.push(
                scope.spawn(move || build_tiles(range, store, tiles, transit_dir, progress)),
            );
        }
        for handle in handles {
            match handle.join() {
                Ok(stats) => totals.absorb(stats),
                Err(_) => error!("A worker thread panicked; its remaining tiles were not updated"),
            }
        }
    });
    progress.finish_and_clear();

    info!(
        "Built {} tiles ({} failed): {} nodes and {} edges added, {} departures rejected, {} stops without connections",
        totals.tiles_built,
        totals.tiles_failed,
        totals.nodes_added,
        totals.edges_added,
        totals.departures_rejected,
        totals.stops_unconnected
    );
    info!("Finished adding transit in {:?}", started.elapsed());
    Ok(())
}

fn build_tiles(
    range: &[GraphId],
    store: &Mutex<TileStore>,
    tile_node_counts: &BTreeMap<GraphId, usize>,
    transit_dir: &Path,
    progress: &ProgressBar,
) -> BuilderStats {
    let mut stats = BuilderStats::default();
    for &tile_id in range {
        match build_tile(tile_id, store, tile_node_counts, transit_dir, &mut stats) {
            Ok(()) => stats.tiles_built += 1,
            Err(e) => {
                stats.tiles_failed += 1;
                error!("Tile {} not updated: {:#}", tile_id, e);
            }
        }
        progress.inc(1);
    }
    stats
}

fn build_tile(
    tile_id: GraphId,
    store: &Mutex<TileStore>,
    tile_node_counts: &BTreeMap<GraphId, usize>,
    transit_dir: &Path,
    stats: &mut BuilderStats,
) -> Result<()> {
    // Check out the road tile and a writable builder under the lock.
    let (road, mut builder) = {
        let mut store = store.lock().unwrap();
        if store.over_committed() {
            store.clear();
        }
        let tile = store.get_tile(tile_id)?;
        let builder = GraphTileBuilder::from_tile((*tile).clone());
        (tile, builder)
    };

    // Decode the transit blob outside the lock.
    let transit = transit_format::read_transit(transit_dir, tile_id)?;

    // Snap every stop onto the road network; each connects to one or two
    // road nodes along its declared way.
    let mut connection_edges: Vec<ConnectionEdge> = Vec::new();
    for stop in &transit.stops {
        if connections::connect_stop(stop, &road, &mut connection_edges) == 0 {
            stats.stops_unconnected += 1;
        }
        let one_stop_offset = builder.add_name(&stop.one_stop_id);
        let name_offset = builder.add_name(&stop.name);
        builder.add_transit_stop(TransitStopRecord {
            one_stop_offset,
            name_offset,
        });
    }
    connection_edges.sort_by_key(|c| c.road_node);
    info!(
        "Tile {}: added {} stops and {} connection edges",
        tile_id.tile(),
        transit.stops.len(),
        connection_edges.len()
    );

    let mut stop_access = HashMap::new();
    let (grouped, rejected) = departures::process_stop_pairs(
        &transit,
        road.header.date_created,
        &mut stop_access,
        tile_id,
    );
    stats.departures_rejected += rejected;

    let stop_edge_map = departures::build_stop_edges(&transit, &grouped, &mut builder);
    let route_types = departures::add_routes(&transit, &mut builder);

    let outcome = merge::add_to_graph(
        &mut builder,
        transit_dir,
        &transit,
        tile_node_counts,
        &stop_edge_map,
        &stop_access,
        &connection_edges,
        &route_types,
    );
    stats.nodes_added += u64::from(outcome.added_nodes);
    stats.edges_added += u64::from(outcome.added_edges);

    // Commit under the lock.
    let mut store = store.lock().unwrap();
    store.store_tile(builder.into_tile())?;
    Ok(())
}
