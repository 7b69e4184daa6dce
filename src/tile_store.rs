use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::graph_tile::GraphTile;
use crate::ids::{self, GraphId};

const DEFAULT_CACHE_BUDGET: usize = 256 * 1024 * 1024;

/// Read/write access to the graph tile directory with a byte-budgeted cache.
/// Workers share one store behind a mutex; between tiles they check
/// [`over_committed`] and [`clear`] the cache rather than evicting piecemeal.
///
/// [`over_committed`]: TileStore::over_committed
/// [`clear`]: TileStore::clear
pub struct TileStore {
    tile_dir: PathBuf,
    cache: HashMap<GraphId, Arc<GraphTile>>,
    cached_bytes: usize,
    cache_budget: usize,
}

impl TileStore {
    pub fn new(tile_dir: PathBuf, cache_budget: Option<usize>) -> TileStore {
        TileStore {
            tile_dir,
            cache: HashMap::new(),
            cached_bytes: 0,
            cache_budget: cache_budget.unwrap_or(DEFAULT_CACHE_BUDGET),
        }
    }

    pub fn tile_exists(&self, id: GraphId) -> bool {
        ids::graph_tile_path(&self.tile_dir, id.tile_base()).exists()
    }

    pub fn get_tile(&mut self, id: GraphId) -> Result<Arc<GraphTile>> {
        let base = id.tile_base();
        if let Some(tile) = self.cache.get(&base) {
            return Ok(Arc::clone(tile));
        }

        let path = ids::graph_tile_path(&self.tile_dir, base);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read tile {}", path.display()))?;
        let config = bincode::config::standard();
        let (tile, _): (GraphTile, _) = bincode::serde::decode_from_slice(&bytes, config)
            .map_err(|e| anyhow!("invalid tile {}: {}", path.display(), e))?;

        let tile = Arc::new(tile);
        self.cached_bytes += bytes.len();
        self.cache.insert(base, Arc::clone(&tile));
        debug!("Loaded tile {} ({} bytes)", base, bytes.len());
        Ok(tile)
    }

    /// Serializes the tile back to its path (creating parent directories) and
    /// refreshes the cache entry.
    pub fn store_tile(&mut self, tile: GraphTile) -> Result<()> {
        let base = tile.header.graph_id.tile_base();
        let path = ids::graph_tile_path(&self.tile_dir, base);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let config = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&tile, config)
            .map_err(|e| anyhow!("failed to encode tile {}: {}", base, e))?;
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write tile {}", path.display()))?;

        self.cached_bytes += bytes.len();
        self.cache.insert(base, Arc::new(tile));
        Ok(())
    }

    pub fn over_committed(&self) -> bool {
        self.cached_bytes > self.cache_budget
    }

    pub fn clear(&mut self) {
        debug!(
            "Clearing tile cache ({} tiles, {} bytes)",
            self.cache.len(),
            self.cached_bytes
        );
        self.cache.clear();
        self.cached_bytes = 0;
    }
}
