use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_local_level() -> u8 {
    2
}

/// Build configuration, deserialized from a JSON file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Root of the graph tile tree.
    pub tile_dir: PathBuf,
    /// Root of the transit tile tree; absence turns the stage into a no-op.
    #[serde(default)]
    pub transit_dir: Option<PathBuf>,
    /// Hierarchy level the transit tiles are cut at.
    #[serde(default = "default_local_level")]
    pub local_level: u8,
    /// Worker thread count, defaulting to the hardware parallelism.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Tile store cache budget in bytes.
    #[serde(default)]
    pub tile_cache_bytes: Option<usize>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let file = File::open(path)
            .with_context(|| format!("failed to open config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
