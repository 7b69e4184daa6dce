use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Packed graph identifier: hierarchy level, tile index and node index in one
/// `u64`, ordered so that sorting by the raw value sorts by (level, tile, node).
///
/// Two numbering spaces share this type. In *transit space* the node index is
/// a stop's position in its transit tile's stop list; in *graph space* it is
/// the position in the merged node vector of the road tile. [`to_graph_id`]
/// translates between them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(u64);

const LEVEL_SHIFT: u64 = 56;
const TILE_SHIFT: u64 = 32;
const TILE_MASK: u64 = 0xff_ffff;
const NODE_MASK: u64 = 0xffff_ffff;

impl GraphId {
    /// Sentinel meaning "no valid identifier".
    pub const INVALID: GraphId = GraphId(u64::MAX);

    pub fn new(level: u8, tile: u32, node: u32) -> GraphId {
        debug_assert!(u64::from(tile) <= TILE_MASK);
        GraphId((u64::from(level) << LEVEL_SHIFT) | (u64::from(tile) << TILE_SHIFT) | u64::from(node))
    }

    pub fn from_packed(value: u64) -> GraphId {
        GraphId(value)
    }

    pub fn packed(self) -> u64 {
        self.0
    }

    pub fn level(self) -> u8 {
        (self.0 >> LEVEL_SHIFT) as u8
    }

    pub fn tile(self) -> u32 {
        ((self.0 >> TILE_SHIFT) & TILE_MASK) as u32
    }

    pub fn node(self) -> u32 {
        (self.0 & NODE_MASK) as u32
    }

    /// The same identifier with the node index cleared.
    pub fn tile_base(self) -> GraphId {
        GraphId(self.0 & !NODE_MASK)
    }

    pub fn with_node(self, node: u32) -> GraphId {
        GraphId((self.0 & !NODE_MASK) | u64::from(node))
    }

    pub fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }
}

impl Default for GraphId {
    fn default() -> Self {
        GraphId::INVALID
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level(), self.tile(), self.node())
    }
}

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "GraphId({}/{}/{})", self.level(), self.tile(), self.node())
        } else {
            write!(f, "GraphId(invalid)")
        }
    }
}

/// Relative file name for a tile: the 9-digit zero-padded tile index split
/// into groups of three under the level directory, e.g. `2/000/047/701.gph`.
pub fn file_suffix(id: GraphId, extension: &str) -> String {
    let digits = format!("{:09}", id.tile());
    format!(
        "{}/{}/{}/{}.{}",
        id.level(),
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        extension
    )
}

pub fn graph_tile_path(tile_dir: &Path, id: GraphId) -> PathBuf {
    tile_dir.join(file_suffix(id, "gph"))
}

pub fn transit_tile_path(transit_dir: &Path, id: GraphId) -> PathBuf {
    transit_dir.join(file_suffix(id, "pbf"))
}

/// Derives the tile identifier from a transit file path by stripping the
/// transit directory prefix and reading the suffix back as level and tile
/// index. Returns `None` for paths that do not follow the tile layout.
pub fn tile_id_from_transit_path(transit_dir: &Path, path: &Path) -> Option<GraphId> {
    let suffix = path.strip_prefix(transit_dir).ok()?;
    if suffix.extension()? != "pbf" {
        return None;
    }
    let stem = suffix.with_extension("");
    let parts: Vec<String> = stem
        .iter()
        .map(|c| c.to_string_lossy().into_owned())
        .collect();
    if parts.len() != 4 {
        return None;
    }
    let level: u8 = parts[0].parse().ok()?;
    let tile: u32 = format!("{}{}{}", parts[1], parts[2], parts[3]).parse().ok()?;
    Some(GraphId::new(level, tile, 0))
}

/// Translates a stop identifier from transit space to graph space by adding
/// the road tile's pre-existing node count. Returns [`GraphId::INVALID`] when
/// the stop's tile has no road presence.
pub fn to_graph_id(pbf_id: GraphId, tile_node_counts: &BTreeMap<GraphId, usize>) -> GraphId {
    match tile_node_counts.get(&pbf_id.tile_base()) {
        None => GraphId::INVALID,
        Some(count) => pbf_id.with_node(pbf_id.node() + *count as u32),
    }
}
