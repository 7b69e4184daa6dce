use std::collections::HashMap;

use chrono::NaiveDate;
use geo_types::Coord;
use serde::{Deserialize, Serialize};

use crate::ids::GraphId;

pub const PEDESTRIAN_ACCESS: u8 = 1;
pub const BICYCLE_ACCESS: u8 = 2;
pub const AUTO_ACCESS: u8 = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadClass {
    Motorway,
    Trunk,
    Primary,
    Secondary,
    Tertiary,
    Unclassified,
    Residential,
    ServiceOther,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Use {
    Road,
    TransitConnection,
    Rail,
    Bus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    StreetIntersection,
    MultiUseTransitStop,
}

/// A node in the tile. `edge_index`/`edge_count` delimit its outbound edges
/// in the tile's directed-edge vector; the ranges of consecutive nodes are
/// contiguous.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub ll: Coord<f64>,
    pub road_class: RoadClass,
    pub access: u8,
    pub node_type: NodeType,
    pub edge_index: u32,
    pub edge_count: u32,
    pub mode_change: bool,
    /// Name-table offset of the node's timezone, 0 when unset.
    pub timezone: u32,
    /// For transit stop nodes, the stop's position in the transit tile.
    pub stop_index: u32,
}

impl NodeInfo {
    pub fn new(ll: Coord<f64>, road_class: RoadClass, access: u8, node_type: NodeType) -> NodeInfo {
        NodeInfo {
            ll,
            road_class,
            access,
            node_type,
            edge_index: 0,
            edge_count: 0,
            mode_change: false,
            timezone: 0,
            stop_index: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectedEdge {
    pub end_node: GraphId,
    /// Length in meters, never below 1 for synthesized edges.
    pub length: f32,
    pub edge_use: Use,
    pub speed: u8,
    pub classification: RoadClass,
    /// Position of this edge within its owning node's edge range.
    pub local_edge_index: u32,
    pub forward_access: u8,
    pub reverse_access: u8,
    /// Transit line identifier, 0 for non-transit edges.
    pub line_id: u32,
    pub edge_info_offset: u32,
    /// Whether this edge runs in the orientation the edge-info shape is stored in.
    pub forward: bool,
    pub exit_sign: bool,
    pub access_restriction: bool,
}

/// Shared geometry and way metadata referenced by directed edges. One entry
/// serves both travel directions between the same endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub way_id: u64,
    pub node_a: GraphId,
    pub node_b: GraphId,
    pub shape: Vec<Coord<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sign {
    pub edge_index: u32,
    pub text_offset: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessRestriction {
    pub edge_index: u32,
    pub modes: u8,
    pub value: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitStopRecord {
    pub one_stop_offset: u32,
    pub name_offset: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitRouteRecord {
    pub route_index: u32,
    pub one_stop_offset: u32,
    pub operated_by_onestop_offset: u32,
    pub operated_by_name_offset: u32,
    pub operated_by_website_offset: u32,
    pub color: u32,
    pub text_color: u32,
    pub name_offset: u32,
    pub long_name_offset: u32,
    pub desc_offset: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitDepartureRecord {
    pub line_id: u32,
    pub trip: u32,
    pub route_index: u32,
    pub block_id: u32,
    pub headsign_offset: u32,
    pub departure_time: u32,
    pub elapsed_time: u32,
    pub end_day: u32,
    pub dow: u8,
    pub days: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileHeader {
    pub graph_id: GraphId,
    /// Reference date for service-day bitmasks of departures in this tile.
    pub date_created: NaiveDate,
}

/// One road-network tile as stored on disk (bincode-encoded).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphTile {
    pub header: TileHeader,
    pub nodes: Vec<NodeInfo>,
    pub directed_edges: Vec<DirectedEdge>,
    pub signs: Vec<Sign>,
    pub access_restrictions: Vec<AccessRestriction>,
    pub edge_infos: Vec<EdgeInfo>,
    /// Interned string table; offset 0 is always the empty string.
    pub text: Vec<String>,
    pub stops: Vec<TransitStopRecord>,
    pub routes: Vec<TransitRouteRecord>,
    pub departures: Vec<TransitDepartureRecord>,
}

impl GraphTile {
    pub fn edge_info(&self, offset: u32) -> &EdgeInfo {
        &self.edge_infos[offset as usize]
    }

    pub fn name(&self, offset: u32) -> &str {
        &self.text[offset as usize]
    }

    /// Bounding box over the tile's node locations, `None` for empty tiles.
    pub fn bounding_box(&self) -> Option<geo_types::Rect<f64>> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;

        for node in &self.nodes {
            min_x = min_x.min(node.ll.x);
            min_y = min_y.min(node.ll.y);
            max_x = max_x.max(node.ll.x);
            max_y = max_y.max(node.ll.y);
        }

        if self.nodes.is_empty() {
            None
        } else {
            Some(geo_types::Rect::new(
                Coord { x: min_x, y: min_y },
                Coord { x: max_x, y: max_y },
            ))
        }
    }
}

/// Owning, writable view of a tile. Deserializes an existing tile, lets the
/// merge take its node/edge buffers out by value and rebuild them, and
/// re-serializes the result. All string fields go through [`add_name`]
/// interning; all shapes go through [`add_edge_info`] deduplication.
///
/// [`add_name`]: GraphTileBuilder::add_name
/// [`add_edge_info`]: GraphTileBuilder::add_edge_info
pub struct GraphTileBuilder {
    tile: GraphTile,
    name_index: HashMap<String, u32>,
    edge_info_index: HashMap<(u64, GraphId, GraphId), u32>,
}

impl GraphTileBuilder {
    pub fn new(graph_id: GraphId, date_created: NaiveDate) -> GraphTileBuilder {
        GraphTileBuilder::from_tile(GraphTile {
            header: TileHeader {
                graph_id: graph_id.tile_base(),
                date_created,
            },
            nodes: Vec::new(),
            directed_edges: Vec::new(),
            signs: Vec::new(),
            access_restrictions: Vec::new(),
            edge_infos: Vec::new(),
            text: vec![String::new()],
            stops: Vec::new(),
            routes: Vec::new(),
            departures: Vec::new(),
        })
    }

    pub fn from_tile(mut tile: GraphTile) -> GraphTileBuilder {
        if tile.text.is_empty() {
            tile.text.push(String::new());
        }
        let mut name_index = HashMap::new();
        for (i, name) in tile.text.iter().enumerate() {
            name_index.entry(name.clone()).or_insert(i as u32);
        }
        let mut edge_info_index = HashMap::new();
        for (i, info) in tile.edge_infos.iter().enumerate() {
            edge_info_index.insert(Self::edge_info_key(info.way_id, info.node_a, info.node_b), i as u32);
        }
        GraphTileBuilder {
            tile,
            name_index,
            edge_info_index,
        }
    }

    fn edge_info_key(way_id: u64, a: GraphId, b: GraphId) -> (u64, GraphId, GraphId) {
        if a <= b {
            (way_id, a, b)
        } else {
            (way_id, b, a)
        }
    }

    pub fn header(&self) -> &TileHeader {
        &self.tile.header
    }

    /// Interns a string and returns its name-table offset. The empty string
    /// is always offset 0.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.name_index.get(name) {
            return offset;
        }
        let offset = self.tile.text.len() as u32;
        self.tile.text.push(name.to_string());
        self.name_index.insert(name.to_string(), offset);
        offset
    }

    /// Registers shared edge info for the edge between `a` and `b`, keyed on
    /// the way id and the unordered endpoint pair. Returns the offset and
    /// whether this call stored the shape (i.e. the caller's orientation is
    /// the canonical one; an opposing edge registered later sees `false`).
    pub fn add_edge_info(
        &mut self,
        way_id: u64,
        a: GraphId,
        b: GraphId,
        shape: &[Coord<f64>],
    ) -> (u32, bool) {
        let key = Self::edge_info_key(way_id, a, b);
        if let Some(&offset) = self.edge_info_index.get(&key) {
            return (offset, false);
        }
        let offset = self.tile.edge_infos.len() as u32;
        self.tile.edge_infos.push(EdgeInfo {
            way_id,
            node_a: a,
            node_b: b,
            shape: shape.to_vec(),
        });
        self.edge_info_index.insert(key, offset);
        (offset, true)
    }

    /// Moves the node vector out of the builder, leaving it empty.
    pub fn take_nodes(&mut self) -> Vec<NodeInfo> {
        std::mem::take(&mut self.tile.nodes)
    }

    /// Moves the directed-edge vector out of the builder, leaving it empty.
    pub fn take_directed_edges(&mut self) -> Vec<DirectedEdge> {
        std::mem::take(&mut self.tile.directed_edges)
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.tile.nodes
    }

    pub fn directed_edges(&self) -> &[DirectedEdge] {
        &self.tile.directed_edges
    }

    pub fn push_node(&mut self, node: NodeInfo) {
        self.tile.nodes.push(node);
    }

    pub fn push_directed_edge(&mut self, edge: DirectedEdge) {
        self.tile.directed_edges.push(edge);
    }

    pub fn signs(&self) -> &[Sign] {
        &self.tile.signs
    }

    pub fn signs_mut(&mut self) -> &mut [Sign] {
        &mut self.tile.signs
    }

    pub fn access_restrictions(&self) -> &[AccessRestriction] {
        &self.tile.access_restrictions
    }

    pub fn access_restrictions_mut(&mut self) -> &mut [AccessRestriction] {
        &mut self.tile.access_restrictions
    }

    pub fn add_transit_stop(&mut self, stop: TransitStopRecord) {
        self.tile.stops.push(stop);
    }

    pub fn add_transit_route(&mut self, route: TransitRouteRecord) {
        self.tile.routes.push(route);
    }

    pub fn add_transit_departure(&mut self, departure: TransitDepartureRecord) {
        self.tile.departures.push(departure);
    }

    pub fn departures(&self) -> &[TransitDepartureRecord] {
        &self.tile.departures
    }

    pub fn into_tile(self) -> GraphTile {
        self.tile
    }
}
