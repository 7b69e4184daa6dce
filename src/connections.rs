use geo::{Closest, ClosestPoint, Distance, Haversine, Line, Point};
use geo_types::Coord;
use log::{debug, error};
use ordered_float::OrderedFloat;

use crate::graph_tile::GraphTile;
use crate::ids::GraphId;
use crate::transit_format::Stop;

/// A synthesized pedestrian edge between a road node and a transit stop.
/// Shapes run road-node-first; the merge emits the paired reverse edge.
#[derive(Clone, Debug)]
pub struct ConnectionEdge {
    pub road_node: GraphId,
    pub stop_node: GraphId,
    pub length: f64,
    pub shape: Vec<Coord<f64>>,
}

struct Snap {
    start_node: GraphId,
    end_node: GraphId,
    closest: Point<f64>,
    distance: f64,
    segment: usize,
    shape: Vec<Coord<f64>>,
    edge_length: f32,
}

/// Closest point on a polyline: the point, its haversine distance and the
/// index of the segment it lies on. `None` for degenerate polylines.
fn closest_on_polyline(
    point: Point<f64>,
    shape: &[Coord<f64>],
) -> Option<(Point<f64>, f64, usize)> {
    shape
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let segment = Line::new(pair[0], pair[1]);
            let candidate = match segment.closest_point(&point) {
                Closest::SinglePoint(p) => p,
                Closest::Intersection(p) => p,
                Closest::Indeterminate => Point::from(pair[0]),
            };
            (candidate, Haversine.distance(point, candidate), i)
        })
        .min_by_key(|&(_, distance, _)| OrderedFloat(distance))
}

pub fn polyline_length(shape: &[Coord<f64>]) -> f64 {
    shape
        .windows(2)
        .map(|pair| Haversine.distance(Point::from(pair[0]), Point::from(pair[1])))
        .sum()
}

/// Finds the closest directed edge on the stop's declared way and appends one
/// connection per endpoint that lives in the stop's tile. Returns the number
/// of connections added; zero means the stop will have no road access.
pub fn connect_stop(
    stop: &Stop,
    tile: &GraphTile,
    connections: &mut Vec<ConnectionEdge>,
) -> usize {
    let stop_ll = Point::new(stop.lon, stop.lat);
    let stop_coord = Coord {
        x: stop.lon,
        y: stop.lat,
    };
    let wayid = stop.osm_way_id;
    let tile_id = tile.header.graph_id;

    // Linear scan over every directed edge whose edge info references the
    // stop's way; there is no way-id index in the tile.
    let mut best: Option<Snap> = None;
    for (i, node) in tile.nodes.iter().enumerate() {
        for j in 0..node.edge_count {
            let de = &tile.directed_edges[(node.edge_index + j) as usize];
            let info = tile.edge_info(de.edge_info_offset);
            if info.way_id != wayid {
                continue;
            }

            // Orient the shape in the edge's travel direction before
            // matching, so the segment index refers to the shape the
            // connection geometry is cut from.
            let mut shape = info.shape.clone();
            if !de.forward {
                shape.reverse();
            }
            let Some((closest, distance, segment)) = closest_on_polyline(stop_ll, &shape) else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|b| OrderedFloat(distance) < OrderedFloat(b.distance))
            {
                best = Some(Snap {
                    start_node: tile_id.with_node(i as u32),
                    end_node: de.end_node,
                    closest,
                    distance,
                    segment,
                    shape,
                    edge_length: de.length,
                });
            }
        }
    }

    let Some(snap) = best else {
        error!(
            "No closest edge found for stop {}, way id = {}, tile bounds = {:?}",
            stop.name,
            wayid,
            tile.bounding_box()
        );
        return 0;
    };
    debug!("Edge found for stop {}, way id = {}", stop.name, wayid);

    let stop_pbf = GraphId::from_packed(stop.graphid);
    let mut conn_count = 0;
    let mut length = 0.0;
    let mut length2 = 0.0;

    // Connection from the start node: shape runs from the node along the
    // edge to the matched point, then straight to the stop.
    if stop_pbf.tile_base() == snap.start_node.tile_base() {
        let mut shape: Vec<Coord<f64>> = snap.shape[..=snap.segment].to_vec();
        shape.push(snap.closest.into());
        shape.push(stop_coord);
        length = polyline_length(&shape).max(1.0);
        connections.push(ConnectionEdge {
            road_node: snap.start_node,
            stop_node: stop_pbf,
            length,
            shape,
        });
        conn_count += 1;
    }

    // Connection from the end node, walking the shape backwards down to the
    // matched segment. Only when both endpoints are in the same tile.
    if stop_pbf.tile_base() == snap.end_node.tile_base()
        && snap.start_node.tile() == snap.end_node.tile()
    {
        let mut shape2: Vec<Coord<f64>> =
            snap.shape[snap.segment + 1..].iter().rev().cloned().collect();
        shape2.push(snap.closest.into());
        shape2.push(stop_coord);
        length2 = polyline_length(&shape2).max(1.0);
        connections.push(ConnectionEdge {
            road_node: snap.end_node,
            stop_node: stop_pbf,
            length: length2,
            shape: shape2,
        });
        conn_count += 1;
    }

    if length != 0.0 && length2 != 0.0 && length + length2 < f64::from(snap.edge_length) - 1.0 {
        error!(
            "Edge length {} exceeds connection lengths {}, {} when connecting stop {}",
            snap.edge_length, length, length2, stop.name
        );
    }
    if conn_count == 0 {
        error!(
            "Stop {} has no connections to the road network, stop tile = {}, start node tile = {}, end node tile = {}",
            stop.name,
            stop_pbf.tile(),
            snap.start_node.tile(),
            snap.end_node.tile()
        );
    }
    conn_count
}
