use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;

use geo::{Distance, Haversine, Point};
use geo_types::Coord;
use log::{debug, error, info};

use crate::connections::ConnectionEdge;
use crate::departures::{self, StopEdges};
use crate::graph_tile::{
    DirectedEdge, GraphTileBuilder, NodeInfo, NodeType, RoadClass, Use, PEDESTRIAN_ACCESS,
};
use crate::ids::{self, GraphId};
use crate::transit_format::{self, TransitTile};

/// Walking speed assigned to connection and transit edges.
const CONNECTOR_SPEED: u8 = 5;

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub added_edges: u32,
    pub added_nodes: u32,
}

/// Straight line between the stops until a shape source is wired in; the
/// shape id is carried for that day.
fn transit_line_shape(stop_ll: Coord<f64>, end_ll: Coord<f64>, _shape_id: u32) -> Vec<Coord<f64>> {
    vec![stop_ll, end_ll]
}

fn connection_edge(
    end_node: GraphId,
    length: f64,
    local_edge_index: u32,
    edge_info_offset: u32,
    forward: bool,
) -> DirectedEdge {
    DirectedEdge {
        end_node,
        length: length as f32,
        edge_use: Use::TransitConnection,
        speed: CONNECTOR_SPEED,
        classification: RoadClass::ServiceOther,
        local_edge_index,
        forward_access: PEDESTRIAN_ACCESS,
        reverse_access: PEDESTRIAN_ACCESS,
        line_id: 0,
        edge_info_offset,
        forward,
        exit_sign: false,
        access_restriction: false,
    }
}

/// Splices the prepared transit data into the tile, in place.
///
/// Pass 1 rebuilds the pre-existing nodes in order, re-appending each node's
/// directed edges and inserting the connection edges bound for that node at
/// its tail. Sign and access-restriction entries keep referring to the same
/// concrete edge: their stored index shifts by exactly the number of
/// connection edges inserted at earlier nodes.
///
/// Pass 2 appends one node per transit stop, in sorted stop-id order, with
/// its reverse connection edges first and its transit-line edges second.
pub fn add_to_graph(
    builder: &mut GraphTileBuilder,
    transit_dir: &Path,
    transit: &TransitTile,
    tile_node_counts: &BTreeMap<GraphId, usize>,
    stop_edge_map: &BTreeMap<GraphId, StopEdges>,
    _stop_access: &HashMap<GraphId, bool>,
    connection_edges: &[ConnectionEdge],
    route_types: &HashMap<u32, u32>,
) -> MergeOutcome {
    let started = Instant::now();
    let tile_id = builder.header().graph_id.tile_base();

    // Take the existing buffers out of the builder and rebuild them.
    let current_nodes = builder.take_nodes();
    let node_count = current_nodes.len();
    let current_edges = builder.take_directed_edges();
    let edge_count = current_edges.len();

    // Cursors into the sign and access-restriction tables, both ordered by
    // edge index. A sentinel past the end when the table is empty.
    let sign_count = builder.signs().len();
    let mut sign_idx = 0usize;
    let mut next_sign_edge = builder
        .signs()
        .first()
        .map(|s| s.edge_index)
        .unwrap_or(edge_count as u32 + 1);
    let restriction_count = builder.access_restrictions().len();
    let mut restriction_idx = 0usize;
    let mut next_restriction_edge = builder
        .access_restrictions()
        .first()
        .map(|r| r.edge_index)
        .unwrap_or(edge_count as u32 + 1);

    // Pass 1: pre-existing nodes keep their order at the front.
    let mut conn_cursor = 0usize;
    let mut added_connections = 0usize;
    for (nodeid, mut nb) in current_nodes.into_iter().enumerate() {
        let new_edge_index = builder.directed_edges().len();

        for i in 0..nb.edge_count {
            let idx = nb.edge_index + i;
            let edge = current_edges[idx as usize].clone();

            while sign_idx < sign_count && idx == next_sign_edge {
                if !edge.exit_sign {
                    error!(
                        "Tile {}: sign references edge {} but the edge carries no sign",
                        tile_id.tile(),
                        idx
                    );
                }
                builder.signs_mut()[sign_idx].edge_index = idx + added_connections as u32;
                sign_idx += 1;
                next_sign_edge = builder
                    .signs()
                    .get(sign_idx)
                    .map(|s| s.edge_index)
                    .unwrap_or(0);
            }

            while restriction_idx < restriction_count && idx == next_restriction_edge {
                if !edge.access_restriction {
                    error!(
                        "Tile {}: access restriction references edge {} but the edge carries none",
                        tile_id.tile(),
                        idx
                    );
                }
                builder.access_restrictions_mut()[restriction_idx].edge_index =
                    idx + added_connections as u32;
                restriction_idx += 1;
                next_restriction_edge = builder
                    .access_restrictions()
                    .get(restriction_idx)
                    .map(|r| r.edge_index)
                    .unwrap_or(0);
            }

            builder.push_directed_edge(edge);
        }

        // Insert connections from this road node to its stops.
        while let Some(conn) = connection_edges.get(conn_cursor) {
            if conn.road_node.node() != nodeid as u32 {
                break;
            }
            conn_cursor += 1;

            let end_node = ids::to_graph_id(conn.stop_node, tile_node_counts);
            if !end_node.is_valid() {
                error!(
                    "Tile {}: stop {} has no road tile, dropping its connection",
                    tile_id.tile(),
                    conn.stop_node
                );
                continue;
            }

            let local_edge_index = (builder.directed_edges().len() - new_edge_index) as u32;
            let (edge_info_offset, forward) =
                builder.add_edge_info(0, conn.road_node, end_node, &conn.shape);
            builder.push_directed_edge(connection_edge(
                end_node,
                conn.length,
                local_edge_index,
                edge_info_offset,
                forward,
            ));
            debug!(
                "Add connection from road node to stop: edge info offset = {}",
                edge_info_offset
            );
            added_connections += 1;
        }

        nb.edge_index = new_edge_index as u32;
        nb.edge_count = (builder.directed_edges().len() - new_edge_index) as u32;
        builder.push_node(nb);
    }

    if added_connections != connection_edges.len() {
        error!(
            "Tile {}: connection count mismatch in pass 1: added {} but there are {}",
            tile_id.tile(),
            added_connections,
            connection_edges.len()
        );
    }

    // Pass 2: one new node per stop, in sorted stop-id order.
    let mut reverse_connections = 0usize;
    for (key, stop_edges) in stop_edge_map {
        let stopid = stop_edges.origin;
        debug_assert_eq!(*key, stopid);
        // Intra-station connections stay empty until stop hierarchy arrives.
        debug_assert!(stop_edges.intrastation.is_empty());
        let stop_index = stopid.node();
        let Some(stop) = transit.stops.get(stop_index as usize) else {
            error!(
                "Tile {}: stop index {} out of range",
                tile_id.tile(),
                stop_index
            );
            continue;
        };
        if GraphId::from_packed(stop.graphid) != stopid {
            error!(
                "Tile {}: stop key mismatch at index {}",
                tile_id.tile(),
                stop_index
            );
        }

        let origin_node = ids::to_graph_id(stopid, tile_node_counts);
        let stop_ll = Coord {
            x: stop.lon,
            y: stop.lat,
        };

        // Bicycle hints stay out of the access mask until connector costing
        // understands them; see the access-hint map fed from the departures.
        let mut node = NodeInfo::new(
            stop_ll,
            RoadClass::ServiceOther,
            PEDESTRIAN_ACCESS,
            NodeType::MultiUseTransitStop,
        );
        node.mode_change = true;
        node.stop_index = stop_index;
        node.timezone = builder.add_name(&stop.timezone);
        node.edge_index = builder.directed_edges().len() as u32;

        // Reverse connections back to the road network. Linear scan; both
        // vectors are small per tile.
        for conn in connection_edges.iter().filter(|c| c.stop_node == stopid) {
            let local_edge_index = builder.directed_edges().len() as u32 - node.edge_index;
            let (edge_info_offset, forward) =
                builder.add_edge_info(0, origin_node, conn.road_node, &conn.shape);
            builder.push_directed_edge(connection_edge(
                conn.road_node,
                conn.length,
                local_edge_index,
                edge_info_offset,
                forward,
            ));
            debug!(
                "Add connection from stop to road node: edge info offset = {}",
                edge_info_offset
            );
            reverse_connections += 1;
        }

        // Transit-line edges to each unique (route, destination).
        for line in &stop_edges.lines {
            let end_node = ids::to_graph_id(line.dest, tile_node_counts);
            if !end_node.is_valid() {
                continue;
            }

            let end_ll = if line.dest.tile_base() == tile_id {
                match transit.stops.get(line.dest.node() as usize) {
                    Some(endstop) => Coord {
                        x: endstop.lon,
                        y: endstop.lat,
                    },
                    None => {
                        error!(
                            "Tile {}: destination stop index {} out of range",
                            tile_id.tile(),
                            line.dest.node()
                        );
                        continue;
                    }
                }
            } else {
                // The destination lives in a neighboring transit tile.
                match transit_format::read_transit(transit_dir, line.dest.tile_base()) {
                    Ok(neighbor) => match neighbor.stops.get(line.dest.node() as usize) {
                        Some(endstop) => Coord {
                            x: endstop.lon,
                            y: endstop.lat,
                        },
                        None => {
                            error!(
                                "Tile {}: destination stop {} missing from neighbor tile",
                                tile_id.tile(),
                                line.dest
                            );
                            continue;
                        }
                    },
                    Err(e) => {
                        error!("Tile {}: {}", tile_id.tile(), e);
                        continue;
                    }
                }
            };

            let Some(&vehicle_type) = route_types.get(&line.route_index) else {
                error!(
                    "Tile {}: line {} references unregistered route {}",
                    tile_id.tile(),
                    line.line_id,
                    line.route_index
                );
                continue;
            };

            let length = Haversine.distance(Point::from(stop_ll), Point::from(end_ll));
            let local_edge_index = builder.directed_edges().len() as u32 - node.edge_index;
            let shape = transit_line_shape(stop_ll, end_ll, line.shape_id);
            let (edge_info_offset, forward) =
                builder.add_edge_info(u64::from(line.route_index), origin_node, end_node, &shape);
            builder.push_directed_edge(DirectedEdge {
                end_node,
                length: length as f32,
                edge_use: departures::transit_use(vehicle_type),
                speed: CONNECTOR_SPEED,
                classification: RoadClass::ServiceOther,
                local_edge_index,
                forward_access: PEDESTRIAN_ACCESS,
                reverse_access: PEDESTRIAN_ACCESS,
                line_id: line.line_id,
                edge_info_offset,
                forward,
                exit_sign: false,
                access_restriction: false,
            });
            debug!(
                "Add transit edge: line id = {} route = {}",
                line.line_id, line.route_index
            );
        }

        let stop_edge_count = builder.directed_edges().len() as u32 - node.edge_index;
        if stop_edge_count == 0 {
            error!(
                "Tile {}: stop {} has no outbound edges",
                tile_id.tile(),
                stop.name
            );
        }
        node.edge_count = stop_edge_count;
        builder.push_node(node);
    }

    if reverse_connections != connection_edges.len() {
        error!(
            "Tile {}: added {} reverse connections but there are {} connections",
            tile_id.tile(),
            reverse_connections,
            connection_edges.len()
        );
    }

    let outcome = MergeOutcome {
        added_edges: (builder.directed_edges().len() - edge_count) as u32,
        added_nodes: (builder.nodes().len() - node_count) as u32,
    };
    info!(
        "Tile {}: added {} edges and {} nodes, time = {:?}",
        tile_id.tile(),
        outcome.added_edges,
        outcome.added_nodes,
        started.elapsed()
    );
    outcome
}
