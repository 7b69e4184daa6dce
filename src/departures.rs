use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use log::{error, info, warn};

use crate::graph_tile::{GraphTileBuilder, TransitDepartureRecord, TransitRouteRecord, Use};
use crate::ids::GraphId;
use crate::service_days;
use crate::transit_format::TransitTile;

/// One scheduled departure, in transit-space identifiers until the merge.
#[derive(Clone, Debug)]
pub struct Departure {
    pub days: u64,
    pub orig: GraphId,
    pub dest: GraphId,
    pub trip: u32,
    pub route: u32,
    pub block_id: u32,
    pub shape_id: u32,
    pub dep_time: u32,
    pub arr_time: u32,
    pub end_day: u32,
    pub dow: u8,
    pub wheelchair_accessible: bool,
    pub headsign: String,
}

/// A unique (route, destination) pair departing from one origin stop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitLine {
    pub line_id: u32,
    pub route_index: u32,
    pub dest: GraphId,
    pub shape_id: u32,
}

/// Edges to be added for one origin stop during the merge.
#[derive(Clone, Debug)]
pub struct StopEdges {
    pub origin: GraphId,
    /// Intra-station connections, reserved until stop hierarchy is ingested.
    pub intrastation: Vec<GraphId>,
    pub lines: Vec<TransitLine>,
}

/// Walks the scheduled stop pairs of a transit tile and groups the surviving
/// departures by origin stop. Departures whose active-days bitmask comes out
/// empty for the tile's reference date are dropped; the count of drops is
/// returned alongside.
pub fn process_stop_pairs(
    transit: &TransitTile,
    tile_date: NaiveDate,
    stop_access: &mut HashMap<GraphId, bool>,
    tile_id: GraphId,
) -> (BTreeMap<GraphId, Vec<Departure>>, u64) {
    let mut departures: BTreeMap<GraphId, Vec<Departure>> = BTreeMap::new();
    let mut rejected = 0u64;

    if transit.stop_pairs.is_empty() {
        if !transit.stops.is_empty() {
            error!(
                "Tile {} has 0 schedule stop pairs but has {} stops",
                tile_id.tile(),
                transit.stops.len()
            );
        }
        return (departures, rejected);
    }

    for sp in &transit.stop_pairs {
        // The destination may live in a tile with no road presence; that is
        // resolved at merge time, not here.
        let (Some(start), Some(end)) = (
            service_days::from_julian_day(sp.service_start_date),
            service_days::from_julian_day(sp.service_end_date),
        ) else {
            warn!(
                "Rejected stop pair with unreadable service dates {}..{}",
                sp.service_start_date, sp.service_end_date
            );
            rejected += 1;
            continue;
        };

        let mut dow_mask = 0u8;
        for (x, &active) in sp.service_days_of_week.iter().take(7).enumerate() {
            if active {
                dow_mask |= 1 << x;
            }
        }

        let mut days = service_days::service_days(start, end, tile_date, dow_mask);
        for &except in &sp.service_except_dates {
            if let Some(date) = service_days::from_julian_day(except) {
                days = service_days::remove_day(days, start, end, tile_date, date);
            }
        }
        for &added in &sp.service_added_dates {
            if let Some(date) = service_days::from_julian_day(added) {
                days = service_days::add_day(days, start, end, tile_date, date);
            }
        }

        if days == 0 {
            warn!("Rejected stop pair: no active service days on or after {}", tile_date);
            rejected += 1;
            continue;
        }

        let dep = Departure {
            days,
            orig: GraphId::from_packed(sp.origin_graphid),
            dest: GraphId::from_packed(sp.destination_graphid),
            trip: sp.trip_key,
            route: sp.route_index,
            block_id: sp.block_id,
            shape_id: 0,
            dep_time: sp.origin_departure_time,
            arr_time: sp.destination_arrival_time,
            end_day: service_days::end_day_offset(start, end),
            dow: dow_mask,
            wheelchair_accessible: sp.wheelchair_accessible,
            headsign: sp.trip_headsign.clone(),
        };

        // Last write wins when records disagree within the tile.
        stop_access.insert(dep.orig, sp.bikes_allowed);
        stop_access.insert(dep.dest, sp.bikes_allowed);

        departures.entry(dep.orig).or_default().push(dep);
    }

    let total: usize = departures.values().map(Vec::len).sum();
    info!("Tile {}: added {} departures", tile_id.tile(), total);
    (departures, rejected)
}

/// Collapses each origin stop's departures into unique (route, destination)
/// transit lines with dense tile-local line ids starting at 1, writing one
/// departure record per scheduled departure into the builder. Every stop gets
/// an entry, even with no departures, so the merge adds a node for it.
pub fn build_stop_edges(
    transit: &TransitTile,
    departures: &BTreeMap<GraphId, Vec<Departure>>,
    builder: &mut GraphTileBuilder,
) -> BTreeMap<GraphId, StopEdges> {
    let mut stop_edge_map = BTreeMap::new();
    let mut unique_lineid = 1u32;

    for stop in &transit.stops {
        let stop_pbf = GraphId::from_packed(stop.graphid);
        let mut stopedges = StopEdges {
            origin: stop_pbf,
            intrastation: Vec::new(),
            lines: Vec::new(),
        };

        let mut unique_transit_edges: HashMap<(u32, GraphId), u32> = HashMap::new();
        for dep in departures.get(&stop_pbf).map(Vec::as_slice).unwrap_or_default() {
            let lineid = match unique_transit_edges.get(&(dep.route, dep.dest)) {
                Some(&lineid) => lineid,
                None => {
                    let lineid = unique_lineid;
                    unique_transit_edges.insert((dep.route, dep.dest), lineid);
                    unique_lineid += 1;
                    stopedges.lines.push(TransitLine {
                        line_id: lineid,
                        route_index: dep.route,
                        dest: dep.dest,
                        shape_id: dep.shape_id,
                    });
                    lineid
                }
            };

            let headsign_offset = builder.add_name(&dep.headsign);
            builder.add_transit_departure(TransitDepartureRecord {
                line_id: lineid,
                trip: dep.trip,
                route_index: dep.route,
                block_id: dep.block_id,
                headsign_offset,
                departure_time: dep.dep_time,
                elapsed_time: dep.arr_time.saturating_sub(dep.dep_time),
                end_day: dep.end_day,
                dow: dep.dow,
                days: dep.days,
            });
        }

        stop_edge_map.insert(stop_pbf, stopedges);
    }

    stop_edge_map
}

/// Registers every route of the tile in positional order and returns the map
/// from route index to vehicle type used for edge classification.
pub fn add_routes(transit: &TransitTile, builder: &mut GraphTileBuilder) -> HashMap<u32, u32> {
    let mut route_types = HashMap::new();

    for (i, r) in transit.routes.iter().enumerate() {
        let route = TransitRouteRecord {
            route_index: i as u32,
            one_stop_offset: builder.add_name(&r.one_stop_id),
            operated_by_onestop_offset: builder.add_name(&r.operated_by_onestop_id),
            operated_by_name_offset: builder.add_name(&r.operated_by_name),
            operated_by_website_offset: builder.add_name(&r.operated_by_website),
            color: r.route_color,
            text_color: r.route_text_color,
            name_offset: builder.add_name(&r.name),
            long_name_offset: builder.add_name(&r.route_long_name),
            desc_offset: builder.add_name(&r.route_desc),
        };
        builder.add_transit_route(route);
        route_types.insert(i as u32, r.vehicle_type);
    }

    info!(
        "Tile {}: added {} routes",
        builder.header().graph_id.tile(),
        route_types.len()
    );
    route_types
}

/// Edge use for a transit route's vehicle type.
pub fn transit_use(vehicle_type: u32) -> Use {
    match vehicle_type {
        3 => Use::Bus,
        // 4 is ferry; it rides on the rail use until the router costs
        // ferries separately.
        // TODO: introduce a ferry use together with the router's costing.
        _ => Use::Rail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    use crate::transit_format::{Stop, StopPair};

    fn jdn(y: i32, m: u32, d: u32) -> u32 {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        (i64::from(date.num_days_from_ce()) + 1_721_425) as u32
    }

    fn stop(tile: u32, node: u32, way: u64) -> Stop {
        Stop {
            graphid: GraphId::new(2, tile, node).packed(),
            one_stop_id: format!("s-{}-{}", tile, node),
            name: format!("Stop {}", node),
            lon: -73.99,
            lat: 40.75,
            osm_way_id: way,
            timezone: "America/New_York".to_string(),
        }
    }

    fn weekday_pair(dep_time: u32, arr_time: u32) -> StopPair {
        StopPair {
            origin_graphid: GraphId::new(2, 100, 0).packed(),
            destination_graphid: GraphId::new(2, 200, 4).packed(),
            route_index: 0,
            trip_key: 11,
            block_id: 3,
            origin_departure_time: dep_time,
            destination_arrival_time: arr_time,
            service_start_date: jdn(2020, 1, 1),
            service_end_date: jdn(2020, 12, 31),
            service_days_of_week: vec![true, true, true, true, true, false, false],
            service_added_dates: vec![],
            service_except_dates: vec![],
            trip_headsign: "Downtown".to_string(),
            bikes_allowed: false,
            wheelchair_accessible: true,
        }
    }

    fn tile_with_pairs(pairs: Vec<StopPair>) -> TransitTile {
        TransitTile {
            stops: vec![stop(100, 0, 42)],
            routes: vec![],
            stop_pairs: pairs,
        }
    }

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    fn builder() -> GraphTileBuilder {
        GraphTileBuilder::new(GraphId::new(2, 100, 0), reference())
    }

    #[test]
    fn departure_fields_carried_through() {
        let transit = tile_with_pairs(vec![weekday_pair(36_000, 36_600)]);
        let mut access = HashMap::new();
        let (departures, rejected) =
            process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));

        assert_eq!(rejected, 0);
        let deps = &departures[&GraphId::new(2, 100, 0)];
        assert_eq!(deps.len(), 1);
        let dep = &deps[0];
        assert_eq!(dep.trip, 11);
        assert_eq!(dep.block_id, 3);
        assert_eq!(dep.dep_time, 36_000);
        assert_eq!(dep.arr_time, 36_600);
        assert_eq!(dep.end_day, 365);
        assert_eq!(
            dep.dow,
            service_days::MONDAY
                | service_days::TUESDAY
                | service_days::WEDNESDAY
                | service_days::THURSDAY
                | service_days::FRIDAY
        );
        assert!(dep.wheelchair_accessible);
        assert_eq!(dep.headsign, "Downtown");
        assert!(dep.days != 0);
    }

    #[test]
    fn empty_service_window_rejects() {
        let mut pair = weekday_pair(36_000, 36_600);
        // Saturday-only service on a single weekday date.
        pair.service_days_of_week = vec![false, false, false, false, false, true, false];
        pair.service_start_date = jdn(2020, 1, 1); // Wednesday
        pair.service_end_date = jdn(2020, 1, 1);
        let transit = tile_with_pairs(vec![pair]);

        let mut access = HashMap::new();
        let (departures, rejected) =
            process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));
        assert!(departures.is_empty());
        assert_eq!(rejected, 1);
        assert!(access.is_empty());
    }

    #[test]
    fn except_date_can_empty_the_mask() {
        let mut pair = weekday_pair(36_000, 36_600);
        pair.service_days_of_week = vec![true; 7];
        pair.service_start_date = jdn(2020, 6, 4);
        pair.service_end_date = jdn(2020, 6, 4);
        pair.service_except_dates = vec![jdn(2020, 6, 4)];
        let transit = tile_with_pairs(vec![pair]);

        let mut access = HashMap::new();
        let (departures, rejected) = process_stop_pairs(
            &transit,
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            &mut access,
            GraphId::new(2, 100, 0),
        );
        assert!(departures.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn access_hint_last_write_wins() {
        let mut first = weekday_pair(36_000, 36_600);
        first.bikes_allowed = true;
        let second = weekday_pair(37_800, 38_400); // bikes_allowed = false
        let transit = tile_with_pairs(vec![first, second]);

        let mut access = HashMap::new();
        process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));
        assert_eq!(access[&GraphId::new(2, 100, 0)], false);
        assert_eq!(access[&GraphId::new(2, 200, 4)], false);
    }

    #[test]
    fn two_pairs_collapse_to_one_line() {
        let transit = tile_with_pairs(vec![
            weekday_pair(36_000, 36_600),
            weekday_pair(37_800, 38_400),
        ]);
        let mut access = HashMap::new();
        let (departures, _) =
            process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));

        let mut b = builder();
        let stop_edge_map = build_stop_edges(&transit, &departures, &mut b);

        let edges = &stop_edge_map[&GraphId::new(2, 100, 0)];
        assert_eq!(edges.lines.len(), 1);
        assert_eq!(edges.lines[0].line_id, 1);
        assert_eq!(edges.lines[0].dest, GraphId::new(2, 200, 4));
        assert_eq!(edges.lines[0].shape_id, 0);
        assert!(edges.intrastation.is_empty());

        let records = b.departures();
        assert_eq!(records.len(), 2);
        for rec in records {
            assert_eq!(rec.line_id, 1);
            assert_eq!(rec.elapsed_time, 600);
        }
        assert_eq!(records[0].departure_time, 36_000);
        assert_eq!(records[1].departure_time, 37_800);
    }

    #[test]
    fn distinct_destinations_get_dense_line_ids() {
        let mut to_other = weekday_pair(40_000, 40_500);
        to_other.destination_graphid = GraphId::new(2, 200, 9).packed();
        let transit = tile_with_pairs(vec![weekday_pair(36_000, 36_600), to_other]);

        let mut access = HashMap::new();
        let (departures, _) =
            process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));

        let mut b = builder();
        let first = build_stop_edges(&transit, &departures, &mut b);
        let lines: Vec<u32> = first[&GraphId::new(2, 100, 0)]
            .lines
            .iter()
            .map(|l| l.line_id)
            .collect();
        assert_eq!(lines, vec![1, 2]);

        // Rerunning over the same departures yields the same assignments.
        let mut b2 = builder();
        let second = build_stop_edges(&transit, &departures, &mut b2);
        assert_eq!(
            first[&GraphId::new(2, 100, 0)].lines,
            second[&GraphId::new(2, 100, 0)].lines
        );
    }

    #[test]
    fn stops_without_departures_still_get_entries() {
        let transit = TransitTile {
            stops: vec![stop(100, 0, 42), stop(100, 1, 43)],
            routes: vec![],
            stop_pairs: vec![weekday_pair(36_000, 36_600)],
        };
        let mut access = HashMap::new();
        let (departures, _) =
            process_stop_pairs(&transit, reference(), &mut access, GraphId::new(2, 100, 0));

        let mut b = builder();
        let stop_edge_map = build_stop_edges(&transit, &departures, &mut b);
        assert_eq!(stop_edge_map.len(), 2);
        assert!(stop_edge_map[&GraphId::new(2, 100, 1)].lines.is_empty());
    }

    #[test]
    fn routes_register_in_positional_order() {
        use crate::transit_format::Route;
        let transit = TransitTile {
            stops: vec![],
            routes: vec![
                Route {
                    one_stop_id: "r-one".to_string(),
                    operated_by_onestop_id: "o-one".to_string(),
                    operated_by_name: "Operator".to_string(),
                    operated_by_website: "https://example.com".to_string(),
                    route_color: 0xff0000,
                    route_text_color: 0xffffff,
                    name: "1".to_string(),
                    route_long_name: "First Avenue Local".to_string(),
                    route_desc: String::new(),
                    vehicle_type: 3,
                },
                Route {
                    one_stop_id: "r-two".to_string(),
                    operated_by_onestop_id: "o-one".to_string(),
                    operated_by_name: "Operator".to_string(),
                    operated_by_website: "https://example.com".to_string(),
                    route_color: 0,
                    route_text_color: 0,
                    name: "2".to_string(),
                    route_long_name: "Crosstown".to_string(),
                    route_desc: String::new(),
                    vehicle_type: 1,
                },
            ],
            stop_pairs: vec![],
        };

        let mut b = builder();
        let route_types = add_routes(&transit, &mut b);
        assert_eq!(route_types[&0], 3);
        assert_eq!(route_types[&1], 1);

        let tile = b.into_tile();
        assert_eq!(tile.routes.len(), 2);
        assert_eq!(tile.name(tile.routes[0].name_offset), "1");
        assert_eq!(tile.routes[0].color, 0xff0000);
        // Shared operator strings are interned once.
        assert_eq!(
            tile.routes[0].operated_by_name_offset,
            tile.routes[1].operated_by_name_offset
        );
    }

    #[test]
    fn vehicle_type_mapping() {
        assert_eq!(transit_use(0), Use::Rail); // tram
        assert_eq!(transit_use(1), Use::Rail); // subway
        assert_eq!(transit_use(2), Use::Rail); // rail
        assert_eq!(transit_use(3), Use::Bus);
        assert_eq!(transit_use(4), Use::Rail); // ferry, see transit_use
        assert_eq!(transit_use(5), Use::Rail); // cable car
        assert_eq!(transit_use(6), Use::Rail); // gondola
        assert_eq!(transit_use(7), Use::Rail); // funicular
    }
}
