use std::path::{Path, PathBuf};

use prost::Message;

use crate::ids::{self, GraphId};

/// Errors from reading a transit tile. The build driver treats both variants
/// as fatal to the tile being processed and moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransitReadError {
    #[error("transit tile not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed transit tile {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: prost::DecodeError,
    },
}

/// One transit tile: the stops inside the tile's bounds, the routes serving
/// them and every scheduled stop pair departing from them.
#[derive(Clone, PartialEq, Message)]
pub struct TransitTile {
    #[prost(message, repeated, tag = "1")]
    pub stops: Vec<Stop>,
    #[prost(message, repeated, tag = "2")]
    pub routes: Vec<Route>,
    #[prost(message, repeated, tag = "3")]
    pub stop_pairs: Vec<StopPair>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Stop {
    /// Packed identifier in transit space (node index = position in `stops`).
    #[prost(uint64, tag = "1")]
    pub graphid: u64,
    #[prost(string, tag = "2")]
    pub one_stop_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(double, tag = "4")]
    pub lon: f64,
    #[prost(double, tag = "5")]
    pub lat: f64,
    /// Way the stop is posted along; connection edges snap to it.
    #[prost(uint64, tag = "6")]
    pub osm_way_id: u64,
    #[prost(string, tag = "7")]
    pub timezone: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Route {
    #[prost(string, tag = "1")]
    pub one_stop_id: String,
    #[prost(string, tag = "2")]
    pub operated_by_onestop_id: String,
    #[prost(string, tag = "3")]
    pub operated_by_name: String,
    #[prost(string, tag = "4")]
    pub operated_by_website: String,
    #[prost(uint32, tag = "5")]
    pub route_color: u32,
    #[prost(uint32, tag = "6")]
    pub route_text_color: u32,
    #[prost(string, tag = "7")]
    pub name: String,
    #[prost(string, tag = "8")]
    pub route_long_name: String,
    #[prost(string, tag = "9")]
    pub route_desc: String,
    #[prost(uint32, tag = "10")]
    pub vehicle_type: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct StopPair {
    #[prost(uint64, tag = "1")]
    pub origin_graphid: u64,
    #[prost(uint64, tag = "2")]
    pub destination_graphid: u64,
    #[prost(uint32, tag = "3")]
    pub route_index: u32,
    #[prost(uint32, tag = "4")]
    pub trip_key: u32,
    #[prost(uint32, tag = "5")]
    pub block_id: u32,
    /// Seconds past midnight.
    #[prost(uint32, tag = "6")]
    pub origin_departure_time: u32,
    #[prost(uint32, tag = "7")]
    pub destination_arrival_time: u32,
    /// Julian day numbers.
    #[prost(uint32, tag = "8")]
    pub service_start_date: u32,
    #[prost(uint32, tag = "9")]
    pub service_end_date: u32,
    /// Seven entries, Monday first.
    #[prost(bool, repeated, tag = "10")]
    pub service_days_of_week: Vec<bool>,
    #[prost(uint32, repeated, tag = "11")]
    pub service_added_dates: Vec<u32>,
    #[prost(uint32, repeated, tag = "12")]
    pub service_except_dates: Vec<u32>,
    #[prost(string, tag = "13")]
    pub trip_headsign: String,
    #[prost(bool, tag = "14")]
    pub bikes_allowed: bool,
    #[prost(bool, tag = "15")]
    pub wheelchair_accessible: bool,
}

/// Loads and decodes the transit tile for `id`. The whole file is slurped
/// before decoding, so message size is bounded only by memory.
pub fn read_transit(transit_dir: &Path, id: GraphId) -> Result<TransitTile, TransitReadError> {
    let path = ids::transit_tile_path(transit_dir, id.tile_base());
    if !path.exists() {
        return Err(TransitReadError::NotFound(path));
    }
    let buffer = std::fs::read(&path).map_err(|source| TransitReadError::Io {
        path: path.clone(),
        source,
    })?;
    TransitTile::decode(buffer.as_slice())
        .map_err(|source| TransitReadError::Malformed { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_round_trip() {
        let dir = std::env::temp_dir().join("transit_graft_format_test");
        let id = GraphId::new(2, 47_701, 0);
        let path = ids::transit_tile_path(&dir, id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        let tile = TransitTile {
            stops: vec![Stop {
                graphid: GraphId::new(2, 47_701, 0).packed(),
                one_stop_id: "s-abc-stop".to_string(),
                name: "Main & 1st".to_string(),
                lon: -73.99,
                lat: 40.75,
                osm_way_id: 42,
                timezone: "America/New_York".to_string(),
            }],
            routes: vec![],
            stop_pairs: vec![],
        };
        std::fs::write(&path, tile.encode_to_vec()).unwrap();

        let decoded = read_transit(&dir, id).unwrap();
        assert_eq!(decoded, tile);
        assert_eq!(decoded.stops[0].osm_way_id, 42);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = std::env::temp_dir().join("transit_graft_format_missing");
        let err = read_transit(&dir, GraphId::new(2, 1, 0)).unwrap_err();
        assert!(matches!(err, TransitReadError::NotFound(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = std::env::temp_dir().join("transit_graft_format_garbage");
        let id = GraphId::new(2, 2, 0);
        let path = ids::transit_tile_path(&dir, id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        // A lone 0xff byte is a truncated varint key.
        std::fs::write(&path, [0xffu8]).unwrap();

        let err = read_transit(&dir, id).unwrap_err();
        assert!(matches!(err, TransitReadError::Malformed { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
