//! Map dataset types and the per-trail enrichment record

use crate::domain::conditions::TrailKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Newtype wrapper for map way identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WayId(pub u64);

impl fmt::Display for WayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// A named path from the external map dataset. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WayRecord {
    pub id: WayId,
    pub name: String,
    /// Map `ref` tag, usually the resort's trail number
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Node coordinates in path order
    pub nodes: Vec<LatLon>,
}

/// Great-circle distance in metres (haversine)
pub fn distance_m(from: LatLon, to: LatLon) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Arithmetic mean of the nodes; `None` for an empty path
pub fn centroid(nodes: &[LatLon]) -> Option<LatLon> {
    if nodes.is_empty() {
        return None;
    }
    let n = nodes.len() as f64;
    let (lat, lon) = nodes.iter().fold((0.0, 0.0), |(lat, lon), p| (lat + p.lat, lon + p.lon));
    Some(LatLon::new(lat / n, lon / n))
}

/// Cumulative distance across consecutive nodes; 0 for fewer than two nodes
pub fn path_length_m(nodes: &[LatLon]) -> f64 {
    nodes.windows(2).map(|w| distance_m(w[0], w[1])).sum()
}

pub fn bounds(nodes: &[LatLon]) -> Option<Bounds> {
    let first = nodes.first()?;
    let init = Bounds { min_lat: first.lat, max_lat: first.lat, min_lon: first.lon, max_lon: first.lon };
    Some(nodes.iter().fold(init, |b, p| Bounds {
        min_lat: b.min_lat.min(p.lat),
        max_lat: b.max_lat.max(p.lat),
        min_lon: b.min_lon.min(p.lon),
        max_lon: b.max_lon.max(p.lon),
    }))
}

/// Geometry and identity attached to a trail after matching.
///
/// An unmatched trail is a valid record: no way id, confidence 0, no geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailEnrichment {
    pub trail_key: TrailKey,
    /// Stable identifier exposed to consumers
    pub entity_id: String,
    pub way_id: Option<WayId>,
    pub confidence: f64,
    pub centroid: Option<LatLon>,
    pub coordinates: Option<Vec<LatLon>>,
    pub path_length_m: Option<f64>,
    pub bounds: Option<Bounds>,
}

impl TrailEnrichment {
    pub fn unmatched(trail_key: TrailKey) -> Self {
        Self {
            trail_key,
            entity_id: String::new(),
            way_id: None,
            confidence: 0.0,
            centroid: None,
            coordinates: None,
            path_length_m: None,
            bounds: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.way_id.is_some()
    }

    /// GeoJSON LineString of the path (lon/lat order)
    pub fn geojson(&self) -> Option<serde_json::Value> {
        let coords = self.coordinates.as_ref()?;
        let line: Vec<[f64; 2]> = coords.iter().map(|p| [p.lon, p.lat]).collect();
        Some(serde_json::json!({ "type": "LineString", "coordinates": line }))
    }

    pub fn osm_url(&self) -> Option<String> {
        self.way_id.map(|id| format!("https://www.openstreetmap.org/way/{}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_m(LatLon::new(0.0, 0.0), LatLon::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn test_centroid_and_length() {
        let nodes = vec![LatLon::new(45.0, -72.0), LatLon::new(45.002, -72.0), LatLon::new(45.004, -72.0)];
        let c = centroid(&nodes).unwrap();
        assert!((c.lat - 45.002).abs() < 1e-9);
        assert!((c.lon + 72.0).abs() < 1e-9);
        let len = path_length_m(&nodes);
        assert!((len - 444.8).abs() < 1.0, "got {len}");
    }

    #[test]
    fn test_degenerate_paths() {
        assert_eq!(centroid(&[]), None);
        assert_eq!(path_length_m(&[]), 0.0);
        let single = [LatLon::new(45.3, -72.6)];
        assert_eq!(centroid(&single), Some(single[0]));
        assert_eq!(path_length_m(&single), 0.0);
        assert!(bounds(&[]).is_none());
    }

    #[test]
    fn test_geojson_uses_lon_lat_order() {
        let mut e = TrailEnrichment::unmatched(TrailKey::new("x", None));
        e.way_id = Some(WayId(7));
        e.coordinates = Some(vec![LatLon::new(45.0, -72.0)]);
        let geo = e.geojson().unwrap();
        assert_eq!(geo["type"], "LineString");
        assert_eq!(geo["coordinates"][0][0], -72.0);
        assert_eq!(e.osm_url().unwrap(), "https://www.openstreetmap.org/way/7");
    }
}
