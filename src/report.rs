//! Offline analysis of a finished event log.
//!
//! Distances are great-circle (haversine) on a sphere of radius 6371 km.
//! Events without coordinates never fall inside an area.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::event::EventRecord;
use crate::severity::SeverityLevel;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Radius used when an area is picked by city name.
pub const DEFAULT_CITY_RADIUS_KM: f64 = 100.0;

pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AreaQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl AreaQuery {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Result<Self> {
        crate::geo::validate_coordinates(latitude, longitude)?;
        if radius_km.is_nan() || radius_km <= 0.0 {
            return Err(anyhow!("radius must be positive, got {}", radius_km));
        }
        Ok(Self {
            latitude,
            longitude,
            radius_km,
        })
    }

    /// Strictly inside the radius.
    pub fn contains(&self, record: &EventRecord) -> bool {
        record
            .coordinates()
            .map(|pos| haversine_km((self.latitude, self.longitude), pos) < self.radius_km)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AreaReport {
    pub query: AreaQuery,
    pub count: usize,
    pub by_severity: BTreeMap<SeverityLevel, usize>,
    /// Mean of Low=1, Medium=2, High=3. `None` when no event matched.
    pub average_severity: Option<f64>,
    pub events: Vec<EventRecord>,
}

impl AreaReport {
    /// Average rendered with two decimals, or `N/A`.
    pub fn average_display(&self) -> String {
        match self.average_severity {
            Some(avg) => format!("{:.2}", avg),
            None => "N/A".to_string(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Area Analysis Report\n");
        out.push_str(&format!("Latitude: {}\n", self.query.latitude));
        out.push_str(&format!("Longitude: {}\n", self.query.longitude));
        out.push_str(&format!("Radius: {} km\n", self.query.radius_km));
        out.push_str(&format!("Number of Potholes Detected: {}\n", self.count));
        for (level, n) in &self.by_severity {
            out.push_str(&format!("  {}: {}\n", level, n));
        }
        out.push_str(&format!("Average Severity: {}\n", self.average_display()));
        out
    }
}

pub fn analyze_area(records: &[EventRecord], query: AreaQuery) -> AreaReport {
    let events: Vec<EventRecord> = records
        .iter()
        .filter(|r| query.contains(r))
        .cloned()
        .collect();
    let mut by_severity = BTreeMap::new();
    for event in &events {
        *by_severity.entry(event.severity).or_insert(0) += 1;
    }
    AreaReport {
        query,
        count: events.len(),
        by_severity,
        average_severity: average_severity(&events),
        events,
    }
}

pub fn average_severity(records: &[EventRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let total: u32 = records.iter().map(|r| r.severity.weight()).sum();
    Some(total as f64 / records.len() as f64)
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct CityFile {
    cities: Vec<City>,
}

/// Reads `{"cities": [{"name", "latitude", "longitude"}, ...]}`.
pub fn load_cities(path: &Path) -> Result<Vec<City>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read city list {}", path.display()))?;
    let file: CityFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid city list {}: {}", path.display(), e))?;
    Ok(file.cities)
}

/// Case-insensitive exact name match.
pub fn find_city<'a>(cities: &'a [City], name: &str) -> Option<&'a City> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    cities.iter().find(|c| c.name.to_lowercase() == needle)
}

/// Map markers as a GeoJSON FeatureCollection. Events without coordinates
/// are left out.
pub fn markers_geojson(records: &[EventRecord]) -> serde_json::Value {
    let features: Vec<serde_json::Value> = records
        .iter()
        .filter_map(|r| {
            let (lat, lon) = r.coordinates()?;
            Some(serde_json::json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "image_path": r.image_path,
                    "severity": r.severity,
                    "datetime_utc": r.datetime_utc,
                },
            }))
        })
        .collect();
    serde_json::json!({ "type": "FeatureCollection", "features": features })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lat: Option<f64>, lon: Option<f64>, severity: SeverityLevel) -> EventRecord {
        EventRecord {
            image_path: "pothole_coordinates/pot0.jpg".to_string(),
            latitude: lat,
            longitude: lon,
            severity,
            datetime_utc: "2024-03-01T09:30:00.000000Z".to_string(),
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Mumbai to Pune.
        let d = haversine_km((19.0760, 72.8777), (18.5204, 73.8567));
        assert!((d - 120.15).abs() < 0.1, "got {}", d);
        assert_eq!(haversine_km((10.0, 10.0), (10.0, 10.0)), 0.0);
    }

    #[test]
    fn area_report_counts_and_averages() {
        let records = vec![
            record(Some(19.0760), Some(72.8777), SeverityLevel::Low),
            record(Some(19.08), Some(72.88), SeverityLevel::High),
            record(Some(18.5204), Some(73.8567), SeverityLevel::High),
            record(None, None, SeverityLevel::Medium),
        ];
        let query = AreaQuery::new(19.0760, 72.8777, 10.0).unwrap();
        let report = analyze_area(&records, query);
        assert_eq!(report.count, 2);
        assert_eq!(report.by_severity.get(&SeverityLevel::High), Some(&1));
        assert_eq!(report.average_display(), "2.00");
        assert!(report.render_text().contains("Number of Potholes Detected: 2"));
    }

    #[test]
    fn empty_area_reports_na() {
        let query = AreaQuery::new(0.0, 0.0, 1.0).unwrap();
        let report = analyze_area(&[record(Some(45.0), Some(45.0), SeverityLevel::Low)], query);
        assert_eq!(report.count, 0);
        assert_eq!(report.average_display(), "N/A");
    }

    #[test]
    fn query_rejects_bad_input() {
        assert!(AreaQuery::new(91.0, 0.0, 1.0).is_err());
        assert!(AreaQuery::new(0.0, 0.0, 0.0).is_err());
        assert!(AreaQuery::new(0.0, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn city_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cities.json");
        std::fs::write(
            &path,
            r#"{"cities": [{"name": "Mumbai", "latitude": 19.076, "longitude": 72.8777}]}"#,
        )
        .unwrap();
        let cities = load_cities(&path).unwrap();
        assert_eq!(find_city(&cities, "  mumbai ").map(|c| c.latitude), Some(19.076));
        assert!(find_city(&cities, "pune").is_none());
    }

    #[test]
    fn markers_skip_unlocated_events() {
        let json = markers_geojson(&[
            record(Some(1.0), Some(2.0), SeverityLevel::Low),
            record(None, None, SeverityLevel::High),
        ]);
        let features = json["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["geometry"]["coordinates"][0], 2.0);
        assert_eq!(features[0]["properties"]["severity"], "Low");
    }
}
