//! Nested-JSON decoders: GeoJSON FeatureCollections and Inciweb-style
//! arrays of flat incident objects.
//!
//! Items failing geometry or required-field validation are dropped and the
//! remainder is returned. Only a payload whose top level has the wrong shape
//! is a decode error.

use crate::dataset::Dataset;
use crate::error::{FeedError, Result};
use crate::features::{features_to_dataset, normalize_key, FeatureMapping};
use crate::geojson::{Feature, FeatureCollection, Geometry};
use aqm_utils::geo::{dms_to_decimal, is_valid_lon_lat};
use log::debug;
use serde_json::{Map, Value as JsonValue};

/// Host prefixed to relative Inciweb incident paths.
pub const INCIWEB_SITE: &str = "https://inciweb.nwcg.gov";

pub const CALFIRE_MAPPING: FeatureMapping<'static> = FeatureMapping {
    id_keys: &["unique_id"],
    observed_at_key: Some("updated"),
    renames: &[
        ("acres_burned", "acres"),
        ("is_active", "active"),
        ("cal_fire_incident", "calfire_incident"),
        ("started_date_only", "started_date"),
    ],
    number_keys: &["acres", "percent_contained", "latitude", "longitude"],
    flag_keys: &["active", "final", "calfire_incident", "notification_desired"],
    time_keys: &["updated", "started", "extinguished_date"],
};

pub const INCIWEB_MAPPING: FeatureMapping<'static> = FeatureMapping {
    id_keys: &["id"],
    observed_at_key: Some("changed"),
    renames: &[
        ("incident_description", "description"),
        ("incident_overview", "overview"),
    ],
    number_keys: &["percent_of_perimeter", "size"],
    flag_keys: &["active"],
    time_keys: &["created", "changed"],
};

fn parse_json(feed: &str, input: &[u8]) -> Result<JsonValue> {
    serde_json::from_slice(input).map_err(|e| FeedError::decode(feed, format!("invalid JSON: {}", e)))
}

fn coordinate_pair(json: &JsonValue) -> Option<[f64; 2]> {
    let pair = json.as_array()?;
    let lon = pair.first()?.as_f64()?;
    let lat = pair.get(1)?.as_f64()?;
    is_valid_lon_lat(lon, lat).then_some([lon, lat])
}

/// Point and MultiPoint geometries; anything else fails validation.
fn parse_geometry(json: &JsonValue) -> Option<Geometry> {
    let coordinates = json.get("coordinates")?;
    match json.get("type")?.as_str()? {
        "Point" => coordinate_pair(coordinates).map(Geometry::Point),
        "MultiPoint" => {
            let points = coordinates
                .as_array()?
                .iter()
                .map(coordinate_pair)
                .collect::<Option<Vec<_>>>()?;
            (!points.is_empty()).then_some(Geometry::MultiPoint(points))
        }
        _ => None,
    }
}

fn parse_feature(json: &JsonValue) -> Option<Feature> {
    if json.get("type")?.as_str()? != "Feature" {
        return None;
    }
    let geometry = parse_geometry(json.get("geometry")?)?;
    let id = match json.get("id") {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let properties = json
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    Some(Feature::new(id, geometry, properties))
}

/// Parse a GeoJSON FeatureCollection, dropping features that fail
/// validation.
///
/// # Errors
///
/// `FeedError::Decode` when the payload is not JSON or not a
/// FeatureCollection.
pub fn parse_feature_collection(feed: &str, input: &[u8]) -> Result<FeatureCollection> {
    let json = parse_json(feed, input)?;
    if json.get("type").and_then(|t| t.as_str()) != Some("FeatureCollection") {
        return Err(FeedError::decode(feed, "expected a GeoJSON FeatureCollection"));
    }
    let Some(items) = json.get("features").and_then(|f| f.as_array()) else {
        return Err(FeedError::decode(feed, "FeatureCollection has no features array"));
    };
    let features: Vec<Feature> = items.iter().filter_map(parse_feature).collect();
    if features.len() < items.len() {
        debug!(
            "{}: dropped {} of {} features failing validation",
            feed,
            items.len() - features.len(),
            items.len()
        );
    }
    Ok(FeatureCollection::new(features))
}

/// Decode a GeoJSON FeatureCollection with a property mapping.
pub fn decode_geojson(feed: &str, input: &[u8], mapping: &FeatureMapping) -> Result<Dataset> {
    let fc = parse_feature_collection(feed, input)?;
    Ok(features_to_dataset(feed, &fc, mapping))
}

/// CalFire active incidents export.
pub fn decode_calfire(feed: &str, input: &[u8]) -> Result<Dataset> {
    decode_geojson(feed, input, &CALFIRE_MAPPING)
}

fn field_text(item: &Map<String, JsonValue>, key: &str) -> String {
    match item.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Convert one flat Inciweb object into a Feature. Latitude and longitude
/// arrive as degree/minute/second parts; longitudes are degrees west without
/// a sign.
fn inciweb_feature(raw: &Map<String, JsonValue>) -> Option<Feature> {
    let item: Map<String, JsonValue> = raw
        .iter()
        .map(|(k, v)| (normalize_key(k), v.clone()))
        .collect();

    let lat = dms_to_decimal(
        &field_text(&item, "lat_deg"),
        &field_text(&item, "lat_min"),
        &field_text(&item, "lat_sec"),
    )?;
    let lon = -dms_to_decimal(
        &field_text(&item, "long_deg"),
        &field_text(&item, "long_min"),
        &field_text(&item, "long_sec"),
    )?
    .abs();
    if !is_valid_lon_lat(lon, lat) {
        return None;
    }

    let mut properties = Map::new();
    for (key, value) in item {
        match key.as_str() {
            "lat_deg" | "lat_min" | "lat_sec" | "long_deg" | "long_min" | "long_sec" => {}
            "url_path" => {
                if let Some(path) = value.as_str().filter(|p| !p.is_empty()) {
                    properties.insert("url".to_string(), JsonValue::String(format!("{INCIWEB_SITE}{path}")));
                }
            }
            _ => {
                properties.insert(key, value);
            }
        }
    }
    Some(Feature::point(lon, lat, properties))
}

/// Inciweb map data: a JSON array of flat incident objects.
///
/// # Errors
///
/// `FeedError::Decode` when the payload is not a JSON array.
pub fn decode_inciweb(feed: &str, input: &[u8]) -> Result<Dataset> {
    let json = parse_json(feed, input)?;
    let Some(items) = json.as_array() else {
        return Err(FeedError::decode(feed, "expected a JSON array of incidents"));
    };
    let features: Vec<Feature> = items
        .iter()
        .filter_map(|item| item.as_object())
        .filter_map(inciweb_feature)
        .collect();
    if features.len() < items.len() {
        debug!(
            "{}: dropped {} of {} incidents without usable coordinates",
            feed,
            items.len() - features.len(),
            items.len()
        );
    }
    Ok(features_to_dataset(feed, &FeatureCollection::new(features), &INCIWEB_MAPPING))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const CALFIRE_JSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [-120.52, 37.61]},
                "properties": {
                    "UniqueId": "b6e5a0b0-1",
                    "Name": "Oak Fire",
                    "County": "Mariposa",
                    "AcresBurned": 19244,
                    "PercentContained": "",
                    "IsActive": true,
                    "Final": false,
                    "CalFireIncident": true,
                    "Updated": "2024-07-18T12:00:00Z",
                    "Url": "https://www.fire.ca.gov/incidents/2022/7/22/oak-fire/"
                }
            },
            {
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[-120.0, 37.0], [-121.0, 38.0]]},
                "properties": {"UniqueId": "line"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [null, 37.0]},
                "properties": {"UniqueId": "nullcoord"}
            },
            {
                "type": "Feature",
                "geometry": null,
                "properties": {"UniqueId": "nogeom"}
            }
        ]
    }"#;

    const INCIWEB_JSON: &str = r#"[
        {
            "id": "12345",
            "title": "Horse Creek Fire",
            "type": "Wildfire",
            "field_active": "1",
            "field_lat_deg": "45", "field_lat_min": "1", "field_lat_sec": "0",
            "field_long_deg": "110", "field_long_min": "42", "field_long_sec": "49",
            "field_percent_of_perimeter": "35",
            "size": "",
            "changed": "2024-07-18T06:00:00-06:00",
            "urlPath": "/incident-information/mtcgf-horse-creek-fire"
        },
        {
            "id": "999",
            "title": "No coordinates",
            "lat_deg": "", "long_deg": ""
        }
    ]"#;

    #[test]
    fn test_decode_calfire_keeps_valid_points_only() {
        let ds = decode_calfire("calfire", CALFIRE_JSON.as_bytes()).unwrap();
        assert_eq!(ds.len(), 1);
        let record = ds.get("b6e5a0b0-1").unwrap();
        assert_eq!(record.get("name").as_text(), Some("Oak Fire"));
        assert_eq!(record.get("acres").as_number(), Some(19244.0));
        assert_eq!(record.get("percent_contained"), &Value::Absent);
        assert_eq!(record.get("active").as_flag(), Some(true));
        assert_eq!(record.get("calfire_incident").as_flag(), Some(true));
        assert!(record.observed_at.is_some());
    }

    #[test]
    fn test_inciweb_ids_are_not_reformatted() {
        let input = r#"[
            {"id": "0042", "title": "A", "lat_deg": "45", "lat_min": "0", "lat_sec": "0",
             "long_deg": "110", "long_min": "0", "long_sec": "0"},
            {"id": "1e3", "title": "B", "lat_deg": "46", "lat_min": "0", "lat_sec": "0",
             "long_deg": "111", "long_min": "0", "long_sec": "0"}
        ]"#;
        let ds = decode_inciweb("inciweb", input.as_bytes()).unwrap();
        let ids: Vec<&str> = ds.ids().collect();
        assert_eq!(ids, vec!["0042", "1e3"]);
    }

    #[test]
    fn test_wrong_top_level_shape_is_decode_error() {
        assert!(matches!(
            decode_calfire("calfire", b"[1, 2, 3]"),
            Err(FeedError::Decode { .. })
        ));
        assert!(matches!(
            decode_inciweb("inciweb", br#"{"type": "FeatureCollection"}"#),
            Err(FeedError::Decode { .. })
        ));
        assert!(decode_inciweb("inciweb", b"not json").is_err());
    }

    #[test]
    fn test_decode_inciweb_dms_and_prefixes() {
        let ds = decode_inciweb("inciweb", INCIWEB_JSON.as_bytes()).unwrap();
        assert_eq!(ds.len(), 1);
        let record = ds.get("12345").unwrap();
        assert!((record.location.lat - 45.01667).abs() < 1e-5);
        assert!((record.location.lon + 110.71361).abs() < 1e-5);
        assert_eq!(record.get("active").as_flag(), Some(true));
        assert_eq!(record.get("percent_of_perimeter").as_number(), Some(35.0));
        assert_eq!(record.get("size"), &Value::Absent);
        assert_eq!(
            record.get("url").as_text(),
            Some("https://inciweb.nwcg.gov/incident-information/mtcgf-horse-creek-fire")
        );
        assert_eq!(record.get("lat_deg"), &Value::Absent);
        assert!(record.observed_at.is_some());
    }

    #[test]
    fn test_multipoint_geometry_is_accepted() {
        let json = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":7,"geometry":{"type":"MultiPoint","coordinates":[[-119.0,36.0],[-119.1,36.1]]},"properties":{}}
        ]}"#;
        let fc = parse_feature_collection("t", json.as_bytes()).unwrap();
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.features[0].id.as_deref(), Some("7"));
    }
}
