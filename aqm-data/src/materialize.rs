//! Projection of datasets into map-ready GeoJSON.
//!
//! Each source family has a [`Profile`]: a fixed mapping from normalized
//! attributes to output property names, the properties that must be finite
//! numbers, and the display fields derived at materialization time.

use aqm_feeds::geojson::{Feature, FeatureCollection};
use aqm_feeds::{Dataset, SourceRecord, Value};
use aqm_utils::dates::{format_ago, hours_between};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

/// Display fields computed from instants when materializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedField {
    /// `last_pm25`, `last_valid_datetime` and `last_latency` from the latest
    /// present sample.
    LastObservation,
    /// `latency`: whole hours since the record's observation instant.
    Latency,
    /// `updated_ago`: "2 days 3 hours ago" since the observation instant.
    UpdatedAgo,
    /// `percent_contained` clamped to 0..=100 from the named attribute.
    PercentContained(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub name: &'static str,
    /// `(attribute, property)` pairs copied when present.
    pub properties: &'static [(&'static str, &'static str)],
    /// Output properties that are emitted only as finite numbers.
    pub numeric: &'static [&'static str],
    /// Copy every present attribute under its own name as well.
    pub pass_through: bool,
    pub derived: &'static [DerivedField],
}

pub const MONITORS: Profile = Profile {
    name: "monitors",
    properties: &[
        ("location_name", "location_name"),
        ("timezone", "timezone"),
        ("deployment_type", "deployment_type"),
        ("elevation", "elevation"),
        ("country_code", "country_code"),
        ("state_code", "state_code"),
        ("county_name", "county_name"),
        ("airnow_id", "airnow_id"),
    ],
    numeric: &["elevation"],
    pass_through: false,
    derived: &[DerivedField::LastObservation],
};

pub const PURPLEAIR: Profile = Profile {
    name: "purpleair",
    properties: &[
        ("epa_nowcast", "epa_nowcast"),
        ("epa_pm25", "epa_pm25"),
        ("raw_pm25", "raw_pm25"),
        ("timezone", "timezone"),
        ("utc_ts", "utc_ts"),
    ],
    numeric: &["epa_nowcast", "epa_pm25", "raw_pm25"],
    pass_through: false,
    derived: &[DerivedField::Latency],
};

pub const HMS_FIRES: Profile = Profile {
    name: "hms_fires",
    properties: &[],
    numeric: &["frp"],
    pass_through: true,
    derived: &[],
};

pub const INCIWEB: Profile = Profile {
    name: "inciweb",
    properties: &[
        ("title", "title"),
        ("type", "type"),
        ("active", "active"),
        ("description", "description"),
        ("overview", "overview"),
        ("size", "size"),
        ("measurement_type", "measurement_type"),
        ("title_and_unit", "title_and_unit"),
        ("unit_code", "unit_code"),
        ("created", "created"),
        ("changed", "updated"),
        ("url", "url"),
    ],
    numeric: &["size"],
    pass_through: false,
    derived: &[
        DerivedField::UpdatedAgo,
        DerivedField::PercentContained("percent_of_perimeter"),
    ],
};

pub const CALFIRE: Profile = Profile {
    name: "calfire",
    properties: &[
        ("name", "name"),
        ("type", "type"),
        ("county", "county"),
        ("location", "location"),
        ("admin_unit", "admin_unit"),
        ("admin_unit_url", "admin_unit_url"),
        ("active", "active"),
        ("final", "final"),
        ("calfire_incident", "calfire_incident"),
        ("acres", "acres"),
        ("updated", "updated"),
        ("started", "started"),
        ("started_date", "started_date"),
        ("extinguished_date", "extinguished_date"),
        ("url", "url"),
        ("agency_names", "agency_names"),
        ("control_statement", "control_statement"),
    ],
    numeric: &["acres"],
    pass_through: false,
    derived: &[
        DerivedField::UpdatedAgo,
        DerivedField::PercentContained("percent_contained"),
    ],
};

impl Profile {
    /// Profile for a catalogue source name. Every monitor family shares
    /// [`MONITORS`].
    pub fn for_source(name: &str) -> Option<Profile> {
        match name {
            "monitors" | "airnow" | "airsis" | "wrcc" => Some(MONITORS),
            "purpleair" => Some(PURPLEAIR),
            "hms_fires" => Some(HMS_FIRES),
            "inciweb" => Some(INCIWEB),
            "calfire" => Some(CALFIRE),
            _ => None,
        }
    }

    fn emit(&self, properties: &mut Map<String, JsonValue>, key: &str, value: &Value) {
        let json = if self.numeric.contains(&key) {
            value
                .as_number()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
        } else {
            value.to_json()
        };
        if let Some(json) = json {
            properties.insert(key.to_string(), json);
        }
    }
}

/// Datasets that can project themselves into a FeatureCollection.
pub trait GeoJsonEmittable {
    fn to_feature_collection(&self, profile: &Profile, now: DateTime<Utc>) -> FeatureCollection;
}

fn number(n: f64) -> Option<JsonValue> {
    serde_json::Number::from_f64(n).map(JsonValue::Number)
}

fn record_feature(
    profile: &Profile,
    record: &SourceRecord,
    last: Option<(DateTime<Utc>, f64)>,
    now: DateTime<Utc>,
) -> Option<Feature> {
    if !record.location.is_valid() {
        return None;
    }
    let mut properties = Map::new();
    properties.insert("id".to_string(), JsonValue::String(record.id.clone()));
    if profile.pass_through {
        for (key, value) in &record.attributes {
            profile.emit(&mut properties, key, value);
        }
    }
    for (attribute, property) in profile.properties {
        profile.emit(&mut properties, property, record.get(attribute));
    }

    for derived in profile.derived {
        match derived {
            DerivedField::LastObservation => {
                if let Some((at, value)) = last {
                    if let Some(json) = number(value) {
                        properties.insert("last_pm25".to_string(), json);
                    }
                    properties.insert("last_valid_datetime".to_string(), JsonValue::String(at.to_rfc3339()));
                    properties.insert("last_latency".to_string(), JsonValue::from(hours_between(&at, &now)));
                }
            }
            DerivedField::Latency => {
                if let Some(at) = record.observed_at {
                    properties.insert("latency".to_string(), JsonValue::from(hours_between(&at, &now)));
                }
            }
            DerivedField::UpdatedAgo => {
                if let Some(at) = record.observed_at {
                    properties.insert("updated_ago".to_string(), JsonValue::String(format_ago(&at, &now)));
                }
            }
            DerivedField::PercentContained(attribute) => {
                if let Some(json) = record
                    .get(attribute)
                    .as_number()
                    .and_then(|p| number(p.clamp(0.0, 100.0)))
                {
                    properties.insert("percent_contained".to_string(), json);
                }
            }
        }
    }

    let [lon, lat] = record.location.lon_lat();
    let mut feature = Feature::point(lon, lat, properties);
    feature.id = Some(record.id.clone());
    Some(feature)
}

impl GeoJsonEmittable for Dataset {
    fn to_feature_collection(&self, profile: &Profile, now: DateTime<Utc>) -> FeatureCollection {
        let features = self
            .entries()
            .filter_map(|(record, _)| {
                let last = self
                    .last_present_sample(&record.id)
                    .and_then(|s| s.value.as_number().map(|v| (s.at, v)));
                record_feature(profile, record, last, now)
            })
            .collect();
        FeatureCollection::new(features)
    }
}

/// Materialize a dataset with a profile. Derived display fields use `now`,
/// which callers pass fresh on every call.
pub fn materialize<D: GeoJsonEmittable>(dataset: &D, profile: &Profile, now: DateTime<Utc>) -> FeatureCollection {
    dataset.to_feature_collection(profile, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dataset, hour};
    use aqm_feeds::Location;
    use serde_json::json;

    #[test]
    fn test_monitor_last_observation_fields() {
        let d = dataset(&[("a", &[(1, Some(4.0)), (2, Some(6.5)), (3, None)])]);
        let fc = materialize(&d, &MONITORS, hour(5));
        assert_eq!(fc.len(), 1);
        let props = &fc.features[0].properties;
        assert_eq!(props["id"], json!("a"));
        assert_eq!(props["last_pm25"], json!(6.5));
        assert_eq!(props["last_valid_datetime"], json!(hour(2).to_rfc3339()));
        assert_eq!(props["last_latency"], json!(3));
        assert_eq!(fc.features[0].id.as_deref(), Some("a"));
    }

    #[test]
    fn test_invalid_geometry_excluded() {
        let mut d = dataset(&[("a", &[(1, Some(1.0))]), ("b", &[(1, Some(2.0))])]);
        if let Some(record) = d.get_mut("b") {
            record.location = Location {
                lon: f64::NAN,
                lat: 38.0,
            };
        }
        let fc = materialize(&d, &MONITORS, hour(5));
        assert_eq!(fc.len(), 1);
    }

    #[test]
    fn test_incident_display_fields() {
        let mut record = SourceRecord::at("oak", -120.5, 37.5)
            .unwrap()
            .with_observed_at(Some(hour(0)));
        record.set("name", Value::text("Oak Fire"));
        record.set("acres", Value::number_from_str("ART"));
        record.set("percent_contained", Value::number(104.0));
        record.set("county", Value::Absent);
        let mut d = Dataset::new();
        d.insert(record, Vec::new());

        let fc = materialize(&d, &CALFIRE, hour(2 * 24 + 3));
        let props = &fc.features[0].properties;
        assert_eq!(props["name"], json!("Oak Fire"));
        assert_eq!(props["updated_ago"], json!("2 days 3 hours ago"));
        assert_eq!(props["percent_contained"], json!(100.0));
        assert!(!props.contains_key("acres"));
        assert!(!props.contains_key("county"));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let d = dataset(&[("a", &[(1, Some(4.0))]), ("b", &[(2, Some(5.0))])]);
        assert_eq!(materialize(&d, &MONITORS, hour(9)), materialize(&d, &MONITORS, hour(9)));
    }

    #[test]
    fn test_pass_through_profile_keeps_attributes() {
        let mut record = SourceRecord::at("42", -121.0, 39.0).unwrap();
        record.set("satellite", Value::text("GOES-18"));
        record.set("frp", Value::text("n/a-ish"));
        let mut d = Dataset::new();
        d.insert(record, Vec::new());
        let fc = materialize(&d, &HMS_FIRES, hour(0));
        let props = &fc.features[0].properties;
        assert_eq!(props["satellite"], json!("GOES-18"));
        assert!(!props.contains_key("frp"));
    }

    #[test]
    fn test_profile_lookup() {
        assert_eq!(Profile::for_source("airsis").map(|p| p.name), Some("monitors"));
        assert!(Profile::for_source("smoke").is_none());
    }
}
