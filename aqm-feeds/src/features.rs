//! Conversion of decoded FeatureCollections into normalized Datasets.
//!
//! Both the nested-JSON and the point-cloud decoders end up here, so
//! property-name normalization and value coercion are identical for the two
//! encodings.

use crate::dataset::Dataset;
use crate::geojson::FeatureCollection;
use crate::record::SourceRecord;
use crate::value::Value;
use aqm_utils::text::snake_case;
use log::debug;
use serde_json::Value as JsonValue;

/// Prefix some upstream APIs put on every property name.
pub const REDUNDANT_PREFIX: &str = "field_";

/// Normalize an upstream property name: drop the redundant prefix, then
/// snake_case.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix(REDUNDANT_PREFIX).unwrap_or(trimmed);
    snake_case(stripped)
}

/// Per-source description of how feature properties map onto a record.
/// All keys are given in their normalized form.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureMapping<'a> {
    /// Property keys tried, in order, when the feature carries no id.
    pub id_keys: &'a [&'a str],
    /// Property holding the observation instant.
    pub observed_at_key: Option<&'a str>,
    /// `(from, to)` renames applied after normalization.
    pub renames: &'a [(&'a str, &'a str)],
    pub number_keys: &'a [&'a str],
    pub flag_keys: &'a [&'a str],
    pub time_keys: &'a [&'a str],
}

impl FeatureMapping<'_> {
    fn output_key(&self, normalized: String) -> String {
        self.renames
            .iter()
            .find(|(from, _)| *from == normalized)
            .map(|(_, to)| to.to_string())
            .unwrap_or(normalized)
    }

    /// Coerce one property value according to its normalized key.
    pub fn coerce(&self, key: &str, json: &JsonValue) -> Value {
        let as_text = || match json {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        };
        if self.number_keys.contains(&key) {
            return match json {
                JsonValue::Number(n) => n.as_f64().map(Value::number).unwrap_or(Value::Absent),
                JsonValue::String(s) => Value::number_from_str(s),
                JsonValue::Null => Value::Absent,
                other => Value::Invalid(other.to_string()),
            };
        }
        if self.flag_keys.contains(&key) {
            return match json {
                JsonValue::Bool(b) => Value::flag(*b),
                JsonValue::Null => Value::Absent,
                _ => as_text().map(|s| Value::flag_from_str(&s)).unwrap_or(Value::Absent),
            };
        }
        if self.time_keys.contains(&key) {
            return match as_text() {
                Some(s) => Value::time_from_str(&s),
                None => Value::Absent,
            };
        }
        Value::from_json(json)
    }
}

/// Id text of a raw property value. Strings are kept verbatim so ids such
/// as `"0042"` survive; integers render without a fraction.
fn raw_id(json: &JsonValue) -> Option<String> {
    let id = match json {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Build a Dataset from a FeatureCollection. Features without a usable
/// point are dropped. Incident features carry no time series.
///
/// A feature with neither a feature id nor an id property is keyed
/// `{feed}-{index}` by its position in the collection, so co-located
/// detections stay distinct.
pub fn features_to_dataset(feed: &str, fc: &FeatureCollection, mapping: &FeatureMapping) -> Dataset {
    let mut dataset = Dataset::new();
    let mut dropped = 0usize;
    for (index, feature) in fc.features.iter().enumerate() {
        let Some([lon, lat]) = feature.geometry.representative_point() else {
            dropped += 1;
            continue;
        };

        let mut attributes = Vec::with_capacity(feature.properties.len());
        let mut id_candidates: Vec<(usize, String)> = Vec::new();
        for (raw_key, json) in &feature.properties {
            let key = mapping.output_key(normalize_key(raw_key));
            if let Some(rank) = mapping.id_keys.iter().position(|k| *k == key) {
                if let Some(id) = raw_id(json) {
                    id_candidates.push((rank, id.clone()));
                    attributes.push((key, Value::text(id)));
                    continue;
                }
            }
            let value = mapping.coerce(&key, json);
            attributes.push((key, value));
        }
        id_candidates.sort_by_key(|(rank, _)| *rank);

        let id = feature
            .id
            .clone()
            .or_else(|| id_candidates.into_iter().next().map(|(_, id)| id))
            .unwrap_or_else(|| format!("{feed}-{index}"));

        let mut record = match SourceRecord::at(id, lon, lat) {
            Ok(record) => record,
            Err(e) => {
                debug!("dropping feature: {}", e);
                dropped += 1;
                continue;
            }
        };
        if let Some(key) = mapping.observed_at_key {
            record.observed_at = attributes
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.as_time());
        }
        for (key, value) in attributes {
            record.set(key, value);
        }
        dataset.insert(record, Vec::new());
    }
    if dropped > 0 {
        debug!("{}: dropped {} features", feed, dropped);
    }
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::{Feature, Geometry};
    use serde_json::{json, Map};

    fn props(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("field_lat_deg"), "lat_deg");
        assert_eq!(normalize_key("AcresBurned"), "acres_burned");
        assert_eq!(normalize_key("UniqueId"), "unique_id");
    }

    #[test]
    fn test_features_to_dataset_maps_and_coerces() {
        let mapping = FeatureMapping {
            id_keys: &["unique_id"],
            observed_at_key: Some("updated"),
            renames: &[("acres_burned", "acres")],
            number_keys: &["acres"],
            flag_keys: &["is_active"],
            time_keys: &["updated"],
        };
        let fc = FeatureCollection::new(vec![Feature::point(
            -120.1,
            37.2,
            props(json!({
                "UniqueId": "abc-1",
                "AcresBurned": "",
                "IsActive": true,
                "Updated": "2024-07-18T12:00:00Z"
            })),
        )]);
        let ds = features_to_dataset("calfire", &fc, &mapping);
        let record = ds.get("abc-1").unwrap();
        assert_eq!(record.get("acres"), &Value::Absent);
        assert_eq!(record.get("is_active").as_flag(), Some(true));
        assert!(record.observed_at.is_some());
        assert!(ds.samples("abc-1").is_empty());
    }

    #[test]
    fn test_features_without_id_are_keyed_by_position() {
        let fc = FeatureCollection::new(vec![
            Feature::point(-121.5, 39.25, props(json!({"Satellite": "GOES-16"}))),
            Feature::new(None, Geometry::MultiPoint(vec![]), Map::new()),
            Feature::point(-121.5, 39.25, props(json!({"Satellite": "GOES-18"}))),
        ]);
        let ds = features_to_dataset("hms_fires", &fc, &FeatureMapping::default());
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get("hms_fires-0").unwrap().get("satellite").as_text(), Some("GOES-16"));
        assert_eq!(ds.get("hms_fires-2").unwrap().get("satellite").as_text(), Some("GOES-18"));
    }

    #[test]
    fn test_id_properties_are_kept_verbatim() {
        let mapping = FeatureMapping {
            id_keys: &["id"],
            ..Default::default()
        };
        let fc = FeatureCollection::new(vec![
            Feature::point(-110.0, 45.0, props(json!({"id": "0042"}))),
            Feature::point(-111.0, 45.0, props(json!({"id": "1e3"}))),
            Feature::point(-112.0, 45.0, props(json!({"id": 7}))),
        ]);
        let ds = features_to_dataset("inciweb", &fc, &mapping);
        let ids: Vec<&str> = ds.ids().collect();
        assert_eq!(ids.len(), 3);
        assert!(ds.contains("0042"));
        assert!(ds.contains("1e3"));
        assert!(ds.contains("7"));
        assert_eq!(ds.get("0042").unwrap().get("id"), &Value::text("0042"));
    }
}
