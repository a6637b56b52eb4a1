//! Compact binary point-cloud decoder (geobuf protocol buffers).
//!
//! The envelope decodes into the same [`FeatureCollection`] shape the
//! nested-JSON decoder produces. A corrupt envelope, or one that does not
//! hold a FeatureCollection, is a hard error with no partial result.
//! Individual features with unsupported or invalid geometry are dropped.

use crate::dataset::Dataset;
use crate::error::{FeedError, Result};
use crate::features::{features_to_dataset, FeatureMapping};
use crate::geojson::{Feature, FeatureCollection, Geometry};
use aqm_utils::geo::is_valid_lon_lat;
use log::debug;
use prost::Message;
use serde_json::{Map, Value as JsonValue};

/// Wire messages, laid out after `geobuf.proto` (proto2). Nested messages
/// are flattened to module level; tags are unchanged.
pub mod wire {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Data {
        #[prost(string, repeated, tag = "1")]
        pub keys: Vec<String>,
        #[prost(uint32, optional, tag = "2", default = "2")]
        pub dimensions: Option<u32>,
        #[prost(uint32, optional, tag = "3", default = "6")]
        pub precision: Option<u32>,
        #[prost(oneof = "DataType", tags = "4, 5, 6")]
        pub data_type: Option<DataType>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum DataType {
        #[prost(message, tag = "4")]
        FeatureCollection(FeatureCollection),
        #[prost(message, tag = "5")]
        Feature(Feature),
        #[prost(message, tag = "6")]
        Geometry(Geometry),
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct FeatureCollection {
        #[prost(message, repeated, tag = "1")]
        pub features: Vec<Feature>,
        #[prost(message, repeated, tag = "13")]
        pub values: Vec<Value>,
        #[prost(uint32, repeated, tag = "15")]
        pub custom_properties: Vec<u32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Feature {
        #[prost(message, optional, tag = "1")]
        pub geometry: Option<Geometry>,
        #[prost(oneof = "FeatureId", tags = "11, 12")]
        pub id_type: Option<FeatureId>,
        #[prost(message, repeated, tag = "13")]
        pub values: Vec<Value>,
        /// Pairs of (index into `Data::keys`, index into `values`).
        #[prost(uint32, repeated, tag = "14")]
        pub properties: Vec<u32>,
        #[prost(uint32, repeated, tag = "15")]
        pub custom_properties: Vec<u32>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum FeatureId {
        #[prost(string, tag = "11")]
        Id(String),
        #[prost(sint64, tag = "12")]
        IntId(i64),
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Geometry {
        #[prost(enumeration = "GeometryType", required, tag = "1")]
        pub r#type: i32,
        #[prost(uint32, repeated, tag = "2")]
        pub lengths: Vec<u32>,
        #[prost(sint64, repeated, tag = "3")]
        pub coords: Vec<i64>,
        #[prost(message, repeated, tag = "4")]
        pub geometries: Vec<Geometry>,
        #[prost(message, repeated, tag = "13")]
        pub values: Vec<Value>,
        #[prost(uint32, repeated, tag = "15")]
        pub custom_properties: Vec<u32>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
    #[repr(i32)]
    pub enum GeometryType {
        Point = 0,
        MultiPoint = 1,
        LineString = 2,
        MultiLineString = 3,
        Polygon = 4,
        MultiPolygon = 5,
        GeometryCollection = 6,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Value {
        #[prost(string, optional, tag = "1")]
        pub string_value: Option<String>,
        #[prost(double, optional, tag = "2")]
        pub double_value: Option<f64>,
        #[prost(uint64, optional, tag = "3")]
        pub pos_int_value: Option<u64>,
        #[prost(uint64, optional, tag = "4")]
        pub neg_int_value: Option<u64>,
        #[prost(bool, optional, tag = "5")]
        pub bool_value: Option<bool>,
        /// Arbitrary JSON serialized as text.
        #[prost(string, optional, tag = "6")]
        pub json_value: Option<String>,
    }
}

/// HMS satellite fire detections.
pub const HMS_FIRES_MAPPING: FeatureMapping<'static> = FeatureMapping {
    id_keys: &["id", "fire_id"],
    observed_at_key: None,
    renames: &[],
    number_keys: &["frp", "lon", "lat"],
    flag_keys: &[],
    time_keys: &[],
};

fn to_json(value: &wire::Value) -> JsonValue {
    if let Some(s) = &value.string_value {
        return JsonValue::String(s.clone());
    }
    if let Some(d) = value.double_value {
        return serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Some(n) = value.pos_int_value {
        return JsonValue::from(n);
    }
    if let Some(n) = value.neg_int_value {
        return i64::try_from(n).map(|n| JsonValue::from(-n)).unwrap_or(JsonValue::Null);
    }
    if let Some(b) = value.bool_value {
        return JsonValue::Bool(b);
    }
    if let Some(text) = &value.json_value {
        return serde_json::from_str(text).unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}

/// Coordinate frame of one envelope.
struct Frame {
    dimensions: usize,
    scale: f64,
}

impl Frame {
    fn point(&self, raw: &[i64]) -> Option<[f64; 2]> {
        let lon = *raw.first()? as f64 / self.scale;
        let lat = *raw.get(1)? as f64 / self.scale;
        is_valid_lon_lat(lon, lat).then_some([lon, lat])
    }

    /// MultiPoint coordinates are delta-encoded against the previous point.
    fn delta_points(&self, raw: &[i64]) -> Option<Vec<[f64; 2]>> {
        if raw.is_empty() || raw.len() % self.dimensions != 0 {
            return None;
        }
        let mut running = vec![0i64; self.dimensions];
        let mut points = Vec::with_capacity(raw.len() / self.dimensions);
        for chunk in raw.chunks(self.dimensions) {
            for (acc, delta) in running.iter_mut().zip(chunk) {
                *acc = acc.checked_add(*delta)?;
            }
            points.push(self.point(&running)?);
        }
        Some(points)
    }

    fn geometry(&self, geometry: &wire::Geometry) -> Option<Geometry> {
        match wire::GeometryType::try_from(geometry.r#type).ok()? {
            wire::GeometryType::Point => self.point(&geometry.coords).map(Geometry::Point),
            wire::GeometryType::MultiPoint => self.delta_points(&geometry.coords).map(Geometry::MultiPoint),
            _ => None,
        }
    }
}

fn convert_feature(frame: &Frame, keys: &[String], feature: &wire::Feature) -> Option<Feature> {
    let geometry = frame.geometry(feature.geometry.as_ref()?)?;
    let id = match &feature.id_type {
        Some(wire::FeatureId::Id(s)) => Some(s.clone()),
        Some(wire::FeatureId::IntId(n)) => Some(n.to_string()),
        None => None,
    };
    let mut properties = Map::new();
    for pair in feature.properties.chunks_exact(2) {
        let key = keys.get(pair[0] as usize);
        let value = feature.values.get(pair[1] as usize);
        if let (Some(key), Some(value)) = (key, value) {
            properties.insert(key.clone(), to_json(value));
        }
    }
    Some(Feature::new(id, geometry, properties))
}

/// Decode a geobuf envelope into a FeatureCollection.
///
/// # Errors
///
/// `FeedError::Decode` for a corrupt envelope or a payload that is a bare
/// Feature or Geometry.
pub fn parse_point_cloud(feed: &str, input: &[u8]) -> Result<FeatureCollection> {
    let data = wire::Data::decode(input)
        .map_err(|e| FeedError::decode(feed, format!("corrupt point cloud: {}", e)))?;
    let Some(wire::DataType::FeatureCollection(collection)) = &data.data_type else {
        return Err(FeedError::decode(feed, "point cloud does not hold a FeatureCollection"));
    };
    let dimensions = data.dimensions() as usize;
    if dimensions < 2 {
        return Err(FeedError::decode(feed, format!("unsupported dimensions {dimensions}")));
    }
    let frame = Frame {
        dimensions,
        scale: 10f64.powi(data.precision() as i32),
    };

    let features: Vec<Feature> = collection
        .features
        .iter()
        .filter_map(|f| convert_feature(&frame, &data.keys, f))
        .collect();
    if features.len() < collection.features.len() {
        debug!(
            "{}: dropped {} of {} features with unsupported geometry",
            feed,
            collection.features.len() - features.len(),
            collection.features.len()
        );
    }
    Ok(FeatureCollection::new(features))
}

/// Decode a geobuf envelope into a Dataset.
pub fn decode_point_cloud(feed: &str, input: &[u8], mapping: &FeatureMapping) -> Result<Dataset> {
    let fc = parse_point_cloud(feed, input)?;
    Ok(features_to_dataset(feed, &fc, mapping))
}
