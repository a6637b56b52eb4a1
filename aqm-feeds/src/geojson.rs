//! GeoJSON FeatureCollection shape shared by the JSON and point-cloud
//! decoders and by the materializer.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Point geometries only; everything the pipeline places on a map is a
/// point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    MultiPoint(Vec<[f64; 2]>),
}

impl Geometry {
    /// `[lon, lat]` used as the entity location: the point itself, or the
    /// first member of a MultiPoint.
    pub fn representative_point(&self) -> Option<[f64; 2]> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::MultiPoint(points) => points.first().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub geometry: Geometry,
    pub properties: Map<String, JsonValue>,
}

impl Feature {
    pub fn new(id: Option<String>, geometry: Geometry, properties: Map<String, JsonValue>) -> Self {
        Feature {
            kind: "Feature",
            id,
            geometry,
            properties,
        }
    }

    pub fn point(lon: f64, lat: f64, properties: Map<String, JsonValue>) -> Self {
        Feature::new(None, Geometry::Point([lon, lat]), properties)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<Feature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        FeatureCollection::new(Vec::new())
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        FeatureCollection {
            kind: "FeatureCollection",
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_as_geojson() {
        let mut props = Map::new();
        props.insert("name".to_string(), json!("Oak Fire"));
        let fc = FeatureCollection::new(vec![Feature::point(-120.5, 37.5, props)]);
        assert_eq!(
            fc.to_json(),
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [-120.5, 37.5]},
                    "properties": {"name": "Oak Fire"}
                }]
            })
        );
    }

    #[test]
    fn test_multipoint_representative_point() {
        let geometry = Geometry::MultiPoint(vec![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(geometry.representative_point(), Some([1.0, 2.0]));
        assert_eq!(Geometry::MultiPoint(vec![]).representative_point(), None);
    }
}
