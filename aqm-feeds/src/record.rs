use crate::error::{FeedError, Result};
use crate::value::Value;
use aqm_utils::geo::is_valid_lon_lat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    /// Validated constructor; `None` for non-finite or out-of-range pairs.
    pub fn new(lon: f64, lat: f64) -> Option<Location> {
        is_valid_lon_lat(lon, lat).then_some(Location { lon, lat })
    }

    pub fn is_valid(&self) -> bool {
        is_valid_lon_lat(self.lon, self.lat)
    }

    /// GeoJSON coordinate order.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// One time sample of an entity's primary measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: Value,
}

impl Sample {
    pub fn new(at: DateTime<Utc>, value: Value) -> Self {
        Sample { at, value }
    }
}

/// One upstream entity: a monitoring station, a sensor or an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub location: Location,
    pub observed_at: Option<DateTime<Utc>>,
    /// Normalized (snake_case) attribute bag.
    pub attributes: BTreeMap<String, Value>,
}

impl SourceRecord {
    /// Build a record, rejecting empty ids.
    pub fn new(id: impl Into<String>, location: Location) -> Result<Self> {
        let id = id.into();
        let id = id.trim();
        if id.is_empty() {
            return Err(FeedError::Validation("record id is empty".to_string()));
        }
        Ok(SourceRecord {
            id: id.to_string(),
            location,
            observed_at: None,
            attributes: BTreeMap::new(),
        })
    }

    /// Build a record from raw coordinates, rejecting invalid geometry.
    pub fn at(id: impl Into<String>, lon: f64, lat: f64) -> Result<Self> {
        let id = id.into();
        match Location::new(lon, lat) {
            Some(location) => SourceRecord::new(id, location),
            None => Err(FeedError::Validation(format!(
                "record {id} has invalid coordinates ({lon}, {lat})"
            ))),
        }
    }

    pub fn with_observed_at(mut self, observed_at: Option<DateTime<Utc>>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Insert an attribute. Absent values are still stored so consumers
    /// can tell "reported nothing" from "not part of this source".
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> &Value {
        self.attributes.get(key).unwrap_or(&Value::Absent)
    }
}
