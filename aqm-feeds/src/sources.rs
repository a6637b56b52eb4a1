//! Static catalogue of upstream sources.
//!
//! Each source is a name, a display label, an entity kind, a wire encoding
//! and one or more addresses. Addresses are URLs by default and can be
//! pointed at local files for offline use.

use crate::compression::maybe_inflate;
use crate::dataset::Dataset;
use crate::error::{FeedError, Result};
use crate::nested_json::{decode_calfire, decode_inciweb};
use crate::point_cloud::{decode_point_cloud, HMS_FIRES_MAPPING};
use crate::tabular::{decode_monitor_tables, decode_point_table, PartialPolicy, PURPLEAIR_MAPPING};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Public AirFire export bucket.
pub const AIRFIRE_BASE_URL: &str = "https://airfire-data-exports.s3.us-west-2.amazonaws.com";

/// Inciweb map data endpoint.
pub const INCIWEB_URL: &str = "https://inciweb.wildfire.gov/api/map_data";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_TRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Regulatory and temporary monitoring stations
    Monitor,
    /// Low-cost sensors
    Sensor,
    /// Fire detections and incidents
    Incident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Metadata table plus wide data table
    MonitorTables,
    /// One row per sensor
    PurpleAirTable,
    /// geobuf FeatureCollection
    PointCloud,
    /// Array of flat incident objects with DMS coordinates
    InciwebJson,
    /// GeoJSON FeatureCollection
    CalfireGeoJson,
}

impl Encoding {
    /// Number of payloads a decode consumes.
    pub fn payload_count(&self) -> usize {
        match self {
            Encoding::MonitorTables => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    Url(String),
    Path(PathBuf),
}

impl Address {
    /// `http://` and `https://` strings are URLs, anything else a path.
    pub fn parse(raw: &str) -> Address {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Address::Url(raw.to_string())
        } else {
            Address::Path(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Url(url) => write!(f, "{}", url),
            Address::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Everything needed to load and decode one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Label used in status text, shared by sources of one family.
    pub label: String,
    pub kind: SourceKind,
    pub encoding: Encoding,
    pub addresses: Vec<Address>,
    pub reloadable: bool,
    pub policy: PartialPolicy,
    pub timeout: Duration,
    pub max_tries: u32,
}

impl SourceConfig {
    fn airfire(name: &str, label: &str, kind: SourceKind, encoding: Encoding, paths: &[&str]) -> Self {
        SourceConfig {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            encoding,
            addresses: paths
                .iter()
                .map(|p| Address::Url(format!("{}/{}", AIRFIRE_BASE_URL, p)))
                .collect(),
            reloadable: true,
            policy: PartialPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    fn monitors(name: &str) -> Self {
        let meta = format!("monitoring/v2/latest/data/{}_PM2.5_latest_meta.csv", name);
        let data = format!("monitoring/v2/latest/data/{}_PM2.5_latest_data.csv", name);
        SourceConfig::airfire(name, "monitors", SourceKind::Monitor, Encoding::MonitorTables, &[&meta, &data])
    }

    /// Replace the AirFire host prefix on every URL that uses it.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        for address in &mut self.addresses {
            if let Address::Url(url) = address {
                if let Some(rest) = url.strip_prefix(AIRFIRE_BASE_URL) {
                    *url = format!("{}{}", base_url, rest);
                }
            }
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: PartialPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Point the source at local files instead, one per payload.
    pub fn with_file_override(mut self, paths: &[PathBuf]) -> Result<Self> {
        if paths.len() != self.encoding.payload_count() {
            return Err(FeedError::Validation(format!(
                "{} expects {} file(s), got {}",
                self.name,
                self.encoding.payload_count(),
                paths.len()
            )));
        }
        self.addresses = paths.iter().cloned().map(Address::Path).collect();
        Ok(self)
    }

    /// Decode raw payloads, one per address, in address order. Gzip
    /// payloads are inflated first.
    ///
    /// # Errors
    ///
    /// `FeedError::Decode` when a payload is malformed, including row
    /// errors rejected by this source's partial policy.
    pub fn decode(&self, payloads: &[Vec<u8>]) -> Result<Dataset> {
        if payloads.len() != self.encoding.payload_count() {
            return Err(FeedError::decode(
                &self.name,
                format!("expected {} payload(s), got {}", self.encoding.payload_count(), payloads.len()),
            ));
        }
        let first = maybe_inflate(&self.name, &payloads[0])?;
        match self.encoding {
            Encoding::MonitorTables => {
                let data = maybe_inflate(&self.name, &payloads[1])?;
                decode_monitor_tables(&self.name, &first, &data)?.resolve(&self.name, self.policy)
            }
            Encoding::PurpleAirTable => {
                decode_point_table(&self.name, &first, &PURPLEAIR_MAPPING)?.resolve(&self.name, self.policy)
            }
            Encoding::PointCloud => decode_point_cloud(&self.name, &first, &HMS_FIRES_MAPPING),
            Encoding::InciwebJson => decode_inciweb(&self.name, &first),
            Encoding::CalfireGeoJson => decode_calfire(&self.name, &first),
        }
    }
}

/// Every known source, in the fixed order used for status text and for
/// combining monitor families.
pub fn catalogue() -> Vec<SourceConfig> {
    let inciweb = SourceConfig {
        name: "inciweb".to_string(),
        label: "Inciweb fires".to_string(),
        kind: SourceKind::Incident,
        encoding: Encoding::InciwebJson,
        addresses: vec![Address::Url(INCIWEB_URL.to_string())],
        reloadable: true,
        policy: PartialPolicy::default(),
        timeout: DEFAULT_TIMEOUT,
        max_tries: DEFAULT_MAX_TRIES,
    };
    vec![
        SourceConfig::monitors("airnow"),
        SourceConfig::monitors("airsis"),
        SourceConfig::monitors("wrcc"),
        SourceConfig::airfire(
            "purpleair",
            "purpleair",
            SourceKind::Sensor,
            Encoding::PurpleAirTable,
            &["maps/purple_air/v2/pas.csv"],
        ),
        SourceConfig::airfire(
            "hms_fires",
            "HMS fires",
            SourceKind::Incident,
            Encoding::PointCloud,
            &["maps/geobuf/latest_fire.pbf"],
        ),
        inciweb,
        SourceConfig::airfire(
            "calfire",
            "CalFire fires",
            SourceKind::Incident,
            Encoding::CalfireGeoJson,
            &["calfire/incidents_active.geojson"],
        ),
    ]
}

/// Look up one source by name.
pub fn find(name: &str) -> Option<SourceConfig> {
    catalogue().into_iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_names_are_unique_and_ordered() {
        let names: Vec<String> = catalogue().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["airnow", "airsis", "wrcc", "purpleair", "hms_fires", "inciweb", "calfire"]
        );
    }

    #[test]
    fn test_monitor_sources_have_two_payloads() {
        let airnow = find("airnow").unwrap();
        assert_eq!(airnow.addresses.len(), 2);
        assert_eq!(
            airnow.addresses[0],
            Address::Url(format!(
                "{}/monitoring/v2/latest/data/airnow_PM2.5_latest_meta.csv",
                AIRFIRE_BASE_URL
            ))
        );
    }

    #[test]
    fn test_with_base_url_only_touches_airfire_urls() {
        let purpleair = find("purpleair").unwrap().with_base_url("http://localhost:9000/");
        assert_eq!(
            purpleair.addresses[0],
            Address::Url("http://localhost:9000/maps/purple_air/v2/pas.csv".to_string())
        );
        let inciweb = find("inciweb").unwrap().with_base_url("http://localhost:9000");
        assert_eq!(inciweb.addresses[0], Address::Url(INCIWEB_URL.to_string()));
    }

    #[test]
    fn test_file_override_checks_payload_count() {
        let airnow = find("airnow").unwrap();
        assert!(airnow.clone().with_file_override(&[PathBuf::from("meta.csv")]).is_err());
        let local = airnow
            .with_file_override(&[PathBuf::from("meta.csv"), PathBuf::from("data.csv")])
            .unwrap();
        assert_eq!(local.addresses[1], Address::Path(PathBuf::from("data.csv")));
    }

    #[test]
    fn test_address_parse() {
        assert!(matches!(Address::parse("https://example.org/a.csv"), Address::Url(_)));
        assert!(matches!(Address::parse("./data/a.csv"), Address::Path(_)));
    }

    #[test]
    fn test_decode_dispatch_applies_policy() {
        let csv = b"sensor_index,latitude,longitude\n1,45.0,-110.0\n2,45.0\n".to_vec();
        let strict = find("purpleair").unwrap();
        assert!(strict.decode(&[csv.clone()]).is_err());
        let lenient = strict.with_policy(PartialPolicy::KeepValid);
        assert_eq!(lenient.decode(&[csv]).unwrap().len(), 1);
        assert!(lenient.decode(&[]).is_err());
    }
}
