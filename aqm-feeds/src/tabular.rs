//! Delimited-text decoders.
//!
//! Rows are mapped by header name, never by position. Every malformed row
//! is collected into a list of [`RowError`]s instead of stopping at the
//! first one; what happens to the valid rows is decided by an explicit
//! [`PartialPolicy`].
//!
//! # Formats
//!
//! - **Monitor metadata** (has headers): `deviceDeploymentID,locationName,longitude,latitude,...`
//! - **Monitor data** (has headers): `datetime,<id>,<id>,...` one column per monitor
//! - **Point tables** such as PurpleAir `pas.csv`: one row per entity, with
//!   id, longitude, latitude and optionally a timestamp and a measurement column

use crate::dataset::Dataset;
use crate::error::{FeedError, Result, RowError};
use crate::features::normalize_key;
use crate::record::{Sample, SourceRecord};
use crate::value::Value;
use csv::{ReaderBuilder, StringRecord};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// What to do with the valid rows of a payload that also has malformed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialPolicy {
    /// Any malformed row fails the whole decode.
    #[default]
    Reject,
    /// Keep the valid rows and log the malformed ones.
    KeepValid,
}

/// Result of a decode that may have collected row errors.
#[derive(Debug)]
pub struct Decoded<T> {
    pub value: T,
    pub errors: Vec<RowError>,
}

impl<T> Decoded<T> {
    /// Apply the partial-success policy.
    pub fn resolve(self, feed: &str, policy: PartialPolicy) -> Result<T> {
        if self.errors.is_empty() {
            return Ok(self.value);
        }
        match policy {
            PartialPolicy::Reject => Err(FeedError::malformed_rows(feed, self.errors)),
            PartialPolicy::KeepValid => {
                warn!(
                    "{}: keeping valid rows, dropped {} malformed row(s)",
                    feed,
                    self.errors.len()
                );
                for e in &self.errors {
                    debug!("{}: {}", feed, e);
                }
                Ok(self.value)
            }
        }
    }
}

/// A parsed table: original headers, their normalized keys and the rows
/// that had the right number of fields.
#[derive(Debug)]
pub struct Table {
    pub headers: Vec<String>,
    pub keys: Vec<String>,
    rows: Vec<(u64, StringRecord)>,
    pub errors: Vec<RowError>,
}

/// One well-shaped row of a [`Table`].
pub struct TableRow<'a> {
    pub line: u64,
    keys: &'a [String],
    record: &'a StringRecord,
}

impl<'a> TableRow<'a> {
    /// Raw cell by normalized key.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.record.get(index).map(|s| s.trim())
    }

    pub fn number(&self, key: &str) -> Value {
        self.get(key).map(Value::number_from_str).unwrap_or(Value::Absent)
    }

    /// Every cell keyed by normalized header, with numeric-looking cells
    /// coerced to numbers.
    pub fn attributes(&self) -> impl Iterator<Item = (&'a str, Value)> + '_ {
        self.keys
            .iter()
            .zip(self.record.iter())
            .map(|(k, cell)| (k.as_str(), Value::infer_from_str(cell)))
    }

    fn error(&self, message: impl Into<String>) -> RowError {
        RowError {
            line: self.line,
            message: message.into(),
        }
    }
}

impl Table {
    /// Parse delimited text with a header row.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Decode` only when the payload has no readable
    /// header; row problems are collected in `errors`.
    pub fn parse(feed: &str, input: &[u8]) -> Result<Table> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| FeedError::decode(feed, format!("unreadable header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(FeedError::decode(feed, "empty payload"));
        }
        let keys = headers.iter().map(|h| normalize_key(h)).collect();

        let mut rows = Vec::new();
        let mut errors = Vec::new();
        let mut line = 1u64;
        for result in rdr.records() {
            line += 1;
            match result {
                Ok(record) => {
                    let at = record.position().map(|p| p.line()).unwrap_or(line);
                    if record.len() != headers.len() {
                        errors.push(RowError {
                            line: at,
                            message: format!(
                                "expected {} fields, found {}",
                                headers.len(),
                                record.len()
                            ),
                        });
                    } else {
                        rows.push((at, record));
                    }
                }
                Err(e) => errors.push(RowError {
                    line: e.position().map(|p| p.line()).unwrap_or(line),
                    message: e.to_string(),
                }),
            }
        }
        Ok(Table {
            headers,
            keys,
            rows,
            errors,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = TableRow<'_>> {
        self.rows.iter().map(|(line, record)| TableRow {
            line: *line,
            keys: &self.keys,
            record,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column roles for a one-row-per-entity point table. Column names are
/// normalized keys.
#[derive(Debug, Clone, Copy)]
pub struct PointTableMapping<'a> {
    pub id: &'a str,
    pub longitude: &'a str,
    pub latitude: &'a str,
    /// Timestamp of the single sample carried by each row.
    pub time: Option<&'a str>,
    /// Measurement stored as the sample value.
    pub measurement: Option<&'a str>,
}

/// PurpleAir synoptic `pas.csv`.
pub const PURPLEAIR_MAPPING: PointTableMapping<'static> = PointTableMapping {
    id: "sensor_index",
    longitude: "longitude",
    latitude: "latitude",
    time: Some("utc_ts"),
    measurement: Some("epa_pm25"),
};

/// Decode a one-row-per-entity table.
pub fn decode_point_table(feed: &str, input: &[u8], mapping: &PointTableMapping) -> Result<Decoded<Dataset>> {
    let table = Table::parse(feed, input)?;
    for required in [mapping.id, mapping.longitude, mapping.latitude] {
        if !table.keys.iter().any(|k| k == required) {
            return Err(FeedError::decode(feed, format!("missing required column {required}")));
        }
    }

    let mut dataset = Dataset::new();
    let mut errors = table.errors.clone();
    let mut dropped = 0usize;
    for row in table.rows() {
        let Some(id) = row.get(mapping.id).filter(|s| !s.is_empty()) else {
            errors.push(row.error(format!("missing {}", mapping.id)));
            continue;
        };
        let observed_at = match mapping.time.and_then(|t| row.get(t)) {
            None | Some("") => None,
            Some(raw) => match aqm_utils::dates::parse_instant(raw) {
                Some(t) => Some(t),
                None => {
                    errors.push(row.error(format!("unparseable timestamp {raw:?}")));
                    continue;
                }
            },
        };
        let (Some(lon), Some(lat)) = (
            row.number(mapping.longitude).as_number(),
            row.number(mapping.latitude).as_number(),
        ) else {
            dropped += 1;
            continue;
        };
        let mut record = match SourceRecord::at(id, lon, lat) {
            Ok(r) => r.with_observed_at(observed_at),
            Err(e) => {
                debug!("{}: {}", feed, e);
                dropped += 1;
                continue;
            }
        };
        for (key, value) in row.attributes() {
            if Some(key) == mapping.time {
                record.set(key, observed_at.map(Value::time).unwrap_or(Value::Absent));
            } else {
                record.set(key, value);
            }
        }
        let samples = match (observed_at, mapping.measurement) {
            (Some(at), Some(column)) => vec![Sample::new(at, row.number(column))],
            _ => Vec::new(),
        };
        dataset.insert(record, samples);
    }
    if dropped > 0 {
        debug!("{}: dropped {} rows without valid coordinates", feed, dropped);
    }
    Ok(Decoded {
        value: dataset,
        errors,
    })
}

/// Decode a monitor metadata table plus its wide time-series table.
///
/// Each data column after `datetime` is one monitor id and must appear in
/// the metadata. Monitors with metadata but no data column are kept with an
/// empty series.
pub fn decode_monitor_tables(feed: &str, meta: &[u8], data: &[u8]) -> Result<Decoded<Dataset>> {
    let meta_table = Table::parse(feed, meta)?;
    let data_table = Table::parse(feed, data)?;

    let id_key = "device_deployment_id";
    if !meta_table.keys.iter().any(|k| k == id_key) {
        return Err(FeedError::decode(feed, "metadata is missing deviceDeploymentID"));
    }
    if data_table.keys.first().map(|k| k.as_str()) != Some("datetime") {
        return Err(FeedError::decode(feed, "data table must start with a datetime column"));
    }

    let mut dataset = Dataset::new();
    let mut errors = meta_table.errors.clone();
    let mut dropped = 0usize;
    for row in meta_table.rows() {
        let Some(id) = row.get(id_key).filter(|s| !s.is_empty()) else {
            errors.push(row.error("missing deviceDeploymentID"));
            continue;
        };
        let (Some(lon), Some(lat)) = (
            row.number("longitude").as_number(),
            row.number("latitude").as_number(),
        ) else {
            dropped += 1;
            continue;
        };
        let mut record = match SourceRecord::at(id, lon, lat) {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: {}", feed, e);
                dropped += 1;
                continue;
            }
        };
        for (key, value) in row.attributes() {
            if key != id_key {
                record.set(key, value);
            }
        }
        dataset.insert(record, Vec::new());
    }

    // Column ids keep their original spelling; only the datetime header is
    // normalized.
    let columns: Vec<&str> = data_table.headers.iter().skip(1).map(|h| h.as_str()).collect();
    for id in &columns {
        if !dataset.contains(id) {
            errors.push(RowError {
                line: 1,
                message: format!("data column {id} has no metadata"),
            });
        }
    }
    errors.extend(data_table.errors.iter().cloned());
    for row in data_table.rows() {
        let raw = row.get("datetime").unwrap_or("");
        let Some(at) = aqm_utils::dates::parse_instant(raw) else {
            errors.push(row.error(format!("unparseable datetime {raw:?}")));
            continue;
        };
        for (index, id) in columns.iter().enumerate() {
            let cell = row.record.get(index + 1).unwrap_or("");
            dataset.push_sample(id, Sample::new(at, Value::number_from_str(cell)));
        }
    }

    let ids: Vec<String> = dataset.ids().map(|s| s.to_string()).collect();
    for id in ids {
        let latest = dataset.last_present_sample(&id).map(|s| s.at);
        if let Some(record) = dataset.get_mut(&id) {
            record.observed_at = latest;
        }
    }
    if dropped > 0 {
        debug!("{}: dropped {} monitors without valid coordinates", feed, dropped);
    }
    Ok(Decoded {
        value: dataset,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::TimeFilterable;
    use chrono::{TimeZone, Utc};

    const PAS_CSV: &str = "\
sensor_index,latitude,longitude,epa_nowcast,epa_pm25,raw_pm25,timezone,utc_ts
154193,45.031963,-110.71382,7.7,7.2,4.4,America/Denver,2023-07-11 21:00:00+0000
154200,44.5,-111.0,,NA,3.1,America/Denver,2023-07-11 21:00:00+0000
154300,,,1.0,1.0,1.0,America/Denver,2023-07-11 21:00:00+0000
";

    const META_CSV: &str = "\
deviceDeploymentID,locationName,longitude,latitude,timezone,deploymentType
a_01,Bozeman,-111.04,45.68,America/Denver,Permanent
b_02,Missoula,-114.0,46.87,America/Denver,Temporary
";

    const DATA_CSV: &str = "\
datetime,a_01,b_02
2024-07-17 22:00:00+0000,5.5,NA
2024-07-17 23:00:00+0000,,12.0
2024-07-18 00:00:00+0000,6.5,
";

    #[test]
    fn test_decode_purpleair() {
        let decoded = decode_point_table("purpleair", PAS_CSV.as_bytes(), &PURPLEAIR_MAPPING).unwrap();
        assert!(decoded.errors.is_empty());
        let ds = decoded.value;
        // third row has no coordinates and is dropped
        assert_eq!(ds.len(), 2);
        let record = ds.get("154193").unwrap();
        assert!((record.location.lat - 45.031963).abs() < 1e-9);
        assert_eq!(record.get("epa_nowcast").as_number(), Some(7.7));
        assert_eq!(record.get("timezone").as_text(), Some("America/Denver"));
        assert_eq!(ds.samples("154193")[0].value.as_number(), Some(7.2));
        assert_eq!(ds.samples("154200")[0].value, Value::Absent);
        assert_eq!(ds.get("154200").unwrap().get("epa_nowcast"), &Value::Absent);
    }

    #[test]
    fn test_malformed_rows_are_all_reported() {
        let csv = "\
sensor_index,latitude,longitude,epa_pm25,utc_ts
1,45.0,-110.0,1.0,2023-07-11 21:00:00+0000
2,45.0
3,45.0,-110.0,1.0,not-a-time
4,45.0,-110.0,1.0,2023-07-11 21:00:00+0000
";
        let decoded = decode_point_table("purpleair", csv.as_bytes(), &PURPLEAIR_MAPPING).unwrap();
        assert_eq!(decoded.errors.len(), 2);
        assert_eq!(decoded.errors[0].line, 3);
        assert_eq!(decoded.errors[1].line, 4);
        assert_eq!(decoded.value.len(), 2);
    }

    #[test]
    fn test_partial_policy() {
        let csv = "sensor_index,latitude,longitude\n1,45.0,-110.0\n2,45.0\n";
        let decode = || decode_point_table("purpleair", csv.as_bytes(), &PURPLEAIR_MAPPING).unwrap();
        let err = decode().resolve("purpleair", PartialPolicy::Reject).unwrap_err();
        match err {
            FeedError::Decode { rows, .. } => assert_eq!(rows.len(), 1),
            other => panic!("unexpected error {other:?}"),
        }
        let kept = decode().resolve("purpleair", PartialPolicy::KeepValid).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_missing_required_column_is_hard_error() {
        let csv = "name,latitude,longitude\nx,45.0,-110.0\n";
        assert!(decode_point_table("purpleair", csv.as_bytes(), &PURPLEAIR_MAPPING).is_err());
    }

    #[test]
    fn test_decode_monitor_tables() {
        let decoded = decode_monitor_tables("airnow", META_CSV.as_bytes(), DATA_CSV.as_bytes()).unwrap();
        assert!(decoded.errors.is_empty());
        let ds = decoded.value;
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.samples("a_01").len(), 3);
        assert_eq!(ds.samples("a_01")[1].value, Value::Absent);
        assert_eq!(
            ds.get("a_01").unwrap().observed_at,
            Some(Utc.with_ymd_and_hms(2024, 7, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(
            ds.get("b_02").unwrap().observed_at,
            Some(Utc.with_ymd_and_hms(2024, 7, 17, 23, 0, 0).unwrap())
        );
        assert_eq!(
            ds.get("b_02").unwrap().get("deployment_type").as_text(),
            Some("Temporary")
        );
        assert_eq!(ds.timestamps().len(), 3);
    }

    #[test]
    fn test_monitor_data_without_metadata_is_reported() {
        let data = "datetime,a_01,zz_99\n2024-07-18 00:00:00+0000,1.0,2.0\n";
        let decoded = decode_monitor_tables("airnow", META_CSV.as_bytes(), data.as_bytes()).unwrap();
        assert_eq!(decoded.errors.len(), 1);
        assert!(decoded.errors[0].message.contains("zz_99"));
        assert!(!decoded.value.contains("zz_99"));
    }

    #[test]
    fn test_monitor_data_requires_datetime_column() {
        let data = "time,a_01\n2024-07-18 00:00:00+0000,1.0\n";
        assert!(decode_monitor_tables("airnow", META_CSV.as_bytes(), data.as_bytes()).is_err());
    }
}
