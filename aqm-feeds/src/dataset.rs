use crate::capability::{SeriesCollection, TimeFilterable};
use crate::record::{Sample, SourceRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Normalized, uniquely keyed collection of entities with optional time
/// series.
///
/// Ids are distinct by construction: inserting an id that already exists
/// replaces the record and its series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    records: BTreeMap<String, SourceRecord>,
    series: BTreeMap<String, Vec<Sample>>,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset::default()
    }

    /// Insert a record and its samples, returning the replaced record.
    pub fn insert(&mut self, record: SourceRecord, mut samples: Vec<Sample>) -> Option<SourceRecord> {
        samples.sort_by_key(|s| s.at);
        let id = record.id.clone();
        if samples.is_empty() {
            self.series.remove(&id);
        } else {
            self.series.insert(id.clone(), samples);
        }
        self.records.insert(id, record)
    }

    /// Append a sample to an existing entity. Returns false for unknown ids.
    pub fn push_sample(&mut self, id: &str, sample: Sample) -> bool {
        if !self.records.contains_key(id) {
            return false;
        }
        let series = self.series.entry(id.to_string()).or_default();
        let position = series.partition_point(|s| s.at <= sample.at);
        series.insert(position, sample);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SourceRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SourceRecord> {
        self.records.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(|k| k.as_str())
    }

    /// Samples of one entity in time order.
    pub fn samples(&self, id: &str) -> &[Sample] {
        self.series.get(id).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// Every entity with its samples, ordered by id.
    pub fn entries(&self) -> impl Iterator<Item = (&SourceRecord, &[Sample])> {
        self.records.values().map(|r| (r, self.samples(&r.id)))
    }

    /// Latest sample with a present value.
    pub fn last_present_sample(&self, id: &str) -> Option<&Sample> {
        self.samples(id).iter().rev().find(|s| s.value.is_present())
    }

    /// Number of entities with at least one present sample.
    pub fn non_empty_count(&self) -> usize {
        self.series
            .values()
            .filter(|series| series.iter().any(|s| s.value.is_present()))
            .count()
    }

    /// Copy without the listed ids.
    pub fn without_ids(&self, excluded: &BTreeSet<String>) -> Dataset {
        let mut out = self.clone();
        for id in excluded {
            out.records.remove(id);
            out.series.remove(id);
        }
        out
    }
}

impl TimeFilterable for Dataset {
    fn timestamps(&self) -> Vec<DateTime<Utc>> {
        let stamps: BTreeSet<DateTime<Utc>> = self
            .series
            .values()
            .flat_map(|series| series.iter().map(|s| s.at))
            .collect();
        stamps.into_iter().collect()
    }

    fn filter_by_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let series = self
            .series
            .iter()
            .filter_map(|(id, samples)| {
                let kept: Vec<Sample> = samples
                    .iter()
                    .filter(|s| s.at >= start && s.at <= end)
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (id.clone(), kept))
            })
            .collect();
        Dataset {
            records: self.records.clone(),
            series,
        }
    }

    fn has_time_axis(&self) -> bool {
        self.series.values().any(|s| !s.is_empty())
    }
}

impl SeriesCollection for Dataset {
    fn count(&self) -> usize {
        self.len()
    }

    fn drop_empty(&self) -> Self {
        let keep: BTreeSet<&String> = self
            .series
            .iter()
            .filter(|(_, samples)| samples.iter().any(|s| s.value.is_present()))
            .map(|(id, _)| id)
            .collect();
        Dataset {
            records: self
                .records
                .iter()
                .filter(|(id, _)| keep.contains(id))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
            series: self
                .series
                .iter()
                .filter(|(id, _)| keep.contains(id))
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect(),
        }
    }

    fn combine(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (record, samples) in other.entries() {
            out.insert(record.clone(), samples.to_vec());
        }
        out
    }

    fn is_empty(&self) -> bool {
        self.non_empty_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, hour, 0, 0).unwrap()
    }

    fn record(id: &str) -> SourceRecord {
        SourceRecord::at(id, -120.0, 38.0).unwrap()
    }

    #[test]
    fn test_insert_replaces_existing_id() {
        let mut ds = Dataset::new();
        ds.insert(record("a"), vec![Sample::new(at(1, 0), Value::number(1.0))]);
        let replaced = ds.insert(record("a"), vec![Sample::new(at(2, 0), Value::number(2.0))]);
        assert!(replaced.is_some());
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.samples("a").len(), 1);
        assert_eq!(ds.samples("a")[0].value.as_number(), Some(2.0));
    }

    #[test]
    fn test_push_sample_keeps_time_order() {
        let mut ds = Dataset::new();
        ds.insert(record("a"), vec![]);
        assert!(ds.push_sample("a", Sample::new(at(3, 0), Value::number(3.0))));
        assert!(ds.push_sample("a", Sample::new(at(1, 0), Value::number(1.0))));
        assert!(!ds.push_sample("missing", Sample::new(at(1, 0), Value::number(1.0))));
        let times: Vec<_> = ds.samples("a").iter().map(|s| s.at).collect();
        assert_eq!(times, vec![at(1, 0), at(3, 0)]);
    }

    #[test]
    fn test_empty_means_no_present_samples() {
        let mut ds = Dataset::new();
        ds.insert(record("a"), vec![Sample::new(at(1, 0), Value::Absent)]);
        ds.insert(record("b"), vec![]);
        assert_eq!(ds.count(), 2);
        assert!(SeriesCollection::is_empty(&ds));
        assert_eq!(ds.drop_empty().count(), 0);
    }

    #[test]
    fn test_filter_by_time_is_inclusive() {
        let mut ds = Dataset::new();
        ds.insert(
            record("a"),
            (1..=5).map(|d| Sample::new(at(d, 0), Value::number(d as f64))).collect(),
        );
        let filtered = ds.filter_by_time(at(2, 0), at(4, 0));
        assert_eq!(filtered.samples("a").len(), 3);
        assert_eq!(filtered.timestamps(), vec![at(2, 0), at(3, 0), at(4, 0)]);
    }

    #[test]
    fn test_without_ids() {
        let mut ds = Dataset::new();
        ds.insert(record("a"), vec![Sample::new(at(1, 0), Value::number(1.0))]);
        ds.insert(record("b"), vec![Sample::new(at(1, 0), Value::number(1.0))]);
        let excluded: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let out = ds.without_ids(&excluded);
        assert_eq!(out.ids().collect::<Vec<_>>(), vec!["b"]);
    }
}
