//! Pure derivations over monitoring datasets.
//!
//! Everything here is synchronous and side-effect free: time-window
//! subsetting, multi-source combination, GeoJSON materialization and status
//! text. The reactive layer calls these from derived nodes.

pub mod materialize;

pub use materialize::{materialize, GeoJsonEmittable, Profile};

/// Errors raised by derivations.
pub mod error {
    use aqm_feeds::window::WindowError;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum PipelineError {
        #[error("invalid time window: {0}")]
        InvalidWindow(#[from] WindowError),

        #[error("internal error: {0}")]
        Internal(String),
    }
}

/// Time-window subsetting.
pub mod subset {
    use crate::error::PipelineError;
    use aqm_feeds::capability::{SeriesCollection, TimeFilterable};
    use aqm_feeds::TimeWindow;
    use chrono::{DateTime, Utc};
    use log::debug;

    /// Restrict a dataset to a time window.
    ///
    /// Returns `Ok(None)` for the benign no-data cases: the dataset has no
    /// time axis at all, or nothing is left inside the window. Entities
    /// whose series end up empty are pruned. A window that cannot be
    /// resolved is an error.
    ///
    /// `now` stands in for the window end when the window has none.
    pub fn subset<D>(dataset: &D, window: &TimeWindow, now: DateTime<Utc>) -> Result<Option<D>, PipelineError>
    where
        D: TimeFilterable + SeriesCollection,
    {
        if !dataset.has_time_axis() {
            debug!("subset: dataset has no time axis");
            return Ok(None);
        }
        let filtered = match window.bounds(now)? {
            None => dataset.clone(),
            Some((start, end)) => {
                if start > end {
                    return Err(PipelineError::Internal(format!(
                        "window start {} is after end {}",
                        start, end
                    )));
                }
                dataset.filter_by_time(start, end)
            }
        };
        let pruned = filtered.drop_empty();
        if pruned.count() == 0 {
            debug!("subset: no data in window");
            return Ok(None);
        }
        Ok(Some(pruned))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::test_support::{dataset, hour};
        use aqm_feeds::window::MAX_LOOKBACK_DAYS;
        use aqm_feeds::Dataset;
        use chrono::NaiveDate;

        fn july(day: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
        }

        #[test]
        fn test_pass_through_equals_pruned_input() {
            let d = dataset(&[("a", &[(1, Some(1.0)), (30, Some(2.0))]), ("b", &[(2, None)])]);
            let out = subset(&d, &TimeWindow::pass_through(), hour(0)).unwrap().unwrap();
            assert_eq!(out, d.drop_empty());
            assert_eq!(out.count(), 1);
        }

        #[test]
        fn test_window_is_inclusive_and_day_floored() {
            // hour(0) is 2024-07-01T00:00Z
            let d = dataset(&[
                ("early", &[(0, Some(1.0))]),
                ("inside", &[(24, Some(2.0)), (24 * 3 + 23, Some(3.0))]),
            ]);
            let window = TimeWindow::ending_on(july(4), 3);
            let out = subset(&d, &window, hour(0)).unwrap().unwrap();
            assert!(!out.contains("early"));
            assert_eq!(out.samples("inside").len(), 2);
        }

        #[test]
        fn test_data_before_window_is_none_not_error() {
            let d = dataset(&[("a", &[(0, Some(1.0))])]);
            let window = TimeWindow::ending_on(july(20), 2);
            assert_eq!(subset(&d, &window, hour(0)).unwrap(), None);
        }

        #[test]
        fn test_no_time_axis_is_none() {
            let mut d = Dataset::new();
            d.insert(aqm_feeds::SourceRecord::at("fire", -120.0, 38.0).unwrap(), Vec::new());
            assert_eq!(subset(&d, &TimeWindow::new(None, 3), hour(0)).unwrap(), None);
        }

        #[test]
        fn test_bad_window_is_error() {
            let d = dataset(&[("a", &[(0, Some(1.0))])]);
            let window = TimeWindow::new(None, MAX_LOOKBACK_DAYS + 1);
            assert!(matches!(
                subset(&d, &window, hour(0)),
                Err(PipelineError::InvalidWindow(_))
            ));
        }
    }
}

/// Multi-source combination.
pub mod combine {
    use aqm_feeds::capability::SeriesCollection;

    /// Union of entities by id across `datasets`, in the order given.
    ///
    /// On an id collision the later input wins: its record and its whole
    /// series replace the earlier one. Entities without a present sample
    /// are dropped from the result.
    pub fn combine<'a, D, I>(datasets: I) -> D
    where
        D: SeriesCollection + Default + 'a,
        I: IntoIterator<Item = &'a D>,
    {
        datasets
            .into_iter()
            .fold(D::default(), |acc, next| acc.combine(next))
            .drop_empty()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::test_support::dataset;
        use aqm_feeds::Dataset;

        #[test]
        fn test_identity() {
            let d = dataset(&[("a", &[(1, Some(1.0))]), ("b", &[(1, None)])]);
            let out: Dataset = combine([&d]);
            assert_eq!(out, d.drop_empty());
        }

        #[test]
        fn test_disjoint_sizes_add() {
            let d1 = dataset(&[("a", &[(1, Some(1.0))]), ("b", &[(1, Some(2.0))])]);
            let d2 = dataset(&[("c", &[(1, Some(3.0))])]);
            let out: Dataset = combine([&d1, &d2]);
            assert_eq!(out.count(), d1.count() + d2.count());
        }

        #[test]
        fn test_last_input_wins_on_collision() {
            let d1 = dataset(&[("a", &[(1, Some(1.0)), (2, Some(1.5))])]);
            let d2 = dataset(&[("a", &[(3, Some(9.0))])]);
            let out: Dataset = combine([&d1, &d2]);
            assert_eq!(out.samples("a").len(), 1);
            assert_eq!(out.samples("a")[0].value.as_number(), Some(9.0));
            let reversed: Dataset = combine([&d2, &d1]);
            assert_eq!(reversed.samples("a").len(), 2);
        }

        #[test]
        fn test_empty_input() {
            let out: Dataset = combine(std::iter::empty::<&Dataset>());
            assert_eq!(out.count(), 0);
        }
    }
}

/// User-facing status summaries.
pub mod status {
    use aqm_utils::text::format_list;
    use serde::Serialize;

    /// Per-label counts in a fixed enumeration order.
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct StatusCounts {
        entries: Vec<(String, usize)>,
    }

    impl StatusCounts {
        pub fn new() -> Self {
            StatusCounts::default()
        }

        /// Set the count for a label. A new label goes to the end; an
        /// existing one keeps its position.
        pub fn set(&mut self, label: &str, count: usize) {
            match self.entries.iter_mut().find(|(l, _)| l == label) {
                Some(entry) => entry.1 = count,
                None => self.entries.push((label.to_string(), count)),
            }
        }

        pub fn with(mut self, label: &str, count: usize) -> Self {
            self.set(label, count);
            self
        }

        pub fn get(&self, label: &str) -> Option<usize> {
            self.entries.iter().find(|(l, _)| l == label).map(|(_, c)| *c)
        }

        pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
            self.entries.iter().map(|(l, c)| (l.as_str(), *c))
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct StatusText {
        pub loaded: String,
        pub waiting: String,
    }

    /// `"Loaded 123 monitors and 45 purpleair"` plus `"Waiting for
    /// HMS fires data..."`. Either string is empty when it has nothing to
    /// list.
    pub fn summarize(counts: &StatusCounts) -> StatusText {
        let loaded: Vec<String> = counts
            .iter()
            .filter(|(_, c)| *c > 0)
            .map(|(label, c)| format!("{} {}", c, label))
            .collect();
        let waiting: Vec<String> = counts
            .iter()
            .filter(|(_, c)| *c == 0)
            .map(|(label, _)| format!("{} data", label))
            .collect();
        StatusText {
            loaded: if loaded.is_empty() {
                String::new()
            } else {
                format!("Loaded {}", format_list(&loaded))
            },
            waiting: if waiting.is_empty() {
                String::new()
            } else {
                format!("Waiting for {}...", format_list(&waiting))
            },
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_summarize_example() {
            let counts = StatusCounts::new().with("monitors", 123).with("purpleair", 0);
            let text = summarize(&counts);
            assert_eq!(text.loaded, "Loaded 123 monitors");
            assert_eq!(text.waiting, "Waiting for purpleair data...");
        }

        #[test]
        fn test_summarize_lists_and_empties() {
            let counts = StatusCounts::new()
                .with("monitors", 10)
                .with("purpleair", 20)
                .with("CalFire fires", 3);
            let text = summarize(&counts);
            assert_eq!(text.loaded, "Loaded 10 monitors, 20 purpleair, and 3 CalFire fires");
            assert_eq!(text.waiting, "");
            assert_eq!(summarize(&StatusCounts::new()), StatusText::default());
        }

        #[test]
        fn test_order_is_stable() {
            let mut counts = StatusCounts::new().with("b", 0).with("a", 0);
            counts.set("b", 0);
            assert_eq!(summarize(&counts).waiting, "Waiting for b data and a data...");
            assert_eq!(counts.get("a"), Some(0));
        }
    }
}

pub use combine::combine;
pub use error::PipelineError;
pub use status::{summarize, StatusCounts, StatusText};
pub use subset::subset;

#[cfg(test)]
pub(crate) mod test_support {
    use aqm_feeds::{Dataset, Sample, SourceRecord, Value};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    /// 2024-07-01T00:00Z plus `h` hours.
    pub fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    /// Build a dataset from `(id, [(hour, value)])`; `None` values are absent.
    pub fn dataset(entries: &[(&str, &[(i64, Option<f64>)])]) -> Dataset {
        let mut d = Dataset::new();
        for (i, (id, samples)) in entries.iter().enumerate() {
            let record = SourceRecord::at(*id, -120.0 + i as f64, 38.0).unwrap();
            let samples = samples
                .iter()
                .map(|(h, v)| Sample::new(hour(*h), v.map(Value::number).unwrap_or(Value::Absent)))
                .collect();
            d.insert(record, samples);
        }
        d
    }
}
