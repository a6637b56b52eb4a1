//! Capability interfaces of the time-series engine.
//!
//! Derivations in `aqm-data` are written against these traits rather than
//! against [`crate::Dataset`] directly, so any engine providing them can be
//! plugged into the pipeline.

use chrono::{DateTime, Utc};

/// Sets of per-entity time series that can be restricted to a time range.
pub trait TimeFilterable: Sized {
    /// Sorted, de-duplicated instants of every sample. Empty when no source
    /// ever reported a timestamp.
    fn timestamps(&self) -> Vec<DateTime<Utc>>;

    /// Keep only samples in `[start, end]` inclusive. Entities are kept even
    /// if their series becomes empty; see [`SeriesCollection::drop_empty`].
    fn filter_by_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self;

    fn has_time_axis(&self) -> bool {
        !self.timestamps().is_empty()
    }
}

/// Uniquely keyed entity collections that can be merged and pruned.
pub trait SeriesCollection: Sized + Clone {
    /// Number of entities.
    fn count(&self) -> usize;

    /// Remove entities without a single present sample.
    fn drop_empty(&self) -> Self;

    /// Union by id. On collision the entity from `other` wins.
    fn combine(&self, other: &Self) -> Self;

    /// True when no entity has a present sample.
    fn is_empty(&self) -> bool {
        self.drop_empty().count() == 0
    }
}
