//! Core types, decoders and upstream feed client for live air quality and
//! fire monitoring data.
//!
//! Every upstream shape (delimited text, nested JSON, geobuf point clouds)
//! is reconciled here into one [`dataset::Dataset`]. Nothing downstream of
//! a decoder ever sees upstream property names, DMS coordinates or
//! empty-string numbers.

pub mod capability;
pub mod compression;
pub mod dataset;
pub mod error;
pub mod features;
pub mod geojson;
pub mod nested_json;
pub mod point_cloud;
pub mod record;
pub mod sources;
pub mod tabular;
pub mod value;
pub mod window;

#[cfg(feature = "api")]
pub mod transport;

pub use dataset::Dataset;
pub use error::{FeedError, Result};
pub use record::{Location, Sample, SourceRecord};
pub use value::{Scalar, Value};
pub use window::TimeWindow;
