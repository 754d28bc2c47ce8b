//! Concurrent multi-metric aggregation.
//!
//! A [`MetricBundle`] names a set of [`MetricHandler`]s plus the ratios derived from them.
//! [`fetch_bundle`] runs every handler concurrently, pivots their per-bucket outputs into one row
//! per bucket key, adds a `Total` row and fills in the derived ratios.

pub mod bundles;
pub mod derive;
pub mod engine;
pub mod handler;
pub mod merge;
pub mod value;

pub use derive::{DerivedKind, DerivedMetric};
pub use engine::{MetricBundle, fetch_bundle};
pub use handler::{
	CardinalityHandler, DocCountHandler, MetricHandler, MetricTable, PresentFieldHandler,
};
pub use merge::{MergedStats, RawMetricTable, StatsRow};
pub use value::{NOT_AVAILABLE, StatValue};
