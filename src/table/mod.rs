//! Feature Store
//!
//! The typed, immutable tabular structure consumed by every analysis stage:
//! - [`schema`]: canonical metric names and the input boundary contract
//! - [`feature_table`]: `FeatureRow` / `FeatureTable` with provenance
//! - [`engineer`]: derives the feature table from aligned raw streams

mod engineer;
mod feature_table;
mod schema;

pub use engineer::FeatureEngineer;
pub use feature_table::{FeatureRow, FeatureTable, Provenance};
pub use schema::{
    is_canonical_feature, is_canonical_metric, lag_name, rolling_name, MetricSeries, SchemaError,
    SchemaResult, DERIVED_FEATURES, RAW_METRICS,
};
