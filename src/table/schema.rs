//! Canonical schema for the feature store
//!
//! The ingestion collaborator resolves heterogeneous source column names to
//! this canonical vocabulary before the core ever sees the data. The core
//! accepts only canonical names; anything else is rejected as a contract
//! violation rather than re-interpreted here.

use chrono::NaiveDate;
use thiserror::Error;

/// Raw per-day metrics the ingestion layer may deliver
pub const RAW_METRICS: &[&str] = &[
    // Sleep
    "sleep_hours",
    "time_in_bed_hours",
    "hrv",
    "rhr",
    // Vitals
    "fg_fast_mgdl",
    "weight",
    "bp_systolic",
    "bp_diastolic",
    // Activity
    "steps",
    "workout_min",
    "hydration_l",
    // Meals (aggregated to the day upstream)
    "carbs_g",
    "protein_g",
    "fat_g",
    "fiber_g",
    "calories",
    "glycemic_index",
    "late_meal",
    "post_meal_walk10",
    "meal_auc",
    "meal_peak",
    "ttpeak_min",
];

/// Features derived by the engineer on top of the raw metrics
pub const DERIVED_FEATURES: &[&str] = &[
    "carbs_pct",
    "protein_pct",
    "fat_pct",
    "glycemic_load",
    "sleep_efficiency",
];

/// Name of the rolling-average feature derived from `base` over `window` days
pub fn rolling_name(base: &str, window: usize) -> String {
    format!("{}_avg{}d", base, window)
}

/// Name of the lagged copy of `base`, shifted back `lag` days
pub fn lag_name(base: &str, lag: usize) -> String {
    format!("{}_lag{}d", base, lag)
}

/// Check whether `name` is a canonical raw metric
pub fn is_canonical_metric(name: &str) -> bool {
    RAW_METRICS.contains(&name)
}

/// Check whether `name` is a valid feature-table column: a raw metric, a
/// derived feature, or a rolling/lag pattern over one of those.
pub fn is_canonical_feature(name: &str) -> bool {
    if is_canonical_metric(name) || DERIVED_FEATURES.contains(&name) {
        return true;
    }
    if let Some((base, suffix)) = name.rsplit_once("_avg") {
        if suffix.ends_with('d') && suffix[..suffix.len() - 1].parse::<usize>().is_ok() {
            return is_canonical_metric(base) || DERIVED_FEATURES.contains(&base);
        }
    }
    if let Some((base, suffix)) = name.rsplit_once("_lag") {
        if suffix.ends_with('d') && suffix[..suffix.len() - 1].parse::<usize>().is_ok() {
            return is_canonical_metric(base) || DERIVED_FEATURES.contains(&base);
        }
    }
    false
}

/// One subject's ordered raw observations for a single metric
///
/// Values may be explicitly marked missing (`None`) rather than omitted, so
/// downstream consumers can distinguish "not measured" from "not delivered".
#[derive(Debug, Clone)]
pub struct MetricSeries {
    name: String,
    points: Vec<(NaiveDate, Option<f64>)>,
}

impl MetricSeries {
    /// Create a validated series. Rejects non-canonical metric names,
    /// duplicate dates, and non-finite values; sorts points by date.
    pub fn new(
        name: impl Into<String>,
        mut points: Vec<(NaiveDate, Option<f64>)>,
    ) -> SchemaResult<Self> {
        let name = name.into();
        if !is_canonical_metric(&name) {
            return Err(SchemaError::UnknownMetric { name });
        }

        points.sort_by_key(|(date, _)| *date);
        for window in points.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(SchemaError::DuplicateDate {
                    metric: name,
                    date: window[0].0,
                });
            }
        }
        for (date, value) in &points {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(SchemaError::NonFiniteValue {
                        metric: name,
                        date: *date,
                    });
                }
            }
        }

        Ok(Self { name, points })
    }

    /// Metric name (canonical)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered observations
    pub fn points(&self) -> &[(NaiveDate, Option<f64>)] {
        &self.points
    }

    /// First observation date, if any
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|(d, _)| *d)
    }

    /// Last observation date, if any
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|(d, _)| *d)
    }
}

/// Contract violations at the ingestion boundary. These are fatal: the
/// pipeline rejects the input instead of degrading.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Metric name outside the canonical vocabulary
    #[error("Unknown metric: {name} (not in the canonical schema)")]
    UnknownMetric { name: String },

    /// Feature column outside the canonical vocabulary
    #[error("Unknown feature column: {name}")]
    UnknownFeature { name: String },

    /// Two observations for the same (metric, date)
    #[error("Duplicate date {date} for metric {metric}")]
    DuplicateDate { metric: String, date: NaiveDate },

    /// NaN or infinite value delivered as an observation
    #[error("Non-finite value for metric {metric} on {date}")]
    NonFiniteValue { metric: String, date: NaiveDate },

    /// Feature rows are not one-per-day over a contiguous range
    #[error("Feature rows must be contiguous daily: gap before {date}")]
    NonContiguousRows { date: NaiveDate },

    /// No usable input streams
    #[error("No input streams with observations")]
    EmptyInput,
}

/// Result type alias for schema validation
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let err = MetricSeries::new("heart_ratee", vec![(d(1), Some(60.0))]).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownMetric { .. }));
    }

    #[test]
    fn test_duplicate_date_rejected() {
        let err =
            MetricSeries::new("hrv", vec![(d(1), Some(45.0)), (d(1), Some(50.0))]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateDate { .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = MetricSeries::new("hrv", vec![(d(1), Some(f64::NAN))]).unwrap_err();
        assert!(matches!(err, SchemaError::NonFiniteValue { .. }));
    }

    #[test]
    fn test_points_sorted_on_construction() {
        let series =
            MetricSeries::new("hrv", vec![(d(3), Some(40.0)), (d(1), Some(45.0))]).unwrap();
        assert_eq!(series.first_date(), Some(d(1)));
        assert_eq!(series.last_date(), Some(d(3)));
    }

    #[test]
    fn test_explicit_missing_allowed() {
        let series = MetricSeries::new("sleep_hours", vec![(d(1), None)]).unwrap();
        assert_eq!(series.points()[0].1, None);
    }

    #[test]
    fn test_canonical_feature_patterns() {
        assert!(is_canonical_feature("sleep_hours"));
        assert!(is_canonical_feature("carbs_pct"));
        assert!(is_canonical_feature("hrv_avg7d"));
        assert!(is_canonical_feature("sleep_hours_lag1d"));
        assert!(!is_canonical_feature("mood"));
        assert!(!is_canonical_feature("mood_avg7d"));
        assert!(!is_canonical_feature("hrv_avgXd"));
    }
}
