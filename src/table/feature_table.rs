//! Feature rows and the immutable feature table
//!
//! A `FeatureTable` is one contiguous daily grid of nullable feature values
//! for a single subject. It is built once per pipeline run, shared read-only
//! between the analysis stages, and discarded with the session.

use super::schema::{is_canonical_feature, SchemaError, SchemaResult};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where a feature value came from
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Provenance {
    /// Raw metrics this value was computed from
    pub sources: Vec<String>,
    /// Rolling window length, for windowed features
    pub window_days: Option<usize>,
    /// Lag offset, for lagged copies
    pub lag_days: Option<usize>,
    /// True when the value was carried forward over a gap
    pub forward_filled: bool,
}

impl Provenance {
    pub fn raw(source: &str) -> Self {
        Self {
            sources: vec![source.to_string()],
            ..Default::default()
        }
    }

    pub fn derived(sources: &[&str]) -> Self {
        Self {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn windowed(source: &str, window_days: usize) -> Self {
        Self {
            sources: vec![source.to_string()],
            window_days: Some(window_days),
            ..Default::default()
        }
    }

    pub fn lagged(source: &str, lag_days: usize) -> Self {
        Self {
            sources: vec![source.to_string()],
            lag_days: Some(lag_days),
            ..Default::default()
        }
    }

    pub fn filled(mut self) -> Self {
        self.forward_filled = true;
        self
    }
}

/// One day of engineered features
///
/// Values are nullable; a `None` means "not available" and downstream
/// consumers exclude such rows from their samples instead of imputing zero.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    values: BTreeMap<String, Option<f64>>,
    provenance: BTreeMap<String, Provenance>,
}

impl FeatureRow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: BTreeMap::new(),
            provenance: BTreeMap::new(),
        }
    }

    /// Set a feature value with its provenance
    pub fn set(&mut self, name: &str, value: Option<f64>, provenance: Provenance) {
        self.values.insert(name.to_string(), value);
        self.provenance.insert(name.to_string(), provenance);
    }

    /// Get a feature value; `None` for null or absent features
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    /// Whether the feature exists in this row (even as an explicit null)
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Provenance of a feature, if present
    pub fn provenance(&self, name: &str) -> Option<&Provenance> {
        self.provenance.get(name)
    }

    /// Feature names present in this row
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|s| s.as_str())
    }
}

/// Immutable per-session feature table: one row per day, contiguous
#[derive(Debug, Clone, Serialize)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
    columns: BTreeSet<String>,
}

impl FeatureTable {
    /// Build a table from rows, validating the canonical schema and the
    /// one-row-per-day contiguity contract.
    pub fn from_rows(rows: Vec<FeatureRow>) -> SchemaResult<Self> {
        if rows.is_empty() {
            return Err(SchemaError::EmptyInput);
        }

        let mut columns = BTreeSet::new();
        for row in &rows {
            for name in row.feature_names() {
                if !is_canonical_feature(name) {
                    return Err(SchemaError::UnknownFeature {
                        name: name.to_string(),
                    });
                }
                columns.insert(name.to_string());
            }
        }

        for pair in rows.windows(2) {
            if pair[1].date != pair[0].date + Duration::days(1) {
                return Err(SchemaError::NonContiguousRows { date: pair[1].date });
            }
        }

        Ok(Self { rows, columns })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Whether the table carries the column at all
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Column names in deterministic order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|s| s.as_str())
    }

    /// Full column as nullable values, one per row
    pub fn column(&self, name: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.get(name)).collect()
    }

    /// Aligned (a[t], b[t + lag]) pairs where both values are present.
    ///
    /// A positive lag tests whether `a` today is associated with `b` `lag`
    /// days later.
    pub fn aligned_pairs(&self, a: &str, b: &str, lag: usize) -> (Vec<f64>, Vec<f64>) {
        let col_a = self.column(a);
        let col_b = self.column(b);
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        if lag >= col_a.len() {
            return (xs, ys);
        }
        for t in 0..(col_a.len() - lag) {
            if let (Some(x), Some(y)) = (col_a[t], col_b[t + lag]) {
                xs.push(x);
                ys.push(y);
            }
        }
        (xs, ys)
    }

    /// Rows where every listed column is present, as dense vectors.
    /// Returns the value matrix (row-major) and the source row indices.
    pub fn complete_cases(&self, columns: &[String]) -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut matrix = Vec::new();
        let mut indices = Vec::new();
        'rows: for (i, row) in self.rows.iter().enumerate() {
            let mut dense = Vec::with_capacity(columns.len());
            for name in columns {
                match row.get(name) {
                    Some(v) => dense.push(v),
                    None => continue 'rows,
                }
            }
            matrix.push(dense);
            indices.push(i);
        }
        (matrix, indices)
    }
}
