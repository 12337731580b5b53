//! Feature Engineer
//!
//! Turns aligned raw metric streams into the per-day feature table: macro
//! ratios, a glycemic-load proxy, sleep efficiency, rolling averages, and
//! lagged copies. Rebuilding from the same raw inputs always yields the same
//! table; nothing here mutates between runs.

use super::feature_table::{FeatureRow, FeatureTable, Provenance};
use super::schema::{lag_name, rolling_name, MetricSeries, SchemaError, SchemaResult};
use crate::config::AnalysisConfig;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

/// Derives the feature table from raw streams for one subject
pub struct FeatureEngineer {
    config: AnalysisConfig,
}

impl FeatureEngineer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Build the feature table over the full date range covered by `streams`.
    ///
    /// Missing-value policy: raw gaps are forward-filled up to
    /// `forward_fill_limit_days`. Filled values feed the rolling and lag
    /// features; same-day derived features (ratios, sleep efficiency) use
    /// observed values only, so a carried-forward input never forms a
    /// ratio against a fresh one. Beyond the gap bound the value is null
    /// everywhere.
    pub fn build(&self, streams: &[MetricSeries]) -> SchemaResult<FeatureTable> {
        let (start, end) = date_range(streams).ok_or(SchemaError::EmptyInput)?;
        let n_days = (end - start).num_days() as usize + 1;

        // Raw columns on the daily grid, forward-filled within the gap bound
        let mut columns: BTreeMap<String, Vec<(Option<f64>, bool)>> = BTreeMap::new();
        for series in streams {
            let column = self.grid_column(series, start, n_days);
            columns.insert(series.name().to_string(), column);
        }

        tracing::debug!(
            days = n_days,
            metrics = columns.len(),
            "Building feature table"
        );

        let mut rows: Vec<FeatureRow> = (0..n_days)
            .map(|i| FeatureRow::new(start + Duration::days(i as i64)))
            .collect();

        for (name, column) in &columns {
            for (i, (value, filled)) in column.iter().enumerate() {
                let prov = if *filled {
                    Provenance::raw(name).filled()
                } else {
                    Provenance::raw(name)
                };
                rows[i].set(name, *value, prov);
            }
        }

        self.add_derived(&mut rows, &columns);
        self.add_rolling(&mut rows, &columns);
        self.add_lags(&mut rows, &columns);

        FeatureTable::from_rows(rows)
    }

    /// Project one series onto the daily grid, forward-filling bounded gaps
    fn grid_column(
        &self,
        series: &MetricSeries,
        start: NaiveDate,
        n_days: usize,
    ) -> Vec<(Option<f64>, bool)> {
        let mut observed: Vec<Option<f64>> = vec![None; n_days];
        for (date, value) in series.points() {
            let idx = (*date - start).num_days();
            if idx >= 0 && (idx as usize) < n_days {
                observed[idx as usize] = *value;
            }
        }

        let limit = self.config.forward_fill_limit_days;
        let mut column = Vec::with_capacity(n_days);
        let mut last: Option<f64> = None;
        let mut gap = 0usize;
        for value in observed {
            match value {
                Some(v) => {
                    last = Some(v);
                    gap = 0;
                    column.push((Some(v), false));
                }
                None => {
                    gap += 1;
                    if gap <= limit {
                        column.push((last, last.is_some()));
                    } else {
                        column.push((None, false));
                    }
                }
            }
        }
        column
    }

    /// Macro ratios, glycemic load, sleep efficiency
    fn add_derived(
        &self,
        rows: &mut [FeatureRow],
        columns: &BTreeMap<String, Vec<(Option<f64>, bool)>>,
    ) {
        // Observed values only; a forward-filled input counts as absent here
        let get = |name: &str, i: usize| -> Option<f64> {
            columns.get(name).and_then(|c| {
                let (value, filled) = c[i];
                if filled {
                    None
                } else {
                    value
                }
            })
        };

        for (i, row) in rows.iter_mut().enumerate() {
            let carbs = get("carbs_g", i);
            let protein = get("protein_g", i);
            let fat = get("fat_g", i);
            let macros = Provenance::derived(&["carbs_g", "protein_g", "fat_g"]);

            let total = match (carbs, protein, fat) {
                (Some(c), Some(p), Some(f)) if c + p + f > 0.0 => Some(c + p + f),
                _ => None,
            };
            row.set("carbs_pct", total.map(|t| carbs.unwrap() / t), macros.clone());
            row.set(
                "protein_pct",
                total.map(|t| protein.unwrap() / t),
                macros.clone(),
            );
            row.set("fat_pct", total.map(|t| fat.unwrap() / t), macros);

            // Carbs weighted by glycemic index when available, raw carbs
            // otherwise
            let load = match (carbs, get("glycemic_index", i)) {
                (Some(c), Some(gi)) => Some(c * gi / 100.0),
                (Some(c), None) => Some(c),
                _ => None,
            };
            row.set(
                "glycemic_load",
                load,
                Provenance::derived(&["carbs_g", "glycemic_index"]),
            );

            // Duration over time-in-bed when both present, pass-through
            // duration otherwise
            let efficiency = match (get("sleep_hours", i), get("time_in_bed_hours", i)) {
                (Some(s), Some(t)) if t > 0.0 => Some(s / t),
                (Some(s), _) => Some(s),
                _ => None,
            };
            row.set(
                "sleep_efficiency",
                efficiency,
                Provenance::derived(&["sleep_hours", "time_in_bed_hours"]),
            );
        }
    }

    /// Trailing rolling averages per raw metric. Windows with insufficient
    /// history produce null unless `allow_partial_windows` is set.
    fn add_rolling(
        &self,
        rows: &mut [FeatureRow],
        columns: &BTreeMap<String, Vec<(Option<f64>, bool)>>,
    ) {
        for window in self.config.rolling_windows.clone() {
            for (name, column) in columns {
                let feature = rolling_name(name, window);
                for i in 0..rows.len() {
                    let lo = (i + 1).saturating_sub(window);
                    let values: Vec<f64> =
                        column[lo..=i].iter().filter_map(|(v, _)| *v).collect();

                    let complete = i + 1 >= window && values.len() == window;
                    let value = if complete {
                        Some(values.iter().sum::<f64>() / window as f64)
                    } else if self.config.allow_partial_windows && values.len() >= 2 {
                        Some(values.iter().sum::<f64>() / values.len() as f64)
                    } else {
                        None
                    };
                    rows[i].set(&feature, value, Provenance::windowed(name, window));
                }
            }
        }
    }

    /// Lagged copies k = 1..=max_lag of each raw metric (k = 0 is the metric
    /// itself)
    fn add_lags(
        &self,
        rows: &mut [FeatureRow],
        columns: &BTreeMap<String, Vec<(Option<f64>, bool)>>,
    ) {
        for lag in 1..=self.config.max_lag_days {
            for (name, column) in columns {
                let feature = lag_name(name, lag);
                for i in 0..rows.len() {
                    let value = if i >= lag { column[i - lag].0 } else { None };
                    rows[i].set(&feature, value, Provenance::lagged(name, lag));
                }
            }
        }
    }
}

fn date_range(streams: &[MetricSeries]) -> Option<(NaiveDate, NaiveDate)> {
    let start = streams.iter().filter_map(|s| s.first_date()).min()?;
    let end = streams.iter().filter_map(|s| s.last_date()).max()?;
    Some((start, end))
}
