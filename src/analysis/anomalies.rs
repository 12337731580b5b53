//! Anomaly Detection
//!
//! Rolling median/MAD outlier scoring over the configured vital metrics.
//! Each observation is scored against the trailing window that ends the day
//! before it, so an anomalous day never dampens its own baseline. Runs of
//! consecutive anomalies escalate severity: a sustained shift is more
//! interesting than one bad reading.

use crate::config::AnalysisConfig;
use crate::stats::{median, median_abs_deviation};
use crate::table::FeatureTable;
use chrono::NaiveDate;
use serde::Serialize;

/// Detects deviations from each metric's recent baseline
pub struct AnomalyDetector {
    config: AnalysisConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    Severe,
}

/// One flagged observation
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub metric: String,
    pub date: NaiveDate,
    /// Observed value
    pub value: f64,
    /// Trailing-window median the value was compared against
    pub baseline_median: f64,
    /// Robust z-score: |value - median| / (1.4826 * MAD)
    pub score: f64,
    pub severity: Severity,
    /// Consecutive anomalous observations ending here, this metric
    pub streak: usize,
    /// True when severity was raised by a sustained streak
    pub escalated: bool,
}

/// All anomalies from one run
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    /// Records in (metric, date) order
    pub records: Vec<AnomalyRecord>,
    /// Observations that had a qualifying baseline window and were scored
    pub observations_scored: usize,
}

impl AnomalyDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Scan every configured metric present in the table
    pub fn analyze(&self, table: &FeatureTable) -> AnomalyReport {
        let mut records = Vec::new();
        let mut observations_scored = 0;

        for metric in &self.config.anomaly_metrics {
            if !table.has_column(metric) {
                continue;
            }
            let (metric_records, scored) = self.scan_metric(table, metric);
            observations_scored += scored;
            records.extend(metric_records);
        }

        tracing::debug!(
            scored = observations_scored,
            flagged = records.len(),
            "Anomaly scan complete"
        );

        AnomalyReport {
            records,
            observations_scored,
        }
    }

    /// Score one metric's column; returns (records, observations scored)
    fn scan_metric(&self, table: &FeatureTable, metric: &str) -> (Vec<AnomalyRecord>, usize) {
        let column = table.column(metric);
        let dates = table.dates();
        let mut records = Vec::new();
        let mut scored = 0;
        let mut streak = 0_usize;

        for (i, value) in column.iter().enumerate() {
            let Some(value) = value else {
                // A gap breaks a run of anomalies
                streak = 0;
                continue;
            };

            // Trailing window over present values, excluding today
            let window_start = i.saturating_sub(self.config.anomaly_window);
            let window: Vec<f64> = column[window_start..i]
                .iter()
                .filter_map(|v| *v)
                .collect();
            if window.len() < self.config.anomaly_min_periods {
                streak = 0;
                continue;
            }
            scored += 1;

            let baseline = median(&window);
            let mad = median_abs_deviation(&window).max(self.config.mad_epsilon);
            let score = (value - baseline).abs() / (self.config.mad_scale * mad);

            if score < self.config.moderate_threshold {
                streak = 0;
                continue;
            }
            streak += 1;

            let mut severity = if score >= self.config.severe_threshold {
                Severity::Severe
            } else {
                Severity::Moderate
            };
            let escalated =
                severity == Severity::Moderate && streak >= self.config.streak_escalation;
            if escalated {
                severity = Severity::Severe;
            }

            records.push(AnomalyRecord {
                metric: metric.to_string(),
                date: dates[i],
                value: *value,
                baseline_median: baseline,
                score,
                severity,
                streak,
                escalated,
            });
        }

        (records, scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureRow, FeatureTable, Provenance};

    fn table_for(metric: &str, values: &[Option<f64>]) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                row.set(metric, *v, Provenance::raw(metric));
                row
            })
            .collect();
        FeatureTable::from_rows(rows).unwrap()
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnalysisConfig::default())
    }

    #[test]
    fn test_single_spike_is_one_severe_record() {
        // Stable baseline with mild wobble, then one 10-sigma-ish spike
        let mut values: Vec<Option<f64>> = (0..20)
            .map(|i| Some(60.0 + (i % 3) as f64))
            .collect();
        values[15] = Some(120.0);
        let table = table_for("rhr", &values);

        let report = detector().analyze(&table);
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.metric, "rhr");
        assert_eq!(record.severity, Severity::Severe);
        assert_eq!(record.streak, 1);
        assert!(!record.escalated);
        assert!(record.score >= 3.0);
        assert_eq!(
            record.date,
            NaiveDate::from_ymd_opt(2024, 5, 16).unwrap()
        );
    }

    #[test]
    fn test_constant_series_yields_nothing() {
        let values: Vec<Option<f64>> = vec![Some(7.0); 25];
        let report = detector().analyze(&table_for("sleep_hours", &values));
        assert!(report.records.is_empty());
        assert!(report.observations_scored > 0);
    }

    #[test]
    fn test_warmup_not_scored() {
        // Fewer observations than min periods: nothing qualifies
        let values: Vec<Option<f64>> = (0..6).map(|i| Some(i as f64)).collect();
        let report = detector().analyze(&table_for("hrv", &values));
        assert_eq!(report.observations_scored, 0);
        assert!(report.records.is_empty());
    }

    #[test]
    fn test_streak_escalates_moderate_run() {
        // Long window so a few shifted days barely move the baseline:
        // 30 days of 90..96 wobble (median 93, MAD 2), then a sustained
        // +2.5 scaled-MAD shift
        let mut values: Vec<Option<f64>> = (0..30)
            .map(|i| Some(90.0 + (i % 7) as f64))
            .collect();
        let shift = 93.0 + 2.5 * 1.4826 * 2.0;
        for _ in 0..4 {
            values.push(Some(shift));
        }
        let table = table_for("fg_fast_mgdl", &values);

        let mut cfg = AnalysisConfig::default();
        cfg.anomaly_window = 30;
        let report = AnomalyDetector::new(cfg).analyze(&table);
        let flagged: Vec<&AnomalyRecord> = report
            .records
            .iter()
            .filter(|r| r.metric == "fg_fast_mgdl")
            .collect();
        assert!(flagged.len() >= 3);
        // The third consecutive anomaly is escalated to severe
        let third = flagged.iter().find(|r| r.streak == 3).unwrap();
        assert!(third.escalated);
        assert_eq!(third.severity, Severity::Severe);
        // The first of the run stays moderate
        let first = flagged.iter().find(|r| r.streak == 1).unwrap();
        assert_eq!(first.severity, Severity::Moderate);
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut values: Vec<Option<f64>> = (0..14).map(|i| Some(50.0 + (i % 3) as f64)).collect();
        values.push(Some(80.0)); // anomaly, streak 1
        values.push(None); // gap
        values.push(Some(80.0)); // anomaly again, streak restarts at 1
        let table = table_for("hrv", &values);

        let report = detector().analyze(&table);
        assert!(report.records.iter().all(|r| r.streak == 1));
    }

    #[test]
    fn test_unknown_metric_skipped() {
        let values: Vec<Option<f64>> = vec![Some(1.0); 25];
        // Table only has steps; detector config asks for vitals
        let table = table_for("steps", &values);
        let report = detector().analyze(&table);
        assert_eq!(report.observations_scored, 0);
    }
}
