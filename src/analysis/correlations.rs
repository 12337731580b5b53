//! Correlation Engine
//!
//! Scans every candidate metric pair over a bounded lag range, selects
//! Pearson or Spearman per pair from a normality gate, applies a
//! Benjamini-Hochberg correction across the whole run, and reports
//! Fisher-z confidence intervals. The strongest lag per pair is primary;
//! jointly significant lags are retained as secondary evidence.

use crate::config::AnalysisConfig;
use crate::stats::{
    benjamini_hochberg, correlation_p_value, fisher_z_interval, looks_normal,
    pearson_correlation, spearman_correlation,
};
use crate::table::FeatureTable;
use serde::Serialize;
use std::collections::HashMap;

/// Calculates lagged correlations between metric pairs
pub struct CorrelationEngine {
    config: AnalysisConfig,
}

/// Coefficient family reported for one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

/// A significant lagged correlation between two metrics
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    /// First metric name
    pub metric_a: String,
    /// Second metric name
    pub metric_b: String,
    /// `metric_a` on day t is tested against `metric_b` on day t + lag
    pub lag_days: usize,
    /// Selected coefficient (-1 to 1)
    pub coefficient: f64,
    /// Which coefficient was selected by the normality gate
    pub method: CorrelationMethod,
    /// Spearman rho, always retained as the documented fallback
    pub spearman_rho: f64,
    /// Raw two-sided p-value of the selected coefficient
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value across the whole run
    pub adjusted_p_value: f64,
    /// Fisher z-transform confidence interval
    pub confidence_interval: (f64, f64),
    /// Interval construction method, stated for the consumer
    pub ci_method: &'static str,
    /// Number of aligned observations used
    pub sample_size: usize,
    /// True for the largest-|coefficient| lag of its pair
    pub primary: bool,
}

/// All significant correlations from one run
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    /// Significant results, strongest first
    pub results: Vec<CorrelationResult>,
    /// Number of (pair, lag) hypotheses entered into the BH family
    pub hypotheses_tested: usize,
}

/// One hypothesis before adjustment
struct Candidate {
    metric_a: String,
    metric_b: String,
    lag_days: usize,
    coefficient: f64,
    method: CorrelationMethod,
    spearman_rho: f64,
    p_value: f64,
    sample_size: usize,
}

impl CorrelationEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Scan all configured metric pairs and lags over the table.
    ///
    /// Pairs below the minimum sample size are suppressed before testing,
    /// so they never enter the BH family.
    pub fn analyze(&self, table: &FeatureTable) -> CorrelationReport {
        let metrics: Vec<&String> = self
            .config
            .correlation_metrics
            .iter()
            .filter(|m| table.has_column(m))
            .collect();

        let mut candidates = Vec::new();
        for i in 0..metrics.len() {
            for j in (i + 1)..metrics.len() {
                for lag in 0..=self.config.max_lag_days {
                    if let Some(candidate) =
                        self.test_pair(table, metrics[i], metrics[j], lag)
                    {
                        candidates.push(candidate);
                    }
                    // Lagged association is directional; also test b -> a
                    if lag > 0 {
                        if let Some(candidate) =
                            self.test_pair(table, metrics[j], metrics[i], lag)
                        {
                            candidates.push(candidate);
                        }
                    }
                }
            }
        }

        let hypotheses_tested = candidates.len();
        let p_values: Vec<f64> = candidates.iter().map(|c| c.p_value).collect();
        let adjusted = benjamini_hochberg(&p_values);

        let mut results: Vec<CorrelationResult> = candidates
            .into_iter()
            .zip(adjusted)
            .filter(|(_, adj)| *adj <= self.config.alpha)
            .map(|(c, adj)| CorrelationResult {
                confidence_interval: fisher_z_interval(
                    c.coefficient,
                    c.sample_size,
                    self.config.alpha,
                ),
                ci_method: "fisher-z",
                metric_a: c.metric_a,
                metric_b: c.metric_b,
                lag_days: c.lag_days,
                coefficient: c.coefficient,
                method: c.method,
                spearman_rho: c.spearman_rho,
                p_value: c.p_value,
                adjusted_p_value: adj,
                sample_size: c.sample_size,
                primary: false,
            })
            .collect();

        mark_primary_lags(&mut results);

        // Strongest first; deterministic tie-break on the pair key
        results.sort_by(|a, b| {
            b.coefficient
                .abs()
                .partial_cmp(&a.coefficient.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pair_key(a).cmp(&pair_key(b)))
        });

        tracing::debug!(
            tested = hypotheses_tested,
            significant = results.len(),
            "Correlation scan complete"
        );

        CorrelationReport {
            results,
            hypotheses_tested,
        }
    }

    /// Test one (pair, lag) hypothesis; `None` when below the sample gate
    fn test_pair(
        &self,
        table: &FeatureTable,
        a: &str,
        b: &str,
        lag: usize,
    ) -> Option<Candidate> {
        let (xs, ys) = table.aligned_pairs(a, b, lag);
        if xs.len() < self.config.correlation_min_samples {
            return None;
        }

        let rho = spearman_correlation(&xs, &ys);
        let (coefficient, method) = if looks_normal(&xs) && looks_normal(&ys) {
            (pearson_correlation(&xs, &ys), CorrelationMethod::Pearson)
        } else {
            (rho, CorrelationMethod::Spearman)
        };
        if coefficient.is_nan() {
            return None;
        }

        Some(Candidate {
            metric_a: a.to_string(),
            metric_b: b.to_string(),
            lag_days: lag,
            coefficient,
            method,
            spearman_rho: rho,
            p_value: correlation_p_value(coefficient, xs.len()),
            sample_size: xs.len(),
        })
    }
}

fn pair_key(r: &CorrelationResult) -> (String, String, usize) {
    (r.metric_a.clone(), r.metric_b.clone(), r.lag_days)
}

/// Within each directed pair, flag the largest-|coefficient| lag as primary
fn mark_primary_lags(results: &mut [CorrelationResult]) {
    let mut best: HashMap<(String, String), (usize, f64)> = HashMap::new();
    for (idx, r) in results.iter().enumerate() {
        let key = (r.metric_a.clone(), r.metric_b.clone());
        let entry = best.entry(key).or_insert((idx, r.coefficient.abs()));
        if r.coefficient.abs() > entry.1 {
            *entry = (idx, r.coefficient.abs());
        }
    }
    for (idx, _) in best.values() {
        results[*idx].primary = true;
    }
}
