//! Causal Effect Estimation
//!
//! Doubly robust (AIPW) average treatment effect estimation for a small set
//! of predefined exposure/outcome questions:
//! - logistic propensity model over the query's covariates
//! - per-arm linear outcome models
//! - influence-value combination, so either model being right suffices
//! - seeded percentile bootstrap refitting both models per replicate
//!
//! Estimates are gated on sample size, per-arm counts, and post-weighting
//! covariate balance; a failed gate degrades to an [`Outcome`] variant
//! instead of an error.

use super::{AnalysisError, Outcome};
use crate::config::AnalysisConfig;
use crate::stats::{
    fit_linear, fit_logistic, mean, percentile, std_dev,
};
use crate::table::FeatureTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// How a raw column is dichotomized into exposed / unexposed days
#[derive(Debug, Clone, Serialize)]
pub enum ExposureSpec {
    /// Exposed when the column is strictly below a threshold
    BelowThreshold { column: String, threshold: f64 },
    /// Exposed when a 0/1 indicator column is set
    Indicator { column: String },
}

impl ExposureSpec {
    pub fn column(&self) -> &str {
        match self {
            ExposureSpec::BelowThreshold { column, .. } => column,
            ExposureSpec::Indicator { column } => column,
        }
    }

    /// 1.0 for exposed, 0.0 otherwise
    pub fn indicator(&self, value: f64) -> f64 {
        let exposed = match self {
            ExposureSpec::BelowThreshold { threshold, .. } => value < *threshold,
            ExposureSpec::Indicator { .. } => value >= 0.5,
        };
        if exposed {
            1.0
        } else {
            0.0
        }
    }

    /// Human-readable exposure description for reports
    pub fn describe(&self) -> String {
        match self {
            ExposureSpec::BelowThreshold { column, threshold } => {
                format!("{} < {}", column, threshold)
            }
            ExposureSpec::Indicator { column } => column.clone(),
        }
    }
}

/// One predefined causal question
#[derive(Debug, Clone, Serialize)]
pub struct CausalQuery {
    /// Stable identifier used in reports and insight evidence
    pub name: String,
    pub exposure: ExposureSpec,
    pub outcome: String,
    /// Confounders adjusted for by both submodels
    pub covariates: Vec<String>,
}

impl CausalQuery {
    /// The shipped question set
    pub fn defaults(config: &AnalysisConfig) -> Vec<CausalQuery> {
        vec![
            CausalQuery {
                name: "short_sleep_glucose".to_string(),
                exposure: ExposureSpec::BelowThreshold {
                    column: "sleep_hours_lag1d".to_string(),
                    threshold: config.low_sleep_threshold,
                },
                outcome: "meal_auc".to_string(),
                covariates: vec![
                    "carbs_pct".to_string(),
                    "fiber_g".to_string(),
                    "late_meal".to_string(),
                    "post_meal_walk10".to_string(),
                ],
            },
            CausalQuery {
                name: "post_meal_walk_glucose".to_string(),
                exposure: ExposureSpec::Indicator {
                    column: "post_meal_walk10".to_string(),
                },
                outcome: "meal_auc".to_string(),
                covariates: vec![
                    "carbs_pct".to_string(),
                    "fiber_g".to_string(),
                    "late_meal".to_string(),
                ],
            },
        ]
    }
}

/// One estimated average treatment effect
#[derive(Debug, Clone, Serialize)]
pub struct CausalEffectResult {
    pub query: String,
    pub exposure: String,
    pub outcome: String,
    /// Confounders both submodels adjusted for
    pub covariates: Vec<String>,
    /// Average treatment effect in outcome units
    pub ate: f64,
    /// Mean outcome in the unexposed arm
    pub control_mean: f64,
    /// Effect as a percentage of the unexposed-arm outcome mean, when that
    /// mean is meaningfully nonzero
    pub effect_pct: Option<f64>,
    /// Percentile bootstrap interval at 1 - alpha
    pub confidence_interval: (f64, f64),
    pub ci_method: &'static str,
    /// Replicates that produced a usable estimate
    pub bootstrap_replicates: usize,
    pub sample_size: usize,
    pub n_exposed: usize,
    pub n_unexposed: usize,
    /// Largest post-weighting standardized mean difference over covariates
    pub max_smd: f64,
}

/// Per-query outcome plus the query identity, so skipped queries still
/// appear in the report with their reason
#[derive(Debug, Clone, Serialize)]
pub struct CausalQueryOutcome {
    pub query: String,
    pub exposure: String,
    pub outcome_metric: String,
    #[serde(flatten)]
    pub result: Outcome<CausalEffectResult>,
}

/// All causal estimates from one run
#[derive(Debug, Clone, Serialize)]
pub struct CausalReport {
    pub estimates: Vec<CausalQueryOutcome>,
}

/// Estimates average treatment effects via AIPW
pub struct CausalEffectEstimator {
    config: AnalysisConfig,
}

/// Dense per-query sample: exposure indicator, outcome, covariate rows
struct Sample {
    t: Vec<f64>,
    y: Vec<f64>,
    x: Vec<Vec<f64>>,
}

impl CausalEffectEstimator {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Run the default query set over the table
    pub fn analyze(&self, table: &FeatureTable) -> CausalReport {
        let queries = CausalQuery::defaults(&self.config);
        let estimates = queries
            .iter()
            .map(|query| CausalQueryOutcome {
                query: query.name.clone(),
                exposure: query.exposure.describe(),
                outcome_metric: query.outcome.clone(),
                result: self.estimate(table, query).into(),
            })
            .collect();
        CausalReport { estimates }
    }

    /// Estimate one query's ATE with its bootstrap interval
    pub fn estimate(
        &self,
        table: &FeatureTable,
        query: &CausalQuery,
    ) -> Result<CausalEffectResult, AnalysisError> {
        let sample = self.assemble(table, query)?;
        let n = sample.t.len();
        if n < self.config.causal_min_samples {
            return Err(AnalysisError::InsufficientData {
                stage: format!("causal:{}", query.name),
                needed: self.config.causal_min_samples,
                got: n,
            });
        }
        let n_exposed = sample.t.iter().filter(|&&t| t > 0.5).count();
        let n_unexposed = n - n_exposed;
        if n_exposed < self.config.causal_min_arm || n_unexposed < self.config.causal_min_arm {
            return Err(AnalysisError::InsufficientData {
                stage: format!("causal:{} (smallest arm)", query.name),
                needed: self.config.causal_min_arm,
                got: n_exposed.min(n_unexposed),
            });
        }

        let propensities = self.fit_propensities(&sample)?;
        let max_smd = max_weighted_smd(&sample, &propensities);
        if max_smd > self.config.balance_threshold {
            return Err(AnalysisError::DataQuality(format!(
                "covariate imbalance after weighting in {}: max SMD {:.3} exceeds {:.2}",
                query.name, max_smd, self.config.balance_threshold
            )));
        }

        let ate = self.aipw_ate(&sample, &propensities)?;
        let (interval, used) = self.bootstrap_interval(&sample)?;

        let control_outcomes: Vec<f64> = sample
            .y
            .iter()
            .zip(&sample.t)
            .filter(|(_, &t)| t < 0.5)
            .map(|(&y, _)| y)
            .collect();
        let control_mean = mean(&control_outcomes);
        let effect_pct = if control_mean.abs() > 1e-9 {
            Some(ate / control_mean * 100.0)
        } else {
            None
        };

        tracing::debug!(
            query = %query.name,
            ate,
            n,
            n_exposed,
            "Causal estimate complete"
        );

        Ok(CausalEffectResult {
            query: query.name.clone(),
            exposure: query.exposure.describe(),
            outcome: query.outcome.clone(),
            covariates: query.covariates.clone(),
            ate,
            control_mean,
            effect_pct,
            confidence_interval: interval,
            ci_method: "bootstrap-percentile",
            bootstrap_replicates: used,
            sample_size: n,
            n_exposed,
            n_unexposed,
            max_smd,
        })
    }

    /// Complete cases for the query's exposure, outcome, and covariates
    fn assemble(&self, table: &FeatureTable, query: &CausalQuery) -> Result<Sample, AnalysisError> {
        let mut columns = vec![query.exposure.column().to_string(), query.outcome.clone()];
        columns.extend(query.covariates.iter().cloned());
        for name in &columns {
            if !table.has_column(name) {
                return Err(AnalysisError::DataQuality(format!(
                    "column {} absent from feature table",
                    name
                )));
            }
        }

        let (matrix, _) = table.complete_cases(&columns);
        let mut t = Vec::with_capacity(matrix.len());
        let mut y = Vec::with_capacity(matrix.len());
        let mut x = Vec::with_capacity(matrix.len());
        for row in matrix {
            t.push(query.exposure.indicator(row[0]));
            y.push(row[1]);
            x.push(row[2..].to_vec());
        }
        Ok(Sample { t, y, x })
    }

    /// Clipped propensity scores from a logistic fit
    fn fit_propensities(&self, sample: &Sample) -> Result<Vec<f64>, AnalysisError> {
        let model = fit_logistic(&sample.x, &sample.t)?;
        let clip = self.config.propensity_clip;
        Ok(sample
            .x
            .iter()
            .map(|row| model.predict_proba(row).clamp(clip, 1.0 - clip))
            .collect())
    }

    /// AIPW point estimate given already-fit propensities
    fn aipw_ate(&self, sample: &Sample, propensities: &[f64]) -> Result<f64, AnalysisError> {
        let (treated_x, treated_y): (Vec<Vec<f64>>, Vec<f64>) = split_arm(sample, true);
        let (control_x, control_y): (Vec<Vec<f64>>, Vec<f64>) = split_arm(sample, false);
        let model_treated = fit_linear(&treated_x, &treated_y)?;
        let model_control = fit_linear(&control_x, &control_y)?;

        let mut influence_sum = 0.0;
        for i in 0..sample.t.len() {
            let p = propensities[i];
            let mu1 = model_treated.predict(&sample.x[i]);
            let mu0 = model_control.predict(&sample.x[i]);
            let t = sample.t[i];
            let y = sample.y[i];
            influence_sum += t * (y - mu1) / p - (1.0 - t) * (y - mu0) / (1.0 - p)
                + (mu1 - mu0);
        }
        Ok(influence_sum / sample.t.len() as f64)
    }

    /// Percentile bootstrap refitting both submodels per replicate.
    ///
    /// Replicates whose resample is degenerate (an empty arm, a singular
    /// fit) are skipped; at least half the configured replicates must
    /// succeed for the interval to stand.
    fn bootstrap_interval(
        &self,
        sample: &Sample,
    ) -> Result<((f64, f64), usize), AnalysisError> {
        let n = sample.t.len();
        let mut estimates = Vec::with_capacity(self.config.bootstrap_replicates);

        for b in 0..self.config.bootstrap_replicates {
            // Replicate seed derived from index, so scheduling and replicate
            // count changes upstream never shift later draws
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(b as u64));
            let mut resample = Sample {
                t: Vec::with_capacity(n),
                y: Vec::with_capacity(n),
                x: Vec::with_capacity(n),
            };
            for _ in 0..n {
                let idx = rng.gen_range(0..n);
                resample.t.push(sample.t[idx]);
                resample.y.push(sample.y[idx]);
                resample.x.push(sample.x[idx].clone());
            }

            let n_exposed = resample.t.iter().filter(|&&t| t > 0.5).count();
            if n_exposed < 2 || n - n_exposed < 2 {
                continue;
            }
            let ate = self
                .fit_propensities(&resample)
                .and_then(|p| self.aipw_ate(&resample, &p));
            if let Ok(value) = ate {
                if value.is_finite() {
                    estimates.push(value);
                }
            }
        }

        // At least one converged replicate even when the configured count
        // is tiny; an empty set has no percentiles
        if estimates.len() < (self.config.bootstrap_replicates / 2).max(1) {
            return Err(AnalysisError::ModelConvergence(format!(
                "only {} of {} bootstrap replicates converged",
                estimates.len(),
                self.config.bootstrap_replicates
            )));
        }

        let half_alpha_pct = self.config.alpha / 2.0 * 100.0;
        let lo = percentile(&estimates, half_alpha_pct);
        let hi = percentile(&estimates, 100.0 - half_alpha_pct);
        Ok(((lo, hi), estimates.len()))
    }
}

fn split_arm(sample: &Sample, exposed: bool) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for i in 0..sample.t.len() {
        if (sample.t[i] > 0.5) == exposed {
            xs.push(sample.x[i].clone());
            ys.push(sample.y[i]);
        }
    }
    (xs, ys)
}

/// Largest IPW-weighted standardized mean difference over the covariates.
/// The denominator is the unweighted pooled standard deviation; a
/// zero-variance covariate contributes zero.
fn max_weighted_smd(sample: &Sample, propensities: &[f64]) -> f64 {
    let p_cov = sample.x.first().map(|r| r.len()).unwrap_or(0);
    let mut worst = 0.0_f64;
    for j in 0..p_cov {
        let column: Vec<f64> = sample.x.iter().map(|row| row[j]).collect();
        let sd = std_dev(&column);
        if sd < 1e-12 {
            continue;
        }

        let mut w1_sum = 0.0;
        let mut w1_value = 0.0;
        let mut w0_sum = 0.0;
        let mut w0_value = 0.0;
        for i in 0..column.len() {
            let p = propensities[i];
            if sample.t[i] > 0.5 {
                let w = 1.0 / p;
                w1_sum += w;
                w1_value += w * column[i];
            } else {
                let w = 1.0 / (1.0 - p);
                w0_sum += w;
                w0_value += w * column[i];
            }
        }
        if w1_sum > 0.0 && w0_sum > 0.0 {
            let smd = ((w1_value / w1_sum) - (w0_value / w0_sum)).abs() / sd;
            worst = worst.max(smd);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureRow, FeatureTable, Provenance};
    use chrono::NaiveDate;

    /// Confounded synthetic table: short sleep is more likely after
    /// high-carb days, and both short sleep and carbs raise the outcome.
    /// The structural short-sleep effect is +20 outcome units.
    fn confounded_table(days: usize) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rows = (0..days)
            .map(|i| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                let carbs_pct = 35.0 + ((i * 7) % 30) as f64; // 35..64
                // Exposure depends on carbs with deterministic overlap in
                // both strata
                let short_sleep = if carbs_pct > 50.0 {
                    i % 4 != 0 // mostly exposed
                } else {
                    i % 4 == 0 // mostly unexposed
                };
                let sleep = if short_sleep { 5.0 } else { 7.5 };
                let fiber = 20.0 + (i % 5) as f64;
                let walk = ((i / 2) % 2) as f64;
                let auc = 80.0
                    + 1.5 * carbs_pct
                    + if short_sleep { 20.0 } else { 0.0 }
                    - 0.5 * fiber
                    - 5.0 * walk
                    + ((i * 3) % 7) as f64; // small deterministic noise
                row.set("sleep_hours_lag1d", Some(sleep), Provenance::lagged("sleep_hours", 1));
                row.set("carbs_pct", Some(carbs_pct), Provenance::derived(&["carbs_g"]));
                row.set("fiber_g", Some(fiber), Provenance::raw("fiber_g"));
                row.set("late_meal", Some((i % 3 == 0) as u8 as f64), Provenance::raw("late_meal"));
                row.set("post_meal_walk10", Some(walk), Provenance::raw("post_meal_walk10"));
                row.set("meal_auc", Some(auc), Provenance::raw("meal_auc"));
                row
            })
            .collect();
        FeatureTable::from_rows(rows).unwrap()
    }

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.bootstrap_replicates = 60; // keep the test quick
        cfg
    }

    fn short_sleep_query(cfg: &AnalysisConfig) -> CausalQuery {
        CausalQuery::defaults(cfg).into_iter().next().unwrap()
    }

    #[test]
    fn test_recovers_confounded_effect() {
        let cfg = config();
        let table = confounded_table(80);
        let estimator = CausalEffectEstimator::new(cfg.clone());
        let result = estimator.estimate(&table, &short_sleep_query(&cfg)).unwrap();

        // Adjusted estimate lands near the structural +20, not the
        // confounded naive difference
        assert!((result.ate - 20.0).abs() < 8.0, "ate = {}", result.ate);
        assert!(result.confidence_interval.0 < result.ate);
        assert!(result.ate < result.confidence_interval.1);
        assert!(result.confidence_interval.0 > 0.0, "CI should exclude zero");
        assert_eq!(result.sample_size, 80);
        assert!(result.n_exposed >= 5 && result.n_unexposed >= 5);
        assert!(result.max_smd <= cfg.balance_threshold);
        assert_eq!(result.ci_method, "bootstrap-percentile");
        assert_eq!(result.covariates.len(), 4);
        assert!(result.control_mean > 0.0);
        let pct = result.effect_pct.unwrap();
        assert!(pct > 0.0 && pct < 100.0);
    }

    #[test]
    fn test_zero_replicates_declines() {
        // No replicates means no interval, never a degenerate (0, 0) one
        let mut cfg = config();
        cfg.bootstrap_replicates = 0;
        let table = confounded_table(80);
        let err = CausalEffectEstimator::new(cfg.clone())
            .estimate(&table, &short_sleep_query(&cfg))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ModelConvergence(_)));
    }

    #[test]
    fn test_small_sample_declines() {
        let cfg = config();
        let table = confounded_table(20);
        let estimator = CausalEffectEstimator::new(cfg.clone());
        let err = estimator
            .estimate(&table, &short_sleep_query(&cfg))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn test_single_arm_declines() {
        let cfg = config();
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        // Everyone sleeps well: no exposed arm at all
        let rows = (0..40)
            .map(|i| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                row.set("sleep_hours_lag1d", Some(8.0), Provenance::lagged("sleep_hours", 1));
                row.set("carbs_pct", Some(40.0 + (i % 10) as f64), Provenance::derived(&["carbs_g"]));
                row.set("fiber_g", Some(22.0), Provenance::raw("fiber_g"));
                row.set("late_meal", Some(0.0), Provenance::raw("late_meal"));
                row.set("post_meal_walk10", Some((i % 2) as f64), Provenance::raw("post_meal_walk10"));
                row.set("meal_auc", Some(120.0 + i as f64), Provenance::raw("meal_auc"));
                row
            })
            .collect();
        let table = FeatureTable::from_rows(rows).unwrap();
        let estimator = CausalEffectEstimator::new(cfg.clone());
        let err = estimator
            .estimate(&table, &short_sleep_query(&cfg))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn test_missing_column_is_data_quality() {
        let cfg = config();
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rows = (0..40)
            .map(|i| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                row.set("meal_auc", Some(100.0), Provenance::raw("meal_auc"));
                row
            })
            .collect();
        let table = FeatureTable::from_rows(rows).unwrap();
        let estimator = CausalEffectEstimator::new(cfg.clone());
        let err = estimator
            .estimate(&table, &short_sleep_query(&cfg))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DataQuality(_)));
    }

    #[test]
    fn test_deterministic_across_runs() {
        let cfg = config();
        let table = confounded_table(80);
        let estimator = CausalEffectEstimator::new(cfg.clone());
        let query = short_sleep_query(&cfg);
        let a = estimator.estimate(&table, &query).unwrap();
        let b = estimator.estimate(&table, &query).unwrap();
        assert_eq!(a.ate, b.ate);
        assert_eq!(a.confidence_interval, b.confidence_interval);
        assert_eq!(a.bootstrap_replicates, b.bootstrap_replicates);
    }

    #[test]
    fn test_report_carries_skipped_queries() {
        let cfg = config();
        let table = confounded_table(80);
        let report = CausalEffectEstimator::new(cfg).analyze(&table);
        assert_eq!(report.estimates.len(), 2);
        // Both queries appear whether or not they estimated
        assert!(report.estimates.iter().any(|e| e.query == "short_sleep_glucose"));
        assert!(report
            .estimates
            .iter()
            .any(|e| e.query == "post_meal_walk_glucose"));
    }
}
