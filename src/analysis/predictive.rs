//! Glucose Response Prediction
//!
//! A small bagged ensemble of regression trees over the engineered meal and
//! recovery features. Trees are trained on bootstrap resamples with random
//! feature subsets per split; the spread of per-tree predictions doubles as
//! an uncertainty band. Every random draw is seeded per tree from the run
//! seed, so results are identical across runs and thread schedules.
//!
//! Below the minimum training size the stage degrades to a population-mean
//! predictor rather than fitting trees to noise.

use super::AnalysisError;
use crate::config::AnalysisConfig;
use crate::stats::{mean, percentile};
use crate::table::FeatureTable;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Which estimator produced the prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ensemble,
    PopulationMean,
}

/// Held-out accuracy on the time-ordered tail split
#[derive(Debug, Clone, Serialize)]
pub struct ValidationMetrics {
    /// Mean absolute error of the ensemble on the validation tail
    pub mae: f64,
    /// MAE of always predicting the training mean, for reference
    pub baseline_mae: f64,
    pub n_train: usize,
    pub n_validation: usize,
}

/// One forecast of the target metric
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Day the prediction applies to (latest day with complete features)
    pub date: NaiveDate,
    pub target: String,
    pub predicted: f64,
    /// Percentile band over per-tree predictions; collapses to the point
    /// estimate for the population-mean fallback
    pub band: (f64, f64),
    pub band_percentiles: (f64, f64),
    pub model: ModelKind,
    /// Normalized impurity-decrease importances, descending, summing to 1
    /// (empty for the fallback)
    pub feature_importances: Vec<(String, f64)>,
    pub validation: Option<ValidationMetrics>,
    pub n_training_rows: usize,
}

/// Bagged regression-tree forecaster for the configured target
pub struct PredictiveModel {
    config: AnalysisConfig,
}

enum TreeNode {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            TreeNode::Leaf(value) => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

impl PredictiveModel {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Fit on the table's history and predict the latest complete day
    pub fn analyze(&self, table: &FeatureTable) -> Result<PredictionResult, AnalysisError> {
        let features: Vec<String> = self
            .config
            .prediction_features
            .iter()
            .filter(|f| table.has_column(f))
            .cloned()
            .collect();
        if features.is_empty() {
            return Err(AnalysisError::DataQuality(
                "no prediction features present in feature table".to_string(),
            ));
        }
        if !table.has_column(&self.config.prediction_target) {
            return Err(AnalysisError::DataQuality(format!(
                "prediction target {} absent from feature table",
                self.config.prediction_target
            )));
        }

        // Training rows need features AND target
        let mut with_target = features.clone();
        with_target.push(self.config.prediction_target.clone());
        let (labelled, _) = table.complete_cases(&with_target);

        // The day to predict is the latest row with complete features,
        // whether or not its target was observed
        let (feature_rows, feature_indices) = table.complete_cases(&features);
        let Some((query_row, query_idx)) =
            feature_rows.last().zip(feature_indices.last())
        else {
            return Err(AnalysisError::InsufficientData {
                stage: "predictive".to_string(),
                needed: 1,
                got: 0,
            });
        };
        let date = table.rows()[*query_idx].date;

        if labelled.len() < self.config.min_training_samples {
            return self.population_fallback(table, date, labelled.len());
        }

        let x: Vec<Vec<f64>> = labelled
            .iter()
            .map(|row| row[..features.len()].to_vec())
            .collect();
        let y: Vec<f64> = labelled.iter().map(|row| row[features.len()]).collect();

        // Time-ordered split: the tail is held out
        let n_train = ((x.len() as f64) * self.config.train_fraction).floor() as usize;
        let n_train = n_train.max(self.config.min_training_samples.min(x.len()));
        let (train_x, valid_x) = x.split_at(n_train.min(x.len()));
        let (train_y, valid_y) = y.split_at(n_train.min(y.len()));

        let mut importances = vec![0.0; features.len()];
        let mut trees = Vec::with_capacity(self.config.forest_trees);
        for t in 0..self.config.forest_trees {
            // Per-tree seed derived from index keeps training order-free
            let mut rng =
                StdRng::seed_from_u64(self.config.seed.wrapping_add(t as u64));
            trees.push(self.grow_tree(train_x, train_y, &mut rng, &mut importances));
        }

        let per_tree: Vec<f64> = trees.iter().map(|tree| tree.predict(query_row)).collect();
        let predicted = mean(&per_tree);
        let band = (
            percentile(&per_tree, self.config.band_percentiles.0),
            percentile(&per_tree, self.config.band_percentiles.1),
        );

        let validation = if valid_y.is_empty() {
            None
        } else {
            let train_mean = mean(train_y);
            let mut err_sum = 0.0;
            let mut base_sum = 0.0;
            for (row, &actual) in valid_x.iter().zip(valid_y) {
                let forecast: Vec<f64> = trees.iter().map(|tr| tr.predict(row)).collect();
                err_sum += (mean(&forecast) - actual).abs();
                base_sum += (train_mean - actual).abs();
            }
            Some(ValidationMetrics {
                mae: err_sum / valid_y.len() as f64,
                baseline_mae: base_sum / valid_y.len() as f64,
                n_train: train_y.len(),
                n_validation: valid_y.len(),
            })
        };

        let total: f64 = importances.iter().sum();
        let mut feature_importances: Vec<(String, f64)> = features
            .iter()
            .zip(&importances)
            .map(|(name, imp)| {
                let norm = if total > 0.0 { imp / total } else { 0.0 };
                (name.clone(), norm)
            })
            .collect();
        feature_importances.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        tracing::debug!(
            target = %self.config.prediction_target,
            predicted,
            trees = trees.len(),
            "Prediction complete"
        );

        Ok(PredictionResult {
            date,
            target: self.config.prediction_target.clone(),
            predicted,
            band,
            band_percentiles: self.config.band_percentiles,
            model: ModelKind::Ensemble,
            feature_importances,
            validation,
            n_training_rows: train_y.len(),
        })
    }

    /// Population-mean predictor for thin histories
    fn population_fallback(
        &self,
        table: &FeatureTable,
        date: NaiveDate,
        labelled: usize,
    ) -> Result<PredictionResult, AnalysisError> {
        let observed: Vec<f64> = table
            .column(&self.config.prediction_target)
            .into_iter()
            .flatten()
            .collect();
        if observed.is_empty() {
            return Err(AnalysisError::InsufficientData {
                stage: "predictive".to_string(),
                needed: self.config.min_training_samples,
                got: 0,
            });
        }
        let predicted = mean(&observed);
        tracing::debug!(
            labelled,
            needed = self.config.min_training_samples,
            "Falling back to population-mean prediction"
        );
        Ok(PredictionResult {
            date,
            target: self.config.prediction_target.clone(),
            predicted,
            band: (predicted, predicted),
            band_percentiles: self.config.band_percentiles,
            model: ModelKind::PopulationMean,
            feature_importances: Vec::new(),
            validation: None,
            n_training_rows: labelled,
        })
    }

    /// Grow one tree on a bootstrap resample of the training rows
    fn grow_tree(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> TreeNode {
        let n = y.len();
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        self.split_node(x, y, &indices, 0, rng, importances)
    }

    fn split_node(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        indices: &[usize],
        depth: usize,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> TreeNode {
        let targets: Vec<f64> = indices.iter().map(|&i| y[i]).collect();
        let node_mean = mean(&targets);
        if depth >= self.config.forest_max_depth
            || indices.len() < 2 * self.config.forest_min_leaf
        {
            return TreeNode::Leaf(node_mean);
        }

        let node_sse = sse(&targets, node_mean);
        if node_sse < 1e-12 {
            return TreeNode::Leaf(node_mean);
        }

        let n_features = x[0].len();
        let subset_size = ((n_features as f64 * self.config.forest_feature_fraction)
            .ceil() as usize)
            .clamp(1, n_features);
        let mut candidates: Vec<usize> = (0..n_features).collect();
        candidates.shuffle(rng);
        candidates.truncate(subset_size);
        candidates.sort_unstable(); // deterministic evaluation order

        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, sse)
        for &feature in &candidates {
            let mut values: Vec<f64> = indices.iter().map(|&i| x[i][feature]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            for pair in values.windows(2) {
                let threshold = (pair[0] + pair[1]) / 2.0;
                let (left, right) = split_targets(x, y, indices, feature, threshold);
                if left.len() < self.config.forest_min_leaf
                    || right.len() < self.config.forest_min_leaf
                {
                    continue;
                }
                let split_sse = sse(&left, mean(&left)) + sse(&right, mean(&right));
                if best.map_or(true, |(_, _, s)| split_sse < s) {
                    best = Some((feature, threshold, split_sse));
                }
            }
        }

        let Some((feature, threshold, split_sse)) = best else {
            return TreeNode::Leaf(node_mean);
        };
        importances[feature] += node_sse - split_sse;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| x[i][feature] <= threshold);
        TreeNode::Split {
            feature,
            threshold,
            left: Box::new(self.split_node(x, y, &left_idx, depth + 1, rng, importances)),
            right: Box::new(self.split_node(x, y, &right_idx, depth + 1, rng, importances)),
        }
    }
}

fn sse(values: &[f64], center: f64) -> f64 {
    values.iter().map(|v| (v - center).powi(2)).sum()
}

/// Targets on each side of a candidate split
fn split_targets(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    feature: usize,
    threshold: f64,
) -> (Vec<f64>, Vec<f64>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &i in indices {
        if x[i][feature] <= threshold {
            left.push(y[i]);
        } else {
            right.push(y[i]);
        }
    }
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FeatureRow, FeatureTable, Provenance};

    /// Target is a clean function of carbs and fiber; other features noise
    fn meal_table(days: usize, last_target_missing: bool) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let rows = (0..days)
            .map(|i| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                let carbs = 100.0 + ((i * 11) % 80) as f64;
                let fiber = 15.0 + ((i * 5) % 20) as f64;
                let walk = (i % 2) as f64;
                let auc = 40.0 + 0.8 * carbs - 1.2 * fiber - 8.0 * walk;
                row.set("carbs_g", Some(carbs), Provenance::raw("carbs_g"));
                row.set("fiber_g", Some(fiber), Provenance::raw("fiber_g"));
                row.set("post_meal_walk10", Some(walk), Provenance::raw("post_meal_walk10"));
                let target = if last_target_missing && i == days - 1 {
                    None
                } else {
                    Some(auc)
                };
                row.set("meal_auc", target, Provenance::raw("meal_auc"));
                row
            })
            .collect();
        FeatureTable::from_rows(rows).unwrap()
    }

    fn config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.prediction_features = vec![
            "carbs_g".to_string(),
            "fiber_g".to_string(),
            "post_meal_walk10".to_string(),
        ];
        cfg.forest_trees = 25;
        cfg.forest_max_depth = 5;
        cfg
    }

    #[test]
    fn test_learns_structured_target() {
        let table = meal_table(60, false);
        let result = PredictiveModel::new(config()).analyze(&table).unwrap();

        assert_eq!(result.model, ModelKind::Ensemble);
        assert_eq!(result.target, "meal_auc");
        let validation = result.validation.as_ref().unwrap();
        // Trees should clearly beat the mean baseline on a structured target
        assert!(
            validation.mae < validation.baseline_mae,
            "mae {} vs baseline {}",
            validation.mae,
            validation.baseline_mae
        );
        assert!(validation.n_train > validation.n_validation);
    }

    #[test]
    fn test_importances_normalized_and_ranked() {
        let table = meal_table(60, false);
        let result = PredictiveModel::new(config()).analyze(&table).unwrap();
        let total: f64 = result.feature_importances.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Carbs dominate the target by construction
        assert_eq!(result.feature_importances[0].0, "carbs_g");
        // Descending
        for pair in result.feature_importances.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_band_brackets_point_estimate() {
        let table = meal_table(60, false);
        let result = PredictiveModel::new(config()).analyze(&table).unwrap();
        assert!(result.band.0 <= result.predicted);
        assert!(result.predicted <= result.band.1);
        assert_eq!(result.band_percentiles, (10.0, 90.0));
    }

    #[test]
    fn test_predicts_day_without_target() {
        // Latest day has features but no observed outcome yet
        let table = meal_table(60, true);
        let result = PredictiveModel::new(config()).analyze(&table).unwrap();
        assert_eq!(
            result.date,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + chrono::Duration::days(59)
        );
    }

    #[test]
    fn test_thin_history_falls_back_to_mean() {
        let table = meal_table(10, false);
        let result = PredictiveModel::new(config()).analyze(&table).unwrap();
        assert_eq!(result.model, ModelKind::PopulationMean);
        assert!(result.feature_importances.is_empty());
        assert_eq!(result.band, (result.predicted, result.predicted));
        assert!(result.validation.is_none());
    }

    #[test]
    fn test_deterministic_across_runs() {
        let table = meal_table(60, false);
        let model = PredictiveModel::new(config());
        let a = model.analyze(&table).unwrap();
        let b = model.analyze(&table).unwrap();
        assert_eq!(a.predicted, b.predicted);
        assert_eq!(a.band, b.band);
        assert_eq!(a.feature_importances, b.feature_importances);
    }

    #[test]
    fn test_missing_target_column_is_error() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let rows = (0..30)
            .map(|i| {
                let mut row = FeatureRow::new(start + chrono::Duration::days(i as i64));
                row.set("carbs_g", Some(120.0), Provenance::raw("carbs_g"));
                row
            })
            .collect();
        let table = FeatureTable::from_rows(rows).unwrap();
        let err = PredictiveModel::new(config()).analyze(&table).unwrap_err();
        assert!(matches!(err, AnalysisError::DataQuality(_)));
    }
}
