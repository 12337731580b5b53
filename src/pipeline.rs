//! Analysis Pipeline
//!
//! Session-scoped orchestration: build one immutable feature table from the
//! raw streams, fan the five analysis stages out as blocking tasks under
//! per-stage time boxes, then join them in the composer. A timed-out or
//! panicked stage becomes an explicit `NotComputed` marker in the report;
//! only a schema violation at the boundary fails the whole run.

use crate::analysis::{
    AnomalyDetector, AnomalyReport, CausalEffectEstimator, CausalReport, CorrelationEngine,
    CorrelationReport, HealthScore, HealthScoreEngine, InsightCard, InsightComposer,
    NarrativeGenerator, Outcome, PredictionResult, PredictiveModel,
};
use crate::config::AnalysisConfig;
use crate::table::{FeatureEngineer, FeatureTable, MetricSeries, SchemaResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything one run produced, ready for serialization
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub session_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Days covered by the feature table
    pub days: usize,
    pub correlations: Outcome<CorrelationReport>,
    pub causal: Outcome<CausalReport>,
    pub anomalies: Outcome<AnomalyReport>,
    pub prediction: Outcome<PredictionResult>,
    pub health: Outcome<HealthScore>,
    pub insights: Vec<InsightCard>,
}

/// One session: an id, a config, and the immutable feature table snapshot.
/// Discarded with the session; nothing is shared across sessions.
pub struct SessionContext {
    session_id: Uuid,
    config: AnalysisConfig,
    table: Arc<FeatureTable>,
}

impl SessionContext {
    /// Build the session's feature table from raw streams. Schema
    /// violations are fatal here, before any analysis starts.
    pub fn new(config: AnalysisConfig, streams: &[MetricSeries]) -> SchemaResult<Self> {
        let table = FeatureEngineer::new(config.clone()).build(streams)?;
        let session_id = Uuid::new_v4();
        tracing::info!(
            %session_id,
            days = table.len(),
            columns = table.columns().count(),
            "Session created"
        );
        Ok(Self {
            session_id,
            config,
            table: Arc::new(table),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn table(&self) -> &Arc<FeatureTable> {
        &self.table
    }

    /// Run all stages concurrently and compose the report
    pub async fn run(&self) -> AnalysisReport {
        self.run_with(None).await
    }

    /// Like [`run`](Self::run), substituting external narratives when a
    /// generator is supplied
    pub async fn run_with(&self, narrator: Option<&dyn NarrativeGenerator>) -> AnalysisReport {
        let timeout = self.config.stage_timeout();

        let (correlations, causal, anomalies, prediction, health) = tokio::join!(
            self.stage("correlations", timeout, {
                let table = Arc::clone(&self.table);
                let config = self.config.clone();
                move || Outcome::Ready(CorrelationEngine::new(config).analyze(&table))
            }),
            self.stage("causal", timeout, {
                let table = Arc::clone(&self.table);
                let config = self.config.clone();
                move || Outcome::Ready(CausalEffectEstimator::new(config).analyze(&table))
            }),
            self.stage("anomalies", timeout, {
                let table = Arc::clone(&self.table);
                let config = self.config.clone();
                move || Outcome::Ready(AnomalyDetector::new(config).analyze(&table))
            }),
            self.stage("prediction", timeout, {
                let table = Arc::clone(&self.table);
                let config = self.config.clone();
                move || PredictiveModel::new(config).analyze(&table).into()
            }),
            self.stage("health", timeout, {
                let table = Arc::clone(&self.table);
                let config = self.config.clone();
                move || HealthScoreEngine::new(config).analyze(&table).into()
            }),
        );

        let composer = InsightComposer::new(self.config.clone());
        let mut insights =
            composer.compose(&correlations, &causal, &anomalies, &prediction, &health);
        if let Some(narrator) = narrator {
            composer.apply_narratives(&mut insights, narrator).await;
        }

        tracing::info!(
            session_id = %self.session_id,
            insights = insights.len(),
            "Analysis run complete"
        );

        AnalysisReport {
            session_id: self.session_id,
            generated_at: Utc::now(),
            days: self.table.len(),
            correlations,
            causal,
            anomalies,
            prediction,
            health,
            insights,
        }
    }

    /// Run one stage on the blocking pool under a strict time box. The
    /// blocking worker is not interrupted on timeout; its result is
    /// discarded. A worker that finishes but whose result arrives past the
    /// deadline is discarded too, so the box holds even when the timer
    /// races the first poll.
    async fn stage<T, F>(&self, name: &'static str, timeout: Duration, f: F) -> Outcome<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let started = std::time::Instant::now();
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(outcome)) if started.elapsed() <= timeout => outcome,
            Ok(Err(join_error)) => {
                tracing::error!(stage = name, error = %join_error, "Stage panicked");
                Outcome::NotComputed {
                    reason: format!("{} stage failed: {}", name, join_error),
                }
            }
            _ => {
                tracing::warn!(stage = name, ?timeout, "Stage timed out");
                Outcome::NotComputed {
                    reason: format!("{} stage exceeded {:?}", name, timeout),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CorrelationMethod;
    use crate::synthetic::SyntheticGenerator;
    use chrono::NaiveDate;

    /// Streams with one planted signal: short sleep on day t raises the
    /// next day's meal AUC by 40, everything else near-constant wiggle.
    fn planted_streams(days: usize) -> Vec<MetricSeries> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let date = |i: usize| start + chrono::Duration::days(i as i64);

        let sleep: Vec<f64> = (0..days)
            .map(|i| {
                if i % 3 == 0 {
                    5.0
                } else {
                    7.5 + (i % 5) as f64 * 0.1
                }
            })
            .collect();
        let auc: Vec<f64> = (0..days)
            .map(|i| {
                let short_prev = i > 0 && sleep[i - 1] < 6.0;
                100.0 + if short_prev { 40.0 } else { 0.0 } + ((i * 3) % 7) as f64
            })
            .collect();

        let points = |values: &[f64]| -> Vec<(NaiveDate, Option<f64>)> {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (date(i), Some(*v)))
                .collect()
        };
        vec![
            MetricSeries::new("sleep_hours", points(&sleep)).unwrap(),
            MetricSeries::new("meal_auc", points(&auc)).unwrap(),
            MetricSeries::new(
                "carbs_g",
                points(&(0..days).map(|i| 140.0 + (i % 10) as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
            MetricSeries::new(
                "protein_g",
                points(&(0..days).map(|i| 70.0 + (i % 4) as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
            MetricSeries::new(
                "fat_g",
                points(&(0..days).map(|i| 50.0 + (i % 3) as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
            MetricSeries::new(
                "fiber_g",
                points(&(0..days).map(|i| 20.0 + (i % 5) as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
            MetricSeries::new(
                "late_meal",
                points(&(0..days).map(|i| (i % 4 == 1) as u8 as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
            MetricSeries::new(
                "post_meal_walk10",
                points(&(0..days).map(|i| ((i / 2) % 2) as f64).collect::<Vec<_>>()),
            )
            .unwrap(),
        ]
    }

    fn quick_config() -> AnalysisConfig {
        let mut cfg = AnalysisConfig::default();
        cfg.bootstrap_replicates = 60;
        cfg.forest_trees = 20;
        cfg
    }

    #[tokio::test]
    async fn test_end_to_end_planted_sleep_glucose_signal() {
        let context = SessionContext::new(quick_config(), &planted_streams(60)).unwrap();
        let report = context.run().await;

        // Correlation stage: (sleep_hours, meal_auc, lag 1) significant
        let correlations = report.correlations.as_ready().expect("correlations ready");
        let lag1 = correlations
            .results
            .iter()
            .find(|r| r.metric_a == "sleep_hours" && r.metric_b == "meal_auc" && r.lag_days == 1)
            .expect("lag-1 sleep/auc correlation");
        assert!(lag1.coefficient < -0.5);
        assert!(lag1.adjusted_p_value <= 0.05);
        // Bimodal sleep fails the normality gate
        assert_eq!(lag1.method, CorrelationMethod::Spearman);

        // Causal stage: positive short-sleep effect, CI excluding zero
        let causal = report.causal.as_ready().expect("causal ready");
        let sleep_effect = causal
            .estimates
            .iter()
            .find(|e| e.query == "short_sleep_glucose")
            .unwrap()
            .result
            .as_ready()
            .expect("short-sleep estimate ready");
        assert!(sleep_effect.ate > 20.0, "ate = {}", sleep_effect.ate);
        assert!(sleep_effect.confidence_interval.0 > 0.0);

        // The planted effect surfaces in the card ranking
        assert!(!report.insights.is_empty());
        assert!(report
            .insights
            .iter()
            .any(|card| card.id == "causal:short_sleep_glucose"));
    }

    #[tokio::test]
    async fn test_run_is_deterministic_for_fixed_seed() {
        let streams = SyntheticGenerator::new(60, 42).generate().unwrap();
        let a = SessionContext::new(quick_config(), &streams)
            .unwrap()
            .run()
            .await;
        let b = SessionContext::new(quick_config(), &streams)
            .unwrap()
            .run()
            .await;

        // Session ids and timestamps differ; every numeric result must not
        assert_eq!(
            serde_json::to_value(&a.correlations).unwrap(),
            serde_json::to_value(&b.correlations).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.causal).unwrap(),
            serde_json::to_value(&b.causal).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.prediction).unwrap(),
            serde_json::to_value(&b.prediction).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.insights).unwrap(),
            serde_json::to_value(&b.insights).unwrap()
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_degrades_to_not_computed() {
        let mut cfg = quick_config();
        cfg.stage_timeout_ms = 0;
        let streams = SyntheticGenerator::new(40, 42).generate().unwrap();
        let report = SessionContext::new(cfg, &streams).unwrap().run().await;

        assert!(matches!(report.correlations, Outcome::NotComputed { .. }));
        assert!(matches!(report.causal, Outcome::NotComputed { .. }));
        assert!(matches!(report.prediction, Outcome::NotComputed { .. }));
        // Even near-instant stages must not slip through the box
        assert!(matches!(report.anomalies, Outcome::NotComputed { .. }));
        assert!(matches!(report.health, Outcome::NotComputed { .. }));
        // The request itself still succeeds, with markers instead of data
        assert!(report.insights.is_empty());
    }

    #[tokio::test]
    async fn test_schema_violation_is_fatal_at_the_boundary() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = MetricSeries::new("mood", vec![(start, Some(3.0))]).unwrap_err();
        // Unknown metrics never reach the pipeline
        assert!(matches!(
            err,
            crate::table::SchemaError::UnknownMetric { .. }
        ));
    }

    /// Coverage check: the bootstrap interval should usually contain the
    /// planted effect across independently generated datasets
    #[tokio::test]
    async fn test_causal_interval_coverage() {
        use crate::analysis::{CausalEffectEstimator, CausalQuery};

        let mut cfg = quick_config();
        cfg.bootstrap_replicates = 40;
        let query = CausalQuery::defaults(&cfg)
            .into_iter()
            .next()
            .unwrap();

        let mut covered = 0;
        let mut estimated = 0;
        for seed in 0..20_u64 {
            let mut run_cfg = cfg.clone();
            run_cfg.seed = seed.wrapping_mul(7919).wrapping_add(13);
            let streams = SyntheticGenerator::new(90, seed).generate().unwrap();
            let table = FeatureEngineer::new(run_cfg.clone()).build(&streams).unwrap();
            if let Ok(result) =
                CausalEffectEstimator::new(run_cfg).estimate(&table, &query)
            {
                estimated += 1;
                let (lo, hi) = result.confidence_interval;
                if lo <= crate::synthetic::SHORT_SLEEP_AUC_EFFECT
                    && crate::synthetic::SHORT_SLEEP_AUC_EFFECT <= hi
                {
                    covered += 1;
                }
            }
        }

        assert!(estimated >= 10, "estimated on {} of 20 datasets", estimated);
        // Nominal 95% coverage, loose bound for the small replicate count
        assert!(
            covered * 4 >= estimated * 3,
            "covered {} of {}",
            covered,
            estimated
        );
    }
}
