//! Analysis Stages
//!
//! The five independent consumers of the feature table plus the composer:
//! - [`correlations`]: lagged pairwise association discovery
//! - [`causal`]: doubly robust (AIPW) treatment effect estimation
//! - [`anomalies`]: rolling median/MAD outlier scoring
//! - [`predictive`]: ensemble glucose-response forecasting
//! - [`health_score`]: domain scoring and trend computation
//! - [`insights`]: ranked, narrated insight cards
//!
//! Every stage returns an [`Outcome`] instead of raising past its boundary:
//! one failed analysis never blocks the others.

pub mod anomalies;
pub mod causal;
pub mod correlations;
pub mod health_score;
pub mod insights;
pub mod predictive;

pub use anomalies::{AnomalyDetector, AnomalyRecord, AnomalyReport, Severity};
pub use causal::{
    CausalEffectEstimator, CausalEffectResult, CausalQuery, CausalQueryOutcome, CausalReport,
    ExposureSpec,
};
pub use correlations::{
    CorrelationEngine, CorrelationMethod, CorrelationReport, CorrelationResult,
};
pub use health_score::{
    Domain, DomainScore, HealthScore, HealthScoreEngine, Priority, Recommendation,
    TrendDirection,
};
pub use insights::{
    ConfidenceLevel, EvidenceRef, InsightCard, InsightComposer, NarrativeGenerator,
    SuggestedExperiment,
};
pub use predictive::{ModelKind, PredictionResult, PredictiveModel, ValidationMetrics};

use serde::Serialize;
use thiserror::Error;

/// Errors an analysis stage can hit internally. Stages recover from these
/// locally by degrading to an [`Outcome`] variant; they are never surfaced
/// to the caller as request failures.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Sample below the stage's minimum N
    #[error("Insufficient data for {stage}: needed {needed}, got {got}")]
    InsufficientData {
        stage: String,
        needed: usize,
        got: usize,
    },

    /// Propensity or outcome model failed to fit
    #[error("Model failed to converge: {0}")]
    ModelConvergence(String),

    /// Missing-value density or input quality out of bounds
    #[error("Data quality: {0}")]
    DataQuality(String),

    /// Degenerate variance or a singular system
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

/// Explicit result variant returned by every analysis stage
///
/// `InsufficientData` is a normal, expected outcome for sparse inputs;
/// `NotComputed` marks stages that were timed out, failed to converge, or
/// were skipped. Both serialize with a reason so the presentation layer can
/// explain the gap.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// The stage produced a full result
    Ready(T),
    /// The stage declined to estimate: not enough usable observations
    InsufficientData { reason: String },
    /// The stage did not run to completion (timeout, convergence failure)
    NotComputed { reason: String },
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Outcome::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Map an internal stage error to its degraded outcome
    pub fn from_error(error: AnalysisError) -> Self {
        match &error {
            AnalysisError::InsufficientData { .. } | AnalysisError::DataQuality(_) => {
                Outcome::InsufficientData {
                    reason: error.to_string(),
                }
            }
            AnalysisError::ModelConvergence(_) | AnalysisError::NumericalInstability(_) => {
                Outcome::NotComputed {
                    reason: error.to_string(),
                }
            }
        }
    }
}

impl<T> From<Result<T, AnalysisError>> for Outcome<T> {
    fn from(result: Result<T, AnalysisError>) -> Self {
        match result {
            Ok(value) => Outcome::Ready(value),
            Err(error) => Outcome::from_error(error),
        }
    }
}
