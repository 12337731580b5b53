//! Insight Composition
//!
//! Joins the other stages' outputs into a small ranked set of insight
//! cards. Each candidate carries typed evidence back into the result that
//! produced it, a confidence level, and a confidence-times-impact score
//! used for ranking. Narrative text is templated deterministically; an
//! external [`NarrativeGenerator`] may substitute richer phrasing for the
//! same evidence but can never touch the numeric fields or the ranking.

use super::anomalies::{AnomalyReport, Severity};
use super::causal::CausalReport;
use super::correlations::CorrelationReport;
use super::health_score::HealthScore;
use super::predictive::{ModelKind, PredictionResult};
use super::Outcome;
use crate::config::AnalysisConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

/// Typed reference from a card back into the evidence that produced it
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceRef {
    Correlation {
        metric_a: String,
        metric_b: String,
        lag_days: usize,
    },
    Causal {
        query: String,
    },
    Anomaly {
        metric: String,
        date: NaiveDate,
    },
    Prediction {
        target: String,
        date: NaiveDate,
    },
    HealthScore {
        as_of: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
}

impl ConfidenceLevel {
    fn weight(self) -> f64 {
        match self {
            ConfidenceLevel::High => 1.0,
            ConfidenceLevel::Moderate => 0.6,
            ConfidenceLevel::Low => 0.3,
        }
    }
}

/// A concrete short experiment attached to actionable cards
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedExperiment {
    pub duration_days: usize,
    pub intervention: String,
    pub metrics: Vec<String>,
    pub success: String,
}

/// One ranked insight
#[derive(Debug, Clone, Serialize)]
pub struct InsightCard {
    pub id: String,
    pub title: String,
    /// Templated by default; replaceable text, never replaceable numbers
    pub narrative: String,
    pub evidence: EvidenceRef,
    pub confidence: ConfidenceLevel,
    /// Confidence weight times impact magnitude, used for ranking
    pub score: f64,
    pub recommended_action: Option<String>,
    pub expected_impact: Option<String>,
    pub suggested_experiment: Option<SuggestedExperiment>,
    /// 1-based position after ranking
    pub rank: usize,
}

/// Optional external narrative substitution.
///
/// Implementations see the full card but may only return replacement text;
/// the composer keeps every other field as computed.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn narrate(&self, card: &InsightCard) -> Option<String>;
}

/// Builds ranked insight cards from the stage outputs
pub struct InsightComposer {
    config: AnalysisConfig,
}

impl InsightComposer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Compose the top-K cards from whatever stages produced results.
    /// Ranking is deterministic: score descending, then card id.
    pub fn compose(
        &self,
        correlations: &Outcome<CorrelationReport>,
        causal: &Outcome<CausalReport>,
        anomalies: &Outcome<AnomalyReport>,
        prediction: &Outcome<PredictionResult>,
        health: &Outcome<HealthScore>,
    ) -> Vec<InsightCard> {
        let mut cards = Vec::new();
        if let Some(report) = causal.as_ready() {
            cards.extend(self.causal_cards(report));
        }
        if let Some(report) = correlations.as_ready() {
            cards.extend(self.correlation_cards(report));
        }
        if let Some(report) = anomalies.as_ready() {
            cards.extend(self.anomaly_cards(report));
        }
        if let Some(result) = prediction.as_ready() {
            cards.extend(self.prediction_card(result));
        }
        if let Some(score) = health.as_ready() {
            cards.extend(self.health_card(score));
        }

        cards.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        cards.truncate(self.config.top_k_insights);
        for (i, card) in cards.iter_mut().enumerate() {
            card.rank = i + 1;
        }

        tracing::debug!(cards = cards.len(), "Insights composed");
        cards
    }

    /// Substitute external narratives in place; numeric fields and ranking
    /// are left untouched, and a declined substitution keeps the template.
    pub async fn apply_narratives(
        &self,
        cards: &mut [InsightCard],
        generator: &dyn NarrativeGenerator,
    ) {
        for card in cards.iter_mut() {
            if let Some(text) = generator.narrate(card).await {
                card.narrative = text;
            }
        }
    }

    fn causal_cards(&self, report: &CausalReport) -> Vec<InsightCard> {
        let mut cards = Vec::new();
        for estimate in &report.estimates {
            let Some(result) = estimate.result.as_ready() else {
                continue;
            };
            // An interval straddling zero is not an insight
            if result.confidence_interval.0 <= 0.0 && result.confidence_interval.1 >= 0.0 {
                continue;
            }
            // Tiers sized for a personal dataset: two months of complete
            // days already earns full confidence
            let confidence = if result.sample_size >= 50 {
                ConfidenceLevel::High
            } else if result.sample_size >= 30 {
                ConfidenceLevel::Moderate
            } else {
                ConfidenceLevel::Low
            };
            // A 25% shift of the outcome saturates the impact scale
            let impact = result
                .effect_pct
                .map(|p| (p / 25.0).abs().min(1.0))
                .unwrap_or(0.3);

            let direction = if result.ate > 0.0 { "raises" } else { "lowers" };
            let title = format!(
                "{} {} {}",
                exposure_phrase(&result.query, &result.exposure),
                direction,
                outcome_phrase(&result.outcome)
            );
            let narrative = format!(
                "Days with {} shifted {} by {:+.1} on average (95% CI {:.1} to {:.1}, n = {}).",
                result.exposure,
                result.outcome,
                result.ate,
                result.confidence_interval.0,
                result.confidence_interval.1,
                result.sample_size,
            );
            let expected_impact = result
                .effect_pct
                .map(|p| format!("{:+.0}% vs your typical {}", p, result.outcome));

            cards.push(InsightCard {
                id: format!("causal:{}", result.query),
                title,
                narrative,
                evidence: EvidenceRef::Causal {
                    query: result.query.clone(),
                },
                confidence,
                score: confidence.weight() * impact,
                recommended_action: causal_action(&result.query),
                expected_impact,
                suggested_experiment: causal_experiment(&result.query, &result.outcome),
                rank: 0,
            });
        }
        cards
    }

    fn correlation_cards(&self, report: &CorrelationReport) -> Vec<InsightCard> {
        report
            .results
            .iter()
            .filter(|r| r.primary)
            .map(|r| {
                let confidence = if r.adjusted_p_value < 0.001 {
                    ConfidenceLevel::High
                } else if r.adjusted_p_value < 0.01 {
                    ConfidenceLevel::Moderate
                } else {
                    ConfidenceLevel::Low
                };
                let lag_phrase = match r.lag_days {
                    0 => "same-day".to_string(),
                    1 => "next-day".to_string(),
                    k => format!("{}-day-later", k),
                };
                let direction = if r.coefficient > 0.0 { "higher" } else { "lower" };
                InsightCard {
                    id: format!("corr:{}:{}:{}", r.metric_a, r.metric_b, r.lag_days),
                    title: format!(
                        "{} is linked to {} {} {}",
                        r.metric_a, direction, lag_phrase, r.metric_b
                    ),
                    narrative: format!(
                        "{} correlates with {} {} (r = {:.2}, adjusted p = {:.3}, n = {}). Association only, not causation.",
                        r.metric_a, lag_phrase, r.metric_b, r.coefficient,
                        r.adjusted_p_value, r.sample_size,
                    ),
                    evidence: EvidenceRef::Correlation {
                        metric_a: r.metric_a.clone(),
                        metric_b: r.metric_b.clone(),
                        lag_days: r.lag_days,
                    },
                    confidence,
                    score: confidence.weight() * r.coefficient.abs(),
                    recommended_action: None,
                    expected_impact: None,
                    suggested_experiment: None,
                    rank: 0,
                }
            })
            .collect()
    }

    /// One card per metric, for its most recent severe (or escalated) run
    fn anomaly_cards(&self, report: &AnomalyReport) -> Vec<InsightCard> {
        let mut per_metric: Vec<&super::anomalies::AnomalyRecord> = Vec::new();
        for record in &report.records {
            if record.severity != Severity::Severe {
                continue;
            }
            match per_metric.iter_mut().find(|r| r.metric == record.metric) {
                Some(slot) if record.date > slot.date => *slot = record,
                Some(_) => {}
                None => per_metric.push(record),
            }
        }

        per_metric
            .into_iter()
            .map(|record| {
                let confidence = if record.streak >= self.config.streak_escalation {
                    ConfidenceLevel::High
                } else {
                    ConfidenceLevel::Moderate
                };
                let impact =
                    (record.score / (2.0 * self.config.severe_threshold)).min(1.0);
                let run = if record.streak > 1 {
                    format!(" for {} consecutive days", record.streak)
                } else {
                    String::new()
                };
                InsightCard {
                    id: format!("anomaly:{}", record.metric),
                    title: format!("{} is far from its recent baseline", record.metric),
                    narrative: format!(
                        "{} was {:.1} on {} against a baseline of {:.1}{} ({:.1} scaled MADs).",
                        record.metric, record.value, record.date,
                        record.baseline_median, run, record.score,
                    ),
                    evidence: EvidenceRef::Anomaly {
                        metric: record.metric.clone(),
                        date: record.date,
                    },
                    confidence,
                    score: confidence.weight() * impact,
                    recommended_action: None,
                    expected_impact: None,
                    suggested_experiment: anomaly_experiment(&record.metric),
                    rank: 0,
                }
            })
            .collect()
    }

    fn prediction_card(&self, result: &PredictionResult) -> Option<InsightCard> {
        let confidence = match (&result.model, &result.validation) {
            (ModelKind::PopulationMean, _) => ConfidenceLevel::Low,
            (ModelKind::Ensemble, Some(v)) if v.mae < v.baseline_mae => ConfidenceLevel::High,
            _ => ConfidenceLevel::Moderate,
        };
        let top_driver = result
            .feature_importances
            .first()
            .map(|(name, _)| name.clone());
        let driver_phrase = top_driver
            .as_ref()
            .map(|d| format!(" Top driver: {}.", d))
            .unwrap_or_default();

        Some(InsightCard {
            id: format!("prediction:{}", result.target),
            title: format!("Expected {} for {}", result.target, result.date),
            narrative: format!(
                "Forecast {} of {:.0} (range {:.0} to {:.0}).{}",
                result.target, result.predicted, result.band.0, result.band.1, driver_phrase,
            ),
            evidence: EvidenceRef::Prediction {
                target: result.target.clone(),
                date: result.date,
            },
            confidence,
            // Forecasts inform rather than alarm; fixed modest impact
            score: confidence.weight() * 0.2,
            recommended_action: top_driver
                .map(|d| format!("Adjust {} to move tomorrow's {}", d, result.target)),
            expected_impact: None,
            suggested_experiment: None,
            rank: 0,
        })
    }

    fn health_card(&self, score: &HealthScore) -> Option<InsightCard> {
        // Lead with the weakest domain
        let worst = score
            .domain_scores
            .iter()
            .min_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        let recommendation = score
            .recommendations
            .iter()
            .find(|r| r.domain == Some(worst.domain));

        let confidence = if score.window_days >= 14 {
            ConfidenceLevel::Moderate
        } else {
            ConfidenceLevel::Low
        };
        let impact = ((100.0 - worst.score) / 100.0).clamp(0.0, 1.0);

        Some(InsightCard {
            id: "health:composite".to_string(),
            title: format!(
                "Health score {:.0} ({}) over the last {} days",
                score.composite, score.grade, score.window_days
            ),
            narrative: format!(
                "Composite {:.0}/100 ({}). Weakest domain: {} at {:.0}. {}",
                score.composite, score.grade,
                serde_plain_domain(worst.domain), worst.score, worst.interpretation,
            ),
            evidence: EvidenceRef::HealthScore { as_of: score.as_of },
            confidence,
            score: confidence.weight() * impact,
            recommended_action: recommendation.map(|r| r.actions.join("; ")),
            expected_impact: recommendation.map(|r| r.expected_impact.to_string()),
            suggested_experiment: None,
            rank: 0,
        })
    }
}

fn serde_plain_domain(domain: super::health_score::Domain) -> &'static str {
    use super::health_score::Domain;
    match domain {
        Domain::GlucoseControl => "glucose control",
        Domain::SleepQuality => "sleep quality",
        Domain::Recovery => "recovery",
        Domain::Nutrition => "nutrition",
        Domain::Activity => "activity",
    }
}

fn exposure_phrase(query: &str, exposure: &str) -> String {
    match query {
        "short_sleep_glucose" => "Short sleep the night before".to_string(),
        "post_meal_walk_glucose" => "A 10-minute post-meal walk".to_string(),
        _ => exposure.to_string(),
    }
}

fn outcome_phrase(outcome: &str) -> &str {
    match outcome {
        "meal_auc" => "post-meal glucose exposure",
        "meal_peak" => "post-meal glucose peak",
        other => other,
    }
}

fn causal_action(query: &str) -> Option<String> {
    match query {
        "short_sleep_glucose" => {
            Some("Target 7.5h sleep; avoid late dinners".to_string())
        }
        "post_meal_walk_glucose" => {
            Some("Take a 10-minute walk after your largest meal".to_string())
        }
        _ => None,
    }
}

fn causal_experiment(query: &str, outcome: &str) -> Option<SuggestedExperiment> {
    match query {
        "short_sleep_glucose" => Some(SuggestedExperiment {
            duration_days: 5,
            intervention: "Target 7.5h sleep; avoid late dinner; 10-min post-dinner walk"
                .to_string(),
            metrics: vec![outcome.to_string(), "meal_peak".to_string()],
            success: format!("{} down 10% vs baseline", outcome),
        }),
        "post_meal_walk_glucose" => Some(SuggestedExperiment {
            duration_days: 5,
            intervention: "10-minute walk after every main meal".to_string(),
            metrics: vec![outcome.to_string()],
            success: format!("{} down vs non-walk days", outcome),
        }),
        _ => None,
    }
}

fn anomaly_experiment(metric: &str) -> Option<SuggestedExperiment> {
    if metric != "fg_fast_mgdl" {
        return None;
    }
    Some(SuggestedExperiment {
        duration_days: 5,
        intervention: "Earlier dinner; 10-min post-dinner walk; 7.5h sleep target".to_string(),
        metrics: vec![
            "fg_fast_mgdl".to_string(),
            "sleep_hours".to_string(),
            "hrv".to_string(),
        ],
        success: "fg_fast_mgdl down 5 mg/dL vs baseline".to_string(),
    })
}
