//! Health Scoring
//!
//! Normalizes each domain's recent averages into a 0-100 sub-score against
//! fixed reference ranges (fasting glucose 85 mg/dL, 8 h sleep, HRV 30-50 ms,
//! 25 g fiber, 10k steps), combines them through fixed domain weights
//! renormalized over the domains with data, and derives window-over-window
//! trends. Recommendations are rule-based: a low-scoring domain maps to a
//! concrete action list with an expected impact.

use super::AnalysisError;
use crate::config::AnalysisConfig;
use crate::stats::mean;
use crate::table::{FeatureRow, FeatureTable};
use chrono::NaiveDate;
use serde::Serialize;

/// Scored health domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    GlucoseControl,
    SleepQuality,
    Recovery,
    Nutrition,
    Activity,
}

impl Domain {
    const ALL: [Domain; 5] = [
        Domain::GlucoseControl,
        Domain::SleepQuality,
        Domain::Recovery,
        Domain::Nutrition,
        Domain::Activity,
    ];

    /// Fixed composite weight; renormalized over the domains present
    fn weight(self) -> f64 {
        match self {
            Domain::GlucoseControl => 0.30,
            Domain::SleepQuality => 0.20,
            Domain::Recovery => 0.15,
            Domain::Nutrition => 0.20,
            Domain::Activity => 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    /// Too little history to call a direction
    Unknown,
}

/// One domain's contribution to the composite
#[derive(Debug, Clone, Serialize)]
pub struct DomainScore {
    pub domain: Domain,
    /// Normalized 0-100 sub-score
    pub score: f64,
    pub trend: TrendDirection,
    pub interpretation: &'static str,
    /// Renormalized weight actually applied in the composite
    pub weight: f64,
}

/// Priority of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// One rule-generated suggestion
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub domain: Option<Domain>,
    pub title: &'static str,
    pub description: &'static str,
    pub actions: Vec<&'static str>,
    pub expected_impact: &'static str,
}

/// Composite health score over the recent window
#[derive(Debug, Clone, Serialize)]
pub struct HealthScore {
    /// Last day of the scored window
    pub as_of: NaiveDate,
    pub window_days: usize,
    pub domain_scores: Vec<DomainScore>,
    /// Weighted composite, 0-100
    pub composite: f64,
    pub grade: &'static str,
    pub interpretation: &'static str,
    /// Composite delta vs the preceding window of the same length;
    /// absent without enough prior history
    pub trend_delta: Option<f64>,
    pub trend: TrendDirection,
    pub recommendations: Vec<Recommendation>,
}

/// Scores recent history against fixed reference ranges
pub struct HealthScoreEngine {
    config: AnalysisConfig,
}

impl HealthScoreEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, table: &FeatureTable) -> Result<HealthScore, AnalysisError> {
        let rows = table.rows();
        let window_start = rows.len().saturating_sub(self.config.health_window_days);
        let window = &rows[window_start..];

        let mut domain_scores = Vec::new();
        for domain in Domain::ALL {
            if let Some(score) = score_domain(domain, window) {
                let trend = domain_trend(domain, window);
                domain_scores.push(DomainScore {
                    domain,
                    score,
                    trend,
                    interpretation: interpret_domain(domain, score),
                    weight: 0.0, // renormalized below
                });
            }
        }
        if domain_scores.is_empty() {
            return Err(AnalysisError::InsufficientData {
                stage: "health_score".to_string(),
                needed: 1,
                got: 0,
            });
        }

        let total_weight: f64 = domain_scores.iter().map(|d| d.domain.weight()).sum();
        for d in &mut domain_scores {
            d.weight = d.domain.weight() / total_weight;
        }
        let composite: f64 = domain_scores.iter().map(|d| d.weight * d.score).sum();

        let trend_delta = self.composite_delta(rows);
        let trend = match trend_delta {
            Some(delta) if delta > 1.0 => TrendDirection::Improving,
            Some(delta) if delta < -1.0 => TrendDirection::Declining,
            Some(_) => TrendDirection::Stable,
            None => TrendDirection::Unknown,
        };

        let recommendations = build_recommendations(&domain_scores, composite);

        tracing::debug!(
            composite,
            domains = domain_scores.len(),
            "Health score computed"
        );

        Ok(HealthScore {
            as_of: rows[rows.len() - 1].date,
            window_days: window.len(),
            domain_scores,
            composite,
            grade: grade(composite),
            interpretation: interpret_overall(composite),
            trend_delta,
            trend,
            recommendations,
        })
    }

    /// Composite on the trend window minus composite on the window before it
    fn composite_delta(&self, rows: &[FeatureRow]) -> Option<f64> {
        let w = self.config.trend_window_days;
        if rows.len() < 2 * w {
            return None;
        }
        let current = composite_of(&rows[rows.len() - w..])?;
        let prior = composite_of(&rows[rows.len() - 2 * w..rows.len() - w])?;
        Some(current - prior)
    }
}

/// Weighted composite over whichever domains have data in the slice
fn composite_of(window: &[FeatureRow]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for domain in Domain::ALL {
        if let Some(score) = score_domain(domain, window) {
            weighted += domain.weight() * score;
            total_weight += domain.weight();
        }
    }
    if total_weight > 0.0 {
        Some(weighted / total_weight)
    } else {
        None
    }
}

/// Present values of one column over a row slice
fn window_values(window: &[FeatureRow], column: &str) -> Vec<f64> {
    window.iter().filter_map(|row| row.get(column)).collect()
}

/// Fraction of days where an indicator column is set
fn indicator_fraction(window: &[FeatureRow], column: &str) -> Option<f64> {
    let values = window_values(window, column);
    if values.is_empty() {
        return None;
    }
    Some(values.iter().filter(|&&v| v >= 0.5).count() as f64 / values.len() as f64)
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// 0-100 sub-score for a domain, `None` when its metrics are absent
fn score_domain(domain: Domain, window: &[FeatureRow]) -> Option<f64> {
    match domain {
        // Optimal fasting glucose 85 mg/dL, two points per mg/dL above
        Domain::GlucoseControl => {
            let values = window_values(window, "fg_fast_mgdl");
            if values.is_empty() {
                return None;
            }
            Some(clamp_score(100.0 - (mean(&values) - 85.0) * 2.0))
        }
        // Linear to an 8-hour target
        Domain::SleepQuality => {
            let values = window_values(window, "sleep_hours");
            if values.is_empty() {
                return None;
            }
            Some(clamp_score(mean(&values) / 8.0 * 100.0))
        }
        // HRV 30-50 ms mapped onto 0-100
        Domain::Recovery => {
            let values = window_values(window, "hrv");
            if values.is_empty() {
                return None;
            }
            Some(clamp_score((mean(&values) - 30.0) / 20.0 * 100.0))
        }
        // Fiber toward 25 g, late-meal penalty, post-meal-walk bonus
        Domain::Nutrition => {
            let fiber = window_values(window, "fiber_g");
            if fiber.is_empty() {
                return None;
            }
            let fiber_score = clamp_score(mean(&fiber) / 25.0 * 100.0);
            let timing_score = indicator_fraction(window, "late_meal")
                .map_or(100.0, |frac| clamp_score(100.0 - frac * 100.0));
            let walk_score =
                indicator_fraction(window, "post_meal_walk10").map_or(0.0, |frac| frac * 100.0);
            Some((fiber_score + timing_score + walk_score) / 3.0)
        }
        // Linear to a 10k-step target
        Domain::Activity => {
            let values = window_values(window, "steps");
            if values.is_empty() {
                return None;
            }
            Some(clamp_score(mean(&values) / 10_000.0 * 100.0))
        }
    }
}

/// Whether larger raw values of the domain's anchor metric are better
fn higher_is_better(domain: Domain) -> bool {
    !matches!(domain, Domain::GlucoseControl)
}

fn domain_anchor(domain: Domain) -> &'static str {
    match domain {
        Domain::GlucoseControl => "fg_fast_mgdl",
        Domain::SleepQuality => "sleep_hours",
        Domain::Recovery => "hrv",
        Domain::Nutrition => "fiber_g",
        Domain::Activity => "steps",
    }
}

/// First-half vs second-half comparison of the domain's anchor metric
/// within the scored window, with a 5% dead band
fn domain_trend(domain: Domain, window: &[FeatureRow]) -> TrendDirection {
    let values = window_values(window, domain_anchor(domain));
    if values.len() < 7 {
        return TrendDirection::Unknown;
    }
    let half = values.len() / 2;
    let first = mean(&values[..half]);
    let second = mean(&values[values.len() - half..]);

    let raw = if second > first * 1.05 {
        TrendDirection::Improving
    } else if second < first * 0.95 {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    match (raw, higher_is_better(domain)) {
        (TrendDirection::Improving, false) => TrendDirection::Declining,
        (TrendDirection::Declining, false) => TrendDirection::Improving,
        (other, _) => other,
    }
}

fn grade(composite: f64) -> &'static str {
    match composite {
        c if c >= 90.0 => "A+",
        c if c >= 85.0 => "A",
        c if c >= 80.0 => "A-",
        c if c >= 75.0 => "B+",
        c if c >= 70.0 => "B",
        c if c >= 65.0 => "B-",
        c if c >= 60.0 => "C+",
        c if c >= 55.0 => "C",
        c if c >= 50.0 => "C-",
        _ => "D",
    }
}

fn interpret_overall(composite: f64) -> &'static str {
    match composite {
        c if c >= 85.0 => "Outstanding metabolic health",
        c if c >= 70.0 => "Good metabolic health",
        c if c >= 55.0 => "Moderate metabolic health - some areas need attention",
        _ => "Poor metabolic health - significant improvements needed",
    }
}

fn interpret_domain(domain: Domain, score: f64) -> &'static str {
    match domain {
        Domain::GlucoseControl => match score {
            s if s >= 90.0 => "Excellent glucose control",
            s if s >= 75.0 => "Good glucose control",
            s if s >= 60.0 => "Moderate glucose control - room for improvement",
            _ => "Poor glucose control - needs attention",
        },
        Domain::SleepQuality => match score {
            s if s >= 90.0 => "Excellent sleep quality",
            s if s >= 75.0 => "Good sleep quality",
            s if s >= 60.0 => "Moderate sleep quality - could be better",
            _ => "Poor sleep quality - needs improvement",
        },
        Domain::Recovery => match score {
            s if s >= 80.0 => "Excellent recovery and stress resilience",
            s if s >= 60.0 => "Good recovery",
            s if s >= 40.0 => "Moderate recovery - consider stress management",
            _ => "Poor recovery - high stress levels",
        },
        Domain::Nutrition => match score {
            s if s >= 80.0 => "Excellent nutrition habits",
            s if s >= 65.0 => "Good nutrition habits",
            s if s >= 50.0 => "Moderate nutrition - some improvements needed",
            _ => "Poor nutrition habits - needs significant improvement",
        },
        Domain::Activity => match score {
            s if s >= 90.0 => "Excellent activity level",
            s if s >= 75.0 => "Good activity level",
            s if s >= 60.0 => "Moderate activity - could be more active",
            _ => "Low activity - needs more movement",
        },
    }
}

fn build_recommendations(domains: &[DomainScore], composite: f64) -> Vec<Recommendation> {
    let score_of = |domain: Domain| {
        domains
            .iter()
            .find(|d| d.domain == domain)
            .map(|d| d.score)
    };
    let mut recommendations = Vec::new();

    if score_of(Domain::GlucoseControl).is_some_and(|s| s < 70.0) {
        recommendations.push(Recommendation {
            priority: Priority::High,
            domain: Some(Domain::GlucoseControl),
            title: "Improve Glucose Control",
            description: "Your fasting glucose levels need attention",
            actions: vec![
                "Increase fiber intake to 25g+ daily",
                "Take 10-minute walks after meals",
                "Avoid late dinners",
                "Target 7-8 hours of sleep nightly",
            ],
            expected_impact: "Could improve glucose score by 15-20 points in 2 weeks",
        });
    }
    if score_of(Domain::SleepQuality).is_some_and(|s| s < 75.0) {
        recommendations.push(Recommendation {
            priority: Priority::High,
            domain: Some(Domain::SleepQuality),
            title: "Optimize Sleep Quality",
            description: "Sleep quality is impacting your metabolic health",
            actions: vec![
                "Maintain a consistent sleep schedule",
                "Avoid screens an hour before bed",
                "Keep the bedroom cool",
                "Limit caffeine after 2 PM",
            ],
            expected_impact: "Could improve sleep score by 10-15 points in 1 week",
        });
    }
    if score_of(Domain::Recovery).is_some_and(|s| s < 60.0) {
        recommendations.push(Recommendation {
            priority: Priority::Medium,
            domain: Some(Domain::Recovery),
            title: "Enhance Recovery",
            description: "Your HRV indicates high stress levels",
            actions: vec![
                "Practice 10 minutes of meditation daily",
                "Take regular breaks during work",
                "Engage in light exercise",
                "Consider stress management techniques",
            ],
            expected_impact: "Could improve recovery score by 10-20 points in 2-3 weeks",
        });
    }
    if score_of(Domain::Nutrition).is_some_and(|s| s < 65.0) {
        recommendations.push(Recommendation {
            priority: Priority::Medium,
            domain: Some(Domain::Nutrition),
            title: "Improve Nutrition Habits",
            description: "Nutrition patterns need optimization",
            actions: vec![
                "Increase fiber-rich foods",
                "Eat dinner earlier",
                "Take short walks after meals",
                "Balance macronutrients",
            ],
            expected_impact: "Could improve nutrition score by 15-25 points in 2 weeks",
        });
    }
    if composite >= 80.0 {
        recommendations.push(Recommendation {
            priority: Priority::Low,
            domain: None,
            title: "Maintain Excellent Health",
            description: "Current habits are working",
            actions: vec![
                "Continue current healthy habits",
                "Monitor trends regularly",
            ],
            expected_impact: "Maintain current health status",
        });
    }
    recommendations
}
