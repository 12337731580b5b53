//! # Meridian
//!
//! Personal Health Inference Engine - turns irregular, multi-source personal
//! health time series (meals, sleep, activity, vitals) into quantified,
//! confidence-scored insights.
//!
//! ## Features
//!
//! - **Feature engineering**: typed per-day feature table with provenance,
//!   rolling windows, lags, and bounded forward-fill
//! - **Association discovery**: lagged Pearson/Spearman correlations with
//!   Benjamini-Hochberg correction and Fisher-z intervals
//! - **Causal estimation**: doubly robust (AIPW) treatment effects with
//!   bootstrap confidence intervals and validity gates
//! - **Anomaly detection**: rolling median/MAD scoring with severity tiers
//!   and streak escalation
//! - **Forecasting**: seeded bagged regression trees with an uncertainty
//!   band and normalized feature importances
//! - **Scoring and narration**: domain health scores, trends, and ranked
//!   insight cards
//!
//! ## Modules
//!
//! - [`table`]: canonical schema, feature rows, and the feature engineer
//! - [`stats`]: shared numerics (descriptive, inference, regression)
//! - [`analysis`]: the five analysis stages and the insight composer
//! - [`pipeline`]: session context and concurrent stage orchestration
//! - [`synthetic`]: seeded demo data generation
//! - [`config`]: every statistical default as a named configuration field
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meridian::config::Config;
//! use meridian::pipeline::SessionContext;
//! use meridian::synthetic::SyntheticGenerator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let streams = SyntheticGenerator::new(90, config.analysis.seed).generate()?;
//!
//!     let session = SessionContext::new(config.analysis, &streams)?;
//!     let report = session.run().await;
//!
//!     for card in &report.insights {
//!         println!("#{} {}", card.rank, card.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod pipeline;
pub mod stats;
pub mod synthetic;
pub mod table;

pub use analysis::{InsightCard, Outcome};
pub use config::Config;
pub use pipeline::{AnalysisReport, SessionContext};
pub use table::{FeatureTable, MetricSeries};
