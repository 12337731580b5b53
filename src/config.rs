//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Every statistical default (significance level, window lengths, minimum
//! sample sizes, clipping bounds) is a named field here rather than a magic
//! number inside an analysis stage.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Analysis engine configuration
///
/// Defaults follow the original product documentation where it pinned a
/// value, and common statistical practice where it did not.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Significance level for correlation suppression (after BH adjustment)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Minimum aligned sample size before a correlation is emitted
    #[serde(default = "default_correlation_min_samples")]
    pub correlation_min_samples: usize,

    /// Maximum lag (days) scanned by the correlation engine
    #[serde(default = "default_max_lag_days")]
    pub max_lag_days: usize,

    /// Metrics entered into the pairwise correlation scan
    #[serde(default = "default_correlation_metrics")]
    pub correlation_metrics: Vec<String>,

    /// Minimum complete cases for a causal effect estimate
    #[serde(default = "default_causal_min_samples")]
    pub causal_min_samples: usize,

    /// Minimum observations required in each exposure arm
    #[serde(default = "default_causal_min_arm")]
    pub causal_min_arm: usize,

    /// Propensity scores are clipped to [epsilon, 1 - epsilon]
    #[serde(default = "default_propensity_clip")]
    pub propensity_clip: f64,

    /// Post-weighting standardized mean difference bound per covariate
    #[serde(default = "default_balance_threshold")]
    pub balance_threshold: f64,

    /// Bootstrap replicates for the causal confidence interval
    #[serde(default = "default_bootstrap_replicates")]
    pub bootstrap_replicates: usize,

    /// Rolling window length (observations) for anomaly median/MAD
    #[serde(default = "default_anomaly_window")]
    pub anomaly_window: usize,

    /// Minimum observations in the window before scoring starts
    #[serde(default = "default_anomaly_min_periods")]
    pub anomaly_min_periods: usize,

    /// Floor applied to MAD when a window is (near-)constant. Near-constant
    /// series therefore yield saturated scores for any real deviation.
    #[serde(default = "default_mad_epsilon")]
    pub mad_epsilon: f64,

    /// Scale making MAD a consistent estimator of sigma under normality
    #[serde(default = "default_mad_scale")]
    pub mad_scale: f64,

    /// Deviation score at or above which an observation is moderate
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,

    /// Deviation score at or above which an observation is severe
    #[serde(default = "default_severe_threshold")]
    pub severe_threshold: f64,

    /// Consecutive anomalies at which severity is escalated
    #[serde(default = "default_streak_escalation")]
    pub streak_escalation: usize,

    /// Metrics scanned by the anomaly detector
    #[serde(default = "default_anomaly_metrics")]
    pub anomaly_metrics: Vec<String>,

    /// Forward-fill gap limit (days) during feature engineering
    #[serde(default = "default_forward_fill_limit")]
    pub forward_fill_limit_days: usize,

    /// Rolling average windows (days) derived per base metric
    #[serde(default = "default_rolling_windows")]
    pub rolling_windows: Vec<usize>,

    /// Allow rolling windows to shrink at the start of the series instead
    /// of producing null
    #[serde(default)]
    pub allow_partial_windows: bool,

    /// Number of trees in the predictive ensemble
    #[serde(default = "default_forest_trees")]
    pub forest_trees: usize,

    /// Maximum tree depth
    #[serde(default = "default_forest_max_depth")]
    pub forest_max_depth: usize,

    /// Minimum samples in a leaf
    #[serde(default = "default_forest_min_leaf")]
    pub forest_min_leaf: usize,

    /// Fraction of features considered at each split
    #[serde(default = "default_forest_feature_fraction")]
    pub forest_feature_fraction: f64,

    /// Minimum training rows before the ensemble is fit at all; below this
    /// the model falls back to a population-average heuristic
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Fraction of rows (time-ordered) used for training; the tail is the
    /// validation split
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,

    /// Lower/upper percentile of tree predictions forming the band
    #[serde(default = "default_band_percentiles")]
    pub band_percentiles: (f64, f64),

    /// Features fed to the predictive model
    #[serde(default = "default_prediction_features")]
    pub prediction_features: Vec<String>,

    /// Target column predicted by the ensemble
    #[serde(default = "default_prediction_target")]
    pub prediction_target: String,

    /// Hours of sleep below which a night counts as short sleep
    #[serde(default = "default_low_sleep_threshold")]
    pub low_sleep_threshold: f64,

    /// Days of history scored by the health score engine
    #[serde(default = "default_health_window_days")]
    pub health_window_days: usize,

    /// Window length (days) for trend deltas
    #[serde(default = "default_trend_window_days")]
    pub trend_window_days: usize,

    /// Number of insight cards returned by the composer
    #[serde(default = "default_top_k_insights")]
    pub top_k_insights: usize,

    /// Per-stage time box in milliseconds; stages exceeding it are reported
    /// as not computed
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,

    /// Seed for all randomized procedures (bootstrap, ensemble training)
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_alpha() -> f64 {
    0.05
}

fn default_correlation_min_samples() -> usize {
    10
}

fn default_max_lag_days() -> usize {
    3
}

fn default_correlation_metrics() -> Vec<String> {
    [
        "sleep_hours",
        "hrv",
        "rhr",
        "fg_fast_mgdl",
        "steps",
        "fiber_g",
        "late_meal",
        "post_meal_walk10",
        "meal_auc",
        "meal_peak",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_causal_min_samples() -> usize {
    30
}

fn default_causal_min_arm() -> usize {
    5
}

fn default_propensity_clip() -> f64 {
    0.01
}

fn default_balance_threshold() -> f64 {
    0.25
}

fn default_bootstrap_replicates() -> usize {
    200
}

fn default_anomaly_window() -> usize {
    14
}

fn default_anomaly_min_periods() -> usize {
    7
}

fn default_mad_epsilon() -> f64 {
    1e-6
}

fn default_mad_scale() -> f64 {
    1.4826
}

fn default_moderate_threshold() -> f64 {
    2.0
}

fn default_severe_threshold() -> f64 {
    3.0
}

fn default_streak_escalation() -> usize {
    3
}

fn default_anomaly_metrics() -> Vec<String> {
    ["fg_fast_mgdl", "rhr", "hrv", "sleep_hours"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_forward_fill_limit() -> usize {
    2
}

fn default_rolling_windows() -> Vec<usize> {
    vec![3, 7]
}

fn default_forest_trees() -> usize {
    100
}

fn default_forest_max_depth() -> usize {
    6
}

fn default_forest_min_leaf() -> usize {
    2
}

fn default_forest_feature_fraction() -> f64 {
    1.0 / 3.0
}

fn default_min_training_samples() -> usize {
    20
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_band_percentiles() -> (f64, f64) {
    (10.0, 90.0)
}

fn default_prediction_features() -> Vec<String> {
    [
        "carbs_g",
        "protein_g",
        "fat_g",
        "fiber_g",
        "carbs_pct",
        "late_meal",
        "post_meal_walk10",
        "sleep_hours_avg3d",
        "hrv_avg3d",
        "rhr_avg3d",
        "fg_fast_mgdl_avg3d",
        "steps_avg3d",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_prediction_target() -> String {
    "meal_auc".to_string()
}

fn default_low_sleep_threshold() -> f64 {
    6.0
}

fn default_health_window_days() -> usize {
    30
}

fn default_trend_window_days() -> usize {
    7
}

fn default_top_k_insights() -> usize {
    5
}

fn default_stage_timeout_ms() -> u64 {
    10_000
}

fn default_seed() -> u64 {
    42
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            correlation_min_samples: default_correlation_min_samples(),
            max_lag_days: default_max_lag_days(),
            correlation_metrics: default_correlation_metrics(),
            causal_min_samples: default_causal_min_samples(),
            causal_min_arm: default_causal_min_arm(),
            propensity_clip: default_propensity_clip(),
            balance_threshold: default_balance_threshold(),
            bootstrap_replicates: default_bootstrap_replicates(),
            anomaly_window: default_anomaly_window(),
            anomaly_min_periods: default_anomaly_min_periods(),
            mad_epsilon: default_mad_epsilon(),
            mad_scale: default_mad_scale(),
            moderate_threshold: default_moderate_threshold(),
            severe_threshold: default_severe_threshold(),
            streak_escalation: default_streak_escalation(),
            anomaly_metrics: default_anomaly_metrics(),
            forward_fill_limit_days: default_forward_fill_limit(),
            rolling_windows: default_rolling_windows(),
            allow_partial_windows: false,
            forest_trees: default_forest_trees(),
            forest_max_depth: default_forest_max_depth(),
            forest_min_leaf: default_forest_min_leaf(),
            forest_feature_fraction: default_forest_feature_fraction(),
            min_training_samples: default_min_training_samples(),
            train_fraction: default_train_fraction(),
            band_percentiles: default_band_percentiles(),
            prediction_features: default_prediction_features(),
            prediction_target: default_prediction_target(),
            low_sleep_threshold: default_low_sleep_threshold(),
            health_window_days: default_health_window_days(),
            trend_window_days: default_trend_window_days(),
            top_k_insights: default_top_k_insights(),
            stage_timeout_ms: default_stage_timeout_ms(),
            seed: default_seed(),
        }
    }
}

impl AnalysisConfig {
    /// Per-stage time box as a [`Duration`]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("meridian").join("config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(alpha) = std::env::var("MERIDIAN_ALPHA") {
            if let Ok(a) = alpha.parse() {
                self.analysis.alpha = a;
            }
        }
        if let Ok(seed) = std::env::var("MERIDIAN_SEED") {
            if let Ok(s) = seed.parse() {
                self.analysis.seed = s;
            }
        }
        if let Ok(timeout) = std::env::var("MERIDIAN_STAGE_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.analysis.stage_timeout_ms = t;
            }
        }
        if let Ok(level) = std::env::var("MERIDIAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MERIDIAN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}
