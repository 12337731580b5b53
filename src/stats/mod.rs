//! Shared numerics for the analysis stages
//!
//! - [`descriptive`]: means, medians, MAD, percentiles, ranks, normality
//! - [`inference`]: correlation coefficients, p-values, confidence
//!   intervals, multiple-comparison adjustment
//! - [`regression`]: small dense OLS and logistic solvers

mod descriptive;
mod inference;
mod regression;

pub use descriptive::{
    looks_normal, mean, median, median_abs_deviation, percentile, ranks, std_dev, variance,
};
pub use inference::{
    benjamini_hochberg, correlation_p_value, fisher_z_interval, pearson_correlation,
    spearman_correlation,
};
pub use regression::{fit_linear, fit_logistic, LinearModel, LogisticModel};
