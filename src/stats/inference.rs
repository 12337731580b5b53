//! Correlation coefficients, significance, and interval machinery
//!
//! Pearson and Spearman coefficients with Student-t p-values, Fisher
//! z-transform confidence intervals, and Benjamini-Hochberg adjustment for
//! the correlation engine's multiple comparisons.

use super::descriptive::ranks;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Pearson correlation coefficient
///
/// Returns a value between -1 and 1:
/// - 1: perfect positive correlation
/// - 0: no correlation
/// - -1: perfect negative correlation
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }

    let n = x.len() as f64;

    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();
    let sum_y2: f64 = y.iter().map(|b| b * b).sum();

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = ((n * sum_x2 - sum_x.powi(2)) * (n * sum_y2 - sum_y.powi(2))).sqrt();

    if denominator == 0.0 {
        0.0
    } else {
        (numerator / denominator).clamp(-1.0, 1.0)
    }
}

/// Spearman rank correlation: Pearson on average ranks, robust to monotone
/// but non-linear relationships
pub fn spearman_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    pearson_correlation(&ranks(x), &ranks(y))
}

/// Two-sided p-value for a correlation coefficient via the exact t
/// transform: t = r * sqrt((n - 2) / (1 - r^2)) with n - 2 degrees of
/// freedom. Applies to both Pearson and (approximately) Spearman.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let r = r.clamp(-1.0, 1.0);
    if (1.0 - r * r) < 1e-12 {
        // |r| at machine 1: significance is as strong as it gets
        return 0.0;
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Fisher z-transform confidence interval for a correlation coefficient at
/// level `1 - alpha`
pub fn fisher_z_interval(r: f64, n: usize, alpha: f64) -> (f64, f64) {
    if n < 4 {
        return (-1.0, 1.0);
    }
    let r = r.clamp(-0.999_999, 0.999_999);
    let z = r.atanh();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    let z_crit = match Normal::new(0.0, 1.0) {
        Ok(dist) => dist.inverse_cdf(1.0 - alpha / 2.0),
        Err(_) => return (-1.0, 1.0),
    };
    ((z - z_crit * se).tanh(), (z + z_crit * se).tanh())
}

/// Benjamini-Hochberg adjusted p-values for one family of tests
///
/// The adjusted value for the i-th smallest p is min over j >= i of
/// p_(j) * m / j, capped at 1. Input order is preserved in the output.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut adjusted = vec![0.0; m];
    let mut running = 1.0_f64;
    for rank in (0..m).rev() {
        let idx = order[rank];
        let candidate = (p_values[idx] * m as f64 / (rank + 1) as f64).min(1.0);
        running = running.min(candidate);
        adjusted[idx] = running;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_positive() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let r = pearson_correlation(&x, &y);
        assert!((r - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_pearson_perfect_negative() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![10.0, 8.0, 6.0, 4.0, 2.0];
        let r = pearson_correlation(&x, &y);
        assert!((r + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_pearson_empty() {
        assert_eq!(pearson_correlation(&[], &[]), 0.0);
    }

    #[test]
    fn test_pearson_constant_series() {
        let x = vec![5.0; 10];
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(pearson_correlation(&x, &y), 0.0);
    }

    #[test]
    fn test_spearman_monotone_nonlinear() {
        // Exponential is monotone: Spearman sees it as perfect
        let x: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v.exp()).collect();
        assert!((spearman_correlation(&x, &y) - 1.0).abs() < 1e-9);
        assert!(pearson_correlation(&x, &y) < 0.95);
    }

    #[test]
    fn test_p_value_bounds_and_monotonicity() {
        // Identical increasing series: r = 1, p ~ 0
        let p_strong = correlation_p_value(0.999_999_9, 30);
        assert!(p_strong < 1e-6);

        let p_weak = correlation_p_value(0.1, 30);
        assert!(p_weak > 0.5);
        assert!((0.0..=1.0).contains(&p_weak));

        // Larger samples shrink the p-value for the same r
        assert!(correlation_p_value(0.5, 50) < correlation_p_value(0.5, 12));
    }

    #[test]
    fn test_p_value_degenerate_n() {
        assert_eq!(correlation_p_value(0.9, 2), 1.0);
    }

    #[test]
    fn test_fisher_interval_brackets_r() {
        let (lo, hi) = fisher_z_interval(0.6, 30, 0.05);
        assert!(lo < 0.6 && 0.6 < hi);
        assert!(lo > -1.0 && hi < 1.0);

        // Tighter with more data
        let (lo_big, hi_big) = fisher_z_interval(0.6, 300, 0.05);
        assert!(hi_big - lo_big < hi - lo);
    }

    #[test]
    fn test_benjamini_hochberg_known_example() {
        let p = vec![0.01, 0.04, 0.03, 0.005];
        let adj = benjamini_hochberg(&p);
        // Sorted: 0.005, 0.01, 0.03, 0.04 ->
        // raw steps: 0.02, 0.02, 0.04, 0.04; cummin from the top keeps them
        assert!((adj[3] - 0.02).abs() < 1e-9);
        assert!((adj[0] - 0.02).abs() < 1e-9);
        assert!((adj[2] - 0.04).abs() < 1e-9);
        assert!((adj[1] - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_benjamini_hochberg_monotone_and_bounded() {
        let p = vec![0.001, 0.2, 0.9, 0.04, 0.5];
        let adj = benjamini_hochberg(&p);
        for (raw, a) in p.iter().zip(adj.iter()) {
            assert!(a >= raw);
            assert!(*a <= 1.0);
        }
    }

    #[test]
    fn test_benjamini_hochberg_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
