//! Descriptive statistics
//!
//! All functions take plain `&[f64]` slices of already-filtered (non-null)
//! observations and are total: empty input yields a defined value rather
//! than a panic.

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator); 0.0 below two observations
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Sample standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Median; 0.0 for an empty slice
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around the median (unscaled)
pub fn median_abs_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Percentile in [0, 100] with linear interpolation between order statistics
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Average ranks (1-based), ties receive the mean of their positions
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Positions i..=j share the same value
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            result[order[k]] = avg_rank;
        }
        i = j + 1;
    }
    result
}

/// Chi-squared(2) critical value at the 5% level, used by the Jarque-Bera
/// gate below
const JARQUE_BERA_CRITICAL: f64 = 5.991;

/// Jarque-Bera normality check: true when the sample's skewness and excess
/// kurtosis are jointly consistent with normality at the 5% level.
/// Small samples (< 8) are treated as non-normal.
pub fn looks_normal(values: &[f64]) -> bool {
    let n = values.len();
    if n < 8 {
        return false;
    }
    let m = mean(values);
    let nf = n as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    if m2 <= f64::EPSILON {
        return false;
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / nf;

    let skewness = m3 / m2.powf(1.5);
    let excess_kurtosis = m4 / (m2 * m2) - 3.0;
    let jb = nf / 6.0 * (skewness.powi(2) + excess_kurtosis.powi(2) / 4.0);
    jb < JARQUE_BERA_CRITICAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-9);
        assert!((variance(&values) - 32.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_slices_are_total() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median_abs_deviation(&[]), 0.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_mad_of_constant_is_zero() {
        assert_eq!(median_abs_deviation(&[5.0; 10]), 0.0);
    }

    #[test]
    fn test_mad_known_value() {
        // median = 2, |x - 2| = [1, 0, 0, 1, 2], MAD = 1
        let values = vec![1.0, 2.0, 2.0, 3.0, 4.0];
        assert_eq!(median_abs_deviation(&values), 1.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
        assert!((percentile(&values, 50.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_ranks_with_ties() {
        let values = vec![10.0, 20.0, 20.0, 30.0];
        assert_eq!(ranks(&values), vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_looks_normal() {
        // A symmetric, light-tailed sample passes
        let sym: Vec<f64> = (0..40).map(|i| (i % 10) as f64).collect();
        assert!(looks_normal(&sym));

        // A heavily skewed sample fails
        let mut skewed = vec![1.0; 40];
        skewed[0] = 1000.0;
        assert!(!looks_normal(&skewed));

        // Tiny samples never pass
        assert!(!looks_normal(&[1.0, 2.0, 3.0]));
    }
}
