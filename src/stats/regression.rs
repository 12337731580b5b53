//! Small dense regression solvers
//!
//! The causal stage fits a logistic propensity model and per-arm linear
//! outcome models over a handful of covariates, so plain normal equations
//! and Newton-Raphson are enough. Both solvers add a small ridge term to
//! keep near-collinear designs solvable.

use crate::analysis::AnalysisError;

/// Ridge added to the normal-equation / Hessian diagonal
const RIDGE: f64 = 1e-8;

/// Newton-Raphson iteration cap for the logistic fit
const MAX_NEWTON_ITERATIONS: usize = 50;

/// Convergence tolerance on the Newton step
const NEWTON_TOLERANCE: f64 = 1e-8;

/// Fitted linear model (intercept first)
#[derive(Debug, Clone)]
pub struct LinearModel {
    coefficients: Vec<f64>,
}

impl LinearModel {
    /// Predicted value for one covariate row
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut y = self.coefficients[0];
        for (beta, x) in self.coefficients[1..].iter().zip(row) {
            y += beta * x;
        }
        y
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

/// Fitted logistic model (intercept first)
#[derive(Debug, Clone)]
pub struct LogisticModel {
    coefficients: Vec<f64>,
}

impl LogisticModel {
    /// Predicted probability for one covariate row
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut z = self.coefficients[0];
        for (beta, x) in self.coefficients[1..].iter().zip(row) {
            z += beta * x;
        }
        sigmoid(z)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Ordinary least squares via ridge-stabilized normal equations
pub fn fit_linear(rows: &[Vec<f64>], y: &[f64]) -> Result<LinearModel, AnalysisError> {
    if rows.is_empty() || rows.len() != y.len() {
        return Err(AnalysisError::NumericalInstability(
            "empty or mismatched design for linear fit".to_string(),
        ));
    }
    let p = rows[0].len() + 1; // intercept column

    // X'X and X'y with an implicit leading 1 per row
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, &target) in rows.iter().zip(y) {
        let mut design = Vec::with_capacity(p);
        design.push(1.0);
        design.extend_from_slice(row);
        for i in 0..p {
            xty[i] += design[i] * target;
            for j in 0..p {
                xtx[i][j] += design[i] * design[j];
            }
        }
    }
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += RIDGE;
    }

    let coefficients = solve(xtx, xty)?;
    Ok(LinearModel { coefficients })
}

/// Logistic regression via Newton-Raphson
///
/// `y` must be 0/1. Returns [`AnalysisError::ModelConvergence`] when the
/// iteration does not settle within the cap.
pub fn fit_logistic(rows: &[Vec<f64>], y: &[f64]) -> Result<LogisticModel, AnalysisError> {
    if rows.is_empty() || rows.len() != y.len() {
        return Err(AnalysisError::NumericalInstability(
            "empty or mismatched design for logistic fit".to_string(),
        ));
    }
    let p = rows[0].len() + 1;
    let mut beta = vec![0.0; p];

    let design: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| {
            let mut d = Vec::with_capacity(p);
            d.push(1.0);
            d.extend_from_slice(row);
            d
        })
        .collect();

    for _ in 0..MAX_NEWTON_ITERATIONS {
        // Gradient X'(y - p) and Hessian X'WX, W = diag(p(1-p))
        let mut gradient = vec![0.0; p];
        let mut hessian = vec![vec![0.0; p]; p];
        for (row, &target) in design.iter().zip(y) {
            let z: f64 = beta.iter().zip(row).map(|(b, x)| b * x).sum();
            let prob = sigmoid(z).clamp(1e-10, 1.0 - 1e-10);
            let weight = (prob * (1.0 - prob)).max(1e-10);
            for i in 0..p {
                gradient[i] += row[i] * (target - prob);
                for j in 0..p {
                    hessian[i][j] += row[i] * weight * row[j];
                }
            }
        }
        for (i, row) in hessian.iter_mut().enumerate() {
            row[i] += RIDGE;
        }

        let step = solve(hessian, gradient)?;
        let max_step = step.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
        for (b, s) in beta.iter_mut().zip(&step) {
            *b += s;
        }
        if max_step < NEWTON_TOLERANCE {
            return Ok(LogisticModel { coefficients: beta });
        }
    }

    Err(AnalysisError::ModelConvergence(format!(
        "logistic fit did not converge in {} iterations",
        MAX_NEWTON_ITERATIONS
    )))
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, AnalysisError> {
    let n = b.len();
    for col in 0..n {
        // Pivot on the largest remaining magnitude
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-12 {
            return Err(AnalysisError::NumericalInstability(
                "singular system in regression solve".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_recovers_exact_coefficients() {
        // y = 2 + 3a - b
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, (i * i % 7) as f64])
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 + 3.0 * r[0] - r[1]).collect();

        let model = fit_linear(&rows, &y).unwrap();
        let c = model.coefficients();
        assert!((c[0] - 2.0).abs() < 1e-4);
        assert!((c[1] - 3.0).abs() < 1e-4);
        assert!((c[2] + 1.0).abs() < 1e-4);
        assert!((model.predict(&[10.0, 2.0]) - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_linear_empty_design_errors() {
        assert!(fit_linear(&[], &[]).is_err());
    }

    #[test]
    fn test_logistic_separates_threshold() {
        // Exposure mostly follows x > 5, with overlap near the boundary so
        // the likelihood has a finite maximum
        let rows: Vec<Vec<f64>> = (0..60).map(|i| vec![(i % 12) as f64]).collect();
        let y: Vec<f64> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                if r[0] > 6.0 {
                    1.0
                } else if r[0] < 5.0 {
                    0.0
                } else {
                    ((i / 12) % 2) as f64
                }
            })
            .collect();

        let model = fit_logistic(&rows, &y).unwrap();
        assert!(model.predict_proba(&[11.0]) > 0.9);
        assert!(model.predict_proba(&[0.0]) < 0.1);
        // Monotone in the single covariate
        assert!(model.predict_proba(&[8.0]) > model.predict_proba(&[3.0]));
    }

    #[test]
    fn test_logistic_balanced_noise_near_half() {
        // Covariate carries no signal: probability stays near the base rate
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 5) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| (i % 2) as f64).collect();
        let model = fit_logistic(&rows, &y).unwrap();
        let p = model.predict_proba(&[2.0]);
        assert!((p - 0.5).abs() < 0.1);
    }

    #[test]
    fn test_solve_singular_is_error() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let b = vec![1.0, 2.0];
        assert!(matches!(
            solve(a, b),
            Err(AnalysisError::NumericalInstability(_))
        ));
    }
}
