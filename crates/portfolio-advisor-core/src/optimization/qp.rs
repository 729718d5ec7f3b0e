//! Convex quadratic programming by operator splitting (ADMM).
//!
//! Solves
//!
//! ```text
//! minimize    ½ xᵀPx + qᵀx
//! subject to  l ≤ Ax ≤ u
//! ```
//!
//! for positive-semidefinite `P`. Each iteration solves one linear system
//! with the fixed matrix `P + σI + Aᵀ diag(ρ) A`, factorized once by
//! Cholesky and refactorized only when the step size ρ is rebalanced.
//! Equality rows (`l == u`) get a stiffer ρ. Convex problems have no local
//! optima, so convergence of the residuals means a global solution.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PortfolioError;
use crate::PortfolioResult;

const EQUALITY_RHO_SCALE: f64 = 1e3;
const RHO_MIN: f64 = 1e-6;
const RHO_MAX: f64 = 1e6;
/// Iterations between checks for a ρ rebalance.
const ADAPT_INTERVAL: usize = 25;
/// Residual imbalance that triggers a rebalance.
const ADAPT_TOLERANCE: f64 = 5.0;

/// Tuning knobs for the ADMM solver and the definiteness check done before
/// it runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: usize,
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Initial ADMM step size.
    pub rho: f64,
    /// Proximal regularization keeping the linear system definite.
    pub sigma: f64,
    /// Over-relaxation parameter in (0, 2).
    pub alpha: f64,
    /// Smallest accepted ratio of min to max covariance eigenvalue.
    pub min_eigenvalue_ratio: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iterations: 20_000,
            eps_abs: 1e-9,
            eps_rel: 1e-9,
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            min_eigenvalue_ratio: 1e-10,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> PortfolioResult<()> {
        if self.max_iterations == 0 {
            return Err(PortfolioError::invalid(
                "solver.max_iterations",
                "must be positive",
            ));
        }
        let positive = [
            ("solver.eps_abs", self.eps_abs),
            ("solver.eps_rel", self.eps_rel),
            ("solver.rho", self.rho),
            ("solver.sigma", self.sigma),
            ("solver.min_eigenvalue_ratio", self.min_eigenvalue_ratio),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(PortfolioError::invalid(
                    field,
                    format!("must be a positive number, got {}", value),
                ));
            }
        }
        if !(self.alpha > 0.0 && self.alpha < 2.0) {
            return Err(PortfolioError::invalid(
                "solver.alpha",
                format!("must lie in (0, 2), got {}", self.alpha),
            ));
        }
        Ok(())
    }
}

/// `minimize ½ xᵀPx + qᵀx  s.t.  lower ≤ Ax ≤ upper`. Infinite bounds are
/// allowed.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub a: DMatrix<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QpStatus {
    Solved,
    MaxIterationsReached,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    /// Constraint multipliers.
    pub y: DVector<f64>,
    pub status: QpStatus,
    pub iterations: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    #[error("constraint row {row} has lower bound {lower} above upper bound {upper}")]
    InvertedBounds { row: usize, lower: f64, upper: f64 },

    #[error("linear system P + sigma*I + A'RA is not positive-definite")]
    Factorization,
}

/// Run ADMM from a cold start.
pub fn solve(problem: &QuadraticProgram, settings: &SolverSettings) -> Result<QpSolution, QpError> {
    let (n, m) = check_dimensions(problem)?;
    let QuadraticProgram {
        p,
        q,
        a,
        lower,
        upper,
    } = problem;

    let is_equality: Vec<bool> = (0..m).map(|i| lower[i] == upper[i]).collect();
    let mut rho_base = settings.rho;
    let mut rho = row_rho(&is_equality, rho_base);
    let mut kkt = factorize(p, a, &rho, settings.sigma)?;

    let sigma = settings.sigma;
    let alpha = settings.alpha;
    let mut x = DVector::<f64>::zeros(n);
    let mut z = DVector::<f64>::zeros(m);
    let mut y = DVector::<f64>::zeros(m);
    let mut primal_residual = f64::INFINITY;
    let mut dual_residual = f64::INFINITY;

    for iteration in 1..=settings.max_iterations {
        // x-update: (P + σI + AᵀRA) x̃ = σx − q + Aᵀ(Rz − y)
        let rz_minus_y = rho.component_mul(&z) - &y;
        let rhs = &x * sigma - q + a.transpose() * rz_minus_y;
        let x_tilde = kkt.solve(&rhs);
        let z_tilde = a * &x_tilde;

        let x_next = &x_tilde * alpha + &x * (1.0 - alpha);
        let z_relaxed = &z_tilde * alpha + &z * (1.0 - alpha);
        let z_next = DVector::from_fn(m, |i, _| {
            (z_relaxed[i] + y[i] / rho[i]).max(lower[i]).min(upper[i])
        });
        y += rho.component_mul(&(&z_relaxed - &z_next));
        x = x_next;
        z = z_next;

        let ax = a * &x;
        let px = p * &x;
        let aty = a.transpose() * &y;
        primal_residual = inf_norm(&(&ax - &z));
        dual_residual = inf_norm(&(&px + q + &aty));

        let primal_scale = inf_norm(&ax).max(inf_norm(&z));
        let dual_scale = inf_norm(&px).max(inf_norm(&aty)).max(inf_norm(q));
        let eps_primal = settings.eps_abs + settings.eps_rel * primal_scale;
        let eps_dual = settings.eps_abs + settings.eps_rel * dual_scale;

        if primal_residual <= eps_primal && dual_residual <= eps_dual {
            return Ok(QpSolution {
                x,
                y,
                status: QpStatus::Solved,
                iterations: iteration,
                primal_residual,
                dual_residual,
            });
        }

        if iteration % ADAPT_INTERVAL == 0 {
            let primal_ratio = primal_residual / primal_scale.max(1e-30);
            let dual_ratio = dual_residual / dual_scale.max(1e-30);
            if dual_ratio > 0.0 {
                let proposed = (rho_base * (primal_ratio / dual_ratio).sqrt()).clamp(RHO_MIN, RHO_MAX);
                if proposed > rho_base * ADAPT_TOLERANCE || proposed < rho_base / ADAPT_TOLERANCE {
                    rho_base = proposed;
                    rho = row_rho(&is_equality, rho_base);
                    kkt = factorize(p, a, &rho, sigma)?;
                }
            }
        }
    }

    Ok(QpSolution {
        x,
        y,
        status: QpStatus::MaxIterationsReached,
        iterations: settings.max_iterations,
        primal_residual,
        dual_residual,
    })
}

fn check_dimensions(problem: &QuadraticProgram) -> Result<(usize, usize), QpError> {
    let n = problem.p.nrows();
    let m = problem.a.nrows();
    if problem.p.ncols() != n {
        return Err(QpError::Dimension(format!(
            "P is {}x{}",
            n,
            problem.p.ncols()
        )));
    }
    if problem.q.len() != n {
        return Err(QpError::Dimension(format!(
            "q has {} entries for {} variables",
            problem.q.len(),
            n
        )));
    }
    if problem.a.ncols() != n {
        return Err(QpError::Dimension(format!(
            "A has {} columns for {} variables",
            problem.a.ncols(),
            n
        )));
    }
    if problem.lower.len() != m || problem.upper.len() != m {
        return Err(QpError::Dimension(format!(
            "bounds have {}/{} entries for {} constraints",
            problem.lower.len(),
            problem.upper.len(),
            m
        )));
    }
    for row in 0..m {
        if problem.lower[row] > problem.upper[row] {
            return Err(QpError::InvertedBounds {
                row,
                lower: problem.lower[row],
                upper: problem.upper[row],
            });
        }
    }
    Ok((n, m))
}

fn row_rho(is_equality: &[bool], rho: f64) -> DVector<f64> {
    DVector::from_iterator(
        is_equality.len(),
        is_equality
            .iter()
            .map(|eq| if *eq { rho * EQUALITY_RHO_SCALE } else { rho }),
    )
}

fn factorize(
    p: &DMatrix<f64>,
    a: &DMatrix<f64>,
    rho: &DVector<f64>,
    sigma: f64,
) -> Result<Cholesky<f64, Dyn>, QpError> {
    let n = p.nrows();
    let weighted_a = DMatrix::from_fn(a.nrows(), n, |i, j| rho[i] * a[(i, j)]);
    let kkt = p + DMatrix::<f64>::identity(n, n) * sigma + a.transpose() * weighted_a;
    kkt.cholesky().ok_or(QpError::Factorization)
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_equality_constrained_minimum() {
        // min x1² + x2² s.t. x1 + x2 = 1 -> (0.5, 0.5)
        let problem = QuadraticProgram {
            p: DMatrix::identity(2, 2) * 2.0,
            q: DVector::zeros(2),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            lower: DVector::from_element(1, 1.0),
            upper: DVector::from_element(1, 1.0),
        };
        let sol = solve(&problem, &SolverSettings::default()).unwrap();
        assert_eq!(sol.status, QpStatus::Solved);
        assert_abs_diff_eq!(sol.x[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.x[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_active_bound() {
        // min (x - 2)² s.t. 0 <= x <= 1 -> x = 1
        let problem = QuadraticProgram {
            p: DMatrix::from_element(1, 1, 2.0),
            q: DVector::from_element(1, -4.0),
            a: DMatrix::identity(1, 1),
            lower: DVector::from_element(1, 0.0),
            upper: DVector::from_element(1, 1.0),
        };
        let sol = solve(&problem, &SolverSettings::default()).unwrap();
        assert_eq!(sol.status, QpStatus::Solved);
        assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        // Multiplier of the active upper bound: 2(x - 2) + y = 0 -> y = 2
        assert_abs_diff_eq!(sol.y[0], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_one_sided_infinite_bounds() {
        // min x² - 2x s.t. x >= 3 -> x = 3
        let problem = QuadraticProgram {
            p: DMatrix::from_element(1, 1, 2.0),
            q: DVector::from_element(1, -2.0),
            a: DMatrix::identity(1, 1),
            lower: DVector::from_element(1, 3.0),
            upper: DVector::from_element(1, f64::INFINITY),
        };
        let sol = solve(&problem, &SolverSettings::default()).unwrap();
        assert_abs_diff_eq!(sol.x[0], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reports_iteration_cap() {
        let problem = QuadraticProgram {
            p: DMatrix::identity(2, 2) * 2.0,
            q: DVector::from_vec(vec![-1.0, 3.0]),
            a: DMatrix::identity(2, 2),
            lower: DVector::zeros(2),
            upper: DVector::from_element(2, 10.0),
        };
        let settings = SolverSettings {
            max_iterations: 1,
            ..Default::default()
        };
        let sol = solve(&problem, &settings).unwrap();
        assert_eq!(sol.status, QpStatus::MaxIterationsReached);
        assert_eq!(sol.iterations, 1);
    }

    #[test]
    fn test_rejects_bad_shapes_and_bounds() {
        let mut problem = QuadraticProgram {
            p: DMatrix::identity(2, 2),
            q: DVector::zeros(3),
            a: DMatrix::identity(2, 2),
            lower: DVector::zeros(2),
            upper: DVector::zeros(2),
        };
        assert!(matches!(
            solve(&problem, &SolverSettings::default()),
            Err(QpError::Dimension(_))
        ));
        problem.q = DVector::zeros(2);
        problem.lower = DVector::from_element(2, 1.0);
        assert!(matches!(
            solve(&problem, &SolverSettings::default()),
            Err(QpError::InvertedBounds { row: 0, .. })
        ));
    }

    #[test]
    fn test_settings_validation() {
        assert!(SolverSettings::default().validate().is_ok());
        let bad = SolverSettings {
            alpha: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = SolverSettings {
            eps_abs: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
