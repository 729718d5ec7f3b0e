//! Maximum-Sharpe portfolio on the long-only efficient frontier.
//!
//! Maximizing `(wᵀμ − r_f) / √(wᵀΣw)` over `{Σw = 1, 0 ≤ w ≤ u}` is turned
//! into a convex QP by homogenization: with excess returns `e = μ − r_f`,
//!
//! ```text
//! minimize    yᵀΣy
//! subject to  eᵀy = 1,  y ≥ 0,  yᵢ − u·Σⱼyⱼ ≤ 0
//! ```
//!
//! and `w = y / Σy`. When the closed-form tangency portfolio
//! `Σ⁻¹e / 1ᵀΣ⁻¹e` already satisfies the constraints it is the answer;
//! otherwise the QP goes to the ADMM solver and the result is polished on its
//! support.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::OptimizerConfig;
use crate::error::PortfolioError;
use crate::estimation::{CovarianceMatrix, ReturnVector};
use crate::optimization::qp::{self, QpStatus, QuadraticProgram, SolverSettings};
use crate::types::{InstrumentId, Rate, Weight};
use crate::PortfolioResult;

/// Excess return at or below this counts as none.
const EXCESS_TOLERANCE: f64 = 1e-12;
/// Feasibility slack for the closed-form candidate.
const BOUND_TOLERANCE: f64 = 1e-12;
/// Weights below this are treated as outside the support when polishing.
const SUPPORT_THRESHOLD: f64 = 1e-8;
/// Largest primal residual accepted from a solve that hit its iteration cap.
const ACCEPTABLE_RESIDUAL: f64 = 1e-6;
/// Output guarantees.
const SUM_TOLERANCE: f64 = 1e-6;
const NEGATIVE_TOLERANCE: f64 = 1e-9;
const CAP_TOLERANCE: f64 = 1e-6;

/// Raw solver allocation, in the instrument order of the inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    instruments: Vec<InstrumentId>,
    weights: Vec<Weight>,
}

impl WeightVector {
    pub fn new(instruments: Vec<InstrumentId>, weights: Vec<Weight>) -> PortfolioResult<Self> {
        if instruments.len() != weights.len() {
            return Err(PortfolioError::invalid(
                "weights",
                format!(
                    "{} instruments but {} weights",
                    instruments.len(),
                    weights.len()
                ),
            ));
        }
        Ok(WeightVector {
            instruments,
            weights,
        })
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    pub fn weights(&self) -> &[Weight] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Weight> {
        self.instruments
            .iter()
            .position(|i| i == id)
            .map(|i| self.weights[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstrumentId, Weight)> + '_ {
        self.instruments.iter().zip(self.weights.iter().copied())
    }

    pub fn sum(&self) -> Weight {
        self.weights.iter().sum()
    }
}

impl Serialize for WeightVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (id, w) in self.iter() {
            map.serialize_entry(id, &w)?;
        }
        map.end()
    }
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioPerformance {
    pub expected_return: Rate,
    pub volatility: Rate,
    pub sharpe_ratio: f64,
}

/// Which path produced the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMethod {
    ClosedForm,
    Admm { iterations: usize, polished: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxSharpeSolution {
    pub weights: WeightVector,
    pub performance: PortfolioPerformance,
    pub method: SolveMethod,
}

/// Long-only maximum-Sharpe solver with an optional uniform weight cap.
#[derive(Debug, Clone)]
pub struct FrontierSolver {
    risk_free_rate: Rate,
    max_weight: Weight,
    settings: SolverSettings,
}

impl Default for FrontierSolver {
    fn default() -> Self {
        FrontierSolver::new(0.0)
    }
}

impl FrontierSolver {
    pub fn new(risk_free_rate: Rate) -> Self {
        FrontierSolver {
            risk_free_rate,
            max_weight: 1.0,
            settings: SolverSettings::default(),
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        FrontierSolver {
            risk_free_rate: config.risk_free_rate,
            max_weight: config.upper_bound(),
            settings: config.solver,
        }
    }

    pub fn with_max_weight(mut self, max_weight: Weight) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Find the weights maximizing the Sharpe ratio.
    ///
    /// Fails with `NoPositiveExpectedReturn` when no feasible portfolio beats
    /// the risk-free rate, and with `Optimization` when the covariance matrix
    /// is not positive-definite or the solver does not converge.
    pub fn max_sharpe(
        &self,
        mu: &ReturnVector,
        sigma: &CovarianceMatrix,
    ) -> PortfolioResult<MaxSharpeSolution> {
        let ids = mu.instruments();
        let n = ids.len();
        if n == 0 {
            return Err(PortfolioError::insufficient(ids, "no instruments to allocate"));
        }
        if sigma.instruments() != ids {
            return Err(PortfolioError::optimization(
                ids,
                "covariance matrix instruments differ from the expected-return vector",
            ));
        }

        let cap = self.max_weight;
        if !(cap > 0.0 && cap <= 1.0) {
            return Err(PortfolioError::invalid(
                "max_weight",
                format!("must lie in (0, 1], got {}", cap),
            ));
        }
        if n as f64 * cap < 1.0 - BOUND_TOLERANCE {
            return Err(PortfolioError::invalid(
                "max_weight",
                format!(
                    "{} instruments capped at {} cannot be fully invested",
                    n, cap
                ),
            ));
        }

        let rf = self.risk_free_rate;
        let excess: Vec<f64> = mu.values().iter().map(|m| m - rf).collect();
        if best_capped_excess(&excess, cap) <= EXCESS_TOLERANCE {
            return Err(PortfolioError::NoPositiveExpectedReturn {
                instruments: ids.to_vec(),
                risk_free_rate: rf,
            });
        }

        let cov = sigma.to_matrix();
        check_covariance(&cov, ids, self.settings.min_eigenvalue_ratio)?;

        let (weights, method) = match closed_form(&cov, &excess, cap) {
            Some(w) => {
                debug!("closed-form tangency portfolio is feasible for {} instruments", n);
                (w, SolveMethod::ClosedForm)
            }
            None => self.solve_qp(&cov, &excess, cap, ids)?,
        };

        check_output(&weights, cap, ids)?;
        let performance = portfolio_performance(&weights, mu.values(), &cov, rf);
        Ok(MaxSharpeSolution {
            weights: WeightVector {
                instruments: ids.to_vec(),
                weights,
            },
            performance,
            method,
        })
    }

    fn solve_qp(
        &self,
        cov: &DMatrix<f64>,
        excess: &[f64],
        cap: Weight,
        ids: &[InstrumentId],
    ) -> PortfolioResult<(Vec<f64>, SolveMethod)> {
        let problem = homogenized_program(cov, excess, cap);
        let solution = qp::solve(&problem, &self.settings)
            .map_err(|e| PortfolioError::optimization(ids, e.to_string()))?;

        if solution.status != QpStatus::Solved {
            if solution.primal_residual > ACCEPTABLE_RESIDUAL {
                return Err(PortfolioError::optimization(
                    ids,
                    format!(
                        "solver did not converge after {} iterations (primal residual {:.2e}, dual residual {:.2e})",
                        solution.iterations, solution.primal_residual, solution.dual_residual
                    ),
                ));
            }
            warn!(
                "solver stopped at its iteration cap with primal residual {:.2e}; accepting",
                solution.primal_residual
            );
        }

        let y: Vec<f64> = solution.x.iter().map(|v| v.max(0.0)).collect();
        let total: f64 = y.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(PortfolioError::optimization(
                ids,
                "solver returned a degenerate portfolio",
            ));
        }
        let raw: Vec<f64> = y.iter().map(|v| v / total).collect();
        debug!(
            "ADMM converged in {} iterations (primal residual {:.2e})",
            solution.iterations, solution.primal_residual
        );

        let raw_sharpe = sharpe(&raw, excess, cov);
        match polish(cov, excess, &raw, cap) {
            Some(polished) if sharpe(&polished, excess, cov) >= raw_sharpe - 1e-12 => Ok((
                polished,
                SolveMethod::Admm {
                    iterations: solution.iterations,
                    polished: true,
                },
            )),
            _ => Ok((
                raw,
                SolveMethod::Admm {
                    iterations: solution.iterations,
                    polished: false,
                },
            )),
        }
    }
}

/// Return, volatility and Sharpe ratio of `weights`.
pub fn portfolio_performance(
    weights: &[f64],
    mu: &[f64],
    cov: &DMatrix<f64>,
    risk_free_rate: Rate,
) -> PortfolioPerformance {
    let expected_return: f64 = weights.iter().zip(mu.iter()).map(|(w, m)| w * m).sum();
    let volatility = quad_form(cov, weights).max(0.0).sqrt();
    let sharpe_ratio = if volatility > 0.0 {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    };
    PortfolioPerformance {
        expected_return,
        volatility,
        sharpe_ratio,
    }
}

/// Highest excess return any capped, fully invested portfolio can reach:
/// fill the best instruments up to the cap first.
fn best_capped_excess(excess: &[f64], cap: Weight) -> f64 {
    let mut sorted = excess.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let mut remaining = 1.0;
    let mut best = 0.0;
    for e in sorted {
        if remaining <= 0.0 {
            break;
        }
        let take = cap.min(remaining);
        best += take * e;
        remaining -= take;
    }
    best
}

fn check_covariance(
    cov: &DMatrix<f64>,
    ids: &[InstrumentId],
    min_eigenvalue_ratio: f64,
) -> PortfolioResult<()> {
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(PortfolioError::optimization(
            ids,
            "covariance matrix contains non-finite entries",
        ));
    }
    let n = cov.nrows();
    let scale = cov.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    for i in 0..n {
        for j in (i + 1)..n {
            if (cov[(i, j)] - cov[(j, i)]).abs() > 1e-9 * scale.max(f64::MIN_POSITIVE) {
                return Err(PortfolioError::optimization(
                    ids,
                    format!(
                        "covariance matrix not symmetric: [{},{}]={} != [{},{}]={}",
                        i,
                        j,
                        cov[(i, j)],
                        j,
                        i,
                        cov[(j, i)]
                    ),
                ));
            }
        }
    }

    let eigenvalues = SymmetricEigen::new(cov.clone()).eigenvalues;
    let smallest = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    let largest = eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if largest <= 0.0 || smallest <= largest * min_eigenvalue_ratio {
        return Err(PortfolioError::optimization(
            ids,
            format!(
                "covariance matrix not positive-definite (eigenvalues range {:.3e} to {:.3e})",
                smallest, largest
            ),
        ));
    }
    Ok(())
}

/// Unconstrained tangency portfolio, if it happens to respect `0 ≤ w ≤ cap`.
fn closed_form(cov: &DMatrix<f64>, excess: &[f64], cap: Weight) -> Option<Vec<f64>> {
    let chol = cov.clone().cholesky()?;
    let z = chol.solve(&DVector::from_column_slice(excess));
    let total = z.sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let w: Vec<f64> = z.iter().map(|v| v / total).collect();
    let feasible = w
        .iter()
        .all(|wi| *wi >= -BOUND_TOLERANCE && *wi <= cap + BOUND_TOLERANCE);
    if !feasible {
        return None;
    }
    let clipped: Vec<f64> = w.iter().map(|wi| wi.clamp(0.0, cap)).collect();
    let sum: f64 = clipped.iter().sum();
    Some(clipped.iter().map(|wi| wi / sum).collect())
}

/// QP over `y` with `P = 2Σ`, `q = 0` and rows
/// `[eᵀ] = 1`, `[I] ≥ 0`, and, when capped, `[Iᵢ − cap·1ᵀ] ≤ 0`.
fn homogenized_program(cov: &DMatrix<f64>, excess: &[f64], cap: Weight) -> QuadraticProgram {
    let n = cov.nrows();
    let capped = cap < 1.0;
    let m = 1 + n + if capped { n } else { 0 };

    let mut a = DMatrix::<f64>::zeros(m, n);
    let mut lower = DVector::<f64>::zeros(m);
    let mut upper = DVector::<f64>::zeros(m);

    for j in 0..n {
        a[(0, j)] = excess[j];
    }
    lower[0] = 1.0;
    upper[0] = 1.0;

    for i in 0..n {
        a[(1 + i, i)] = 1.0;
        lower[1 + i] = 0.0;
        upper[1 + i] = f64::INFINITY;
    }

    if capped {
        for i in 0..n {
            let row = 1 + n + i;
            for j in 0..n {
                a[(row, j)] = if i == j { 1.0 - cap } else { -cap };
            }
            lower[row] = f64::NEG_INFINITY;
            upper[row] = 0.0;
        }
    }

    QuadraticProgram {
        p: cov * 2.0,
        q: DVector::zeros(n),
        a,
        lower,
        upper,
    }
}

/// Re-solve exactly on the support of `w` and keep the result only if it
/// satisfies the KKT conditions of the uncapped problem.
///
/// On support `S` the optimum is `y_S = Σ_S⁻¹ e_S / (e_Sᵀ Σ_S⁻¹ e_S)`. It is
/// optimal overall when `y_S > 0` and every excluded instrument has a
/// non-negative multiplier `d·(Σy)ᵢ − eᵢ`, where `d = e_Sᵀ Σ_S⁻¹ e_S`.
/// Solutions touching the cap are left alone.
fn polish(cov: &DMatrix<f64>, excess: &[f64], w: &[f64], cap: Weight) -> Option<Vec<f64>> {
    let n = w.len();
    if cap < 1.0 && w.iter().any(|wi| *wi >= cap - CAP_TOLERANCE) {
        return None;
    }
    let support: Vec<usize> = (0..n).filter(|&i| w[i] > SUPPORT_THRESHOLD).collect();
    if support.is_empty() {
        return None;
    }

    let k = support.len();
    let sub_cov = DMatrix::from_fn(k, k, |i, j| cov[(support[i], support[j])]);
    let sub_excess = DVector::from_iterator(k, support.iter().map(|&i| excess[i]));
    let z = sub_cov.cholesky()?.solve(&sub_excess);
    let d = sub_excess.dot(&z);
    if !(d.is_finite() && d > 0.0) {
        return None;
    }

    let mut y = vec![0.0; n];
    for (pos, &i) in support.iter().enumerate() {
        let yi = z[pos] / d;
        if yi <= 0.0 {
            return None;
        }
        y[i] = yi;
    }

    let sigma_y = cov * DVector::from_column_slice(&y);
    let excess_scale = excess.iter().fold(0.0f64, |acc, e| acc.max(e.abs()));
    for i in (0..n).filter(|i| !support.contains(i)) {
        let multiplier = d * sigma_y[i] - excess[i];
        if multiplier < -1e-10 * excess_scale {
            return None;
        }
    }

    let total: f64 = y.iter().sum();
    let polished: Vec<f64> = y.iter().map(|v| v / total).collect();
    if cap < 1.0 && polished.iter().any(|wi| *wi > cap) {
        return None;
    }
    Some(polished)
}

fn check_output(weights: &[f64], cap: Weight, ids: &[InstrumentId]) -> PortfolioResult<()> {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(PortfolioError::optimization(
            ids,
            format!("weights sum to {} instead of 1", sum),
        ));
    }
    if let Some(i) = weights
        .iter()
        .position(|w| *w < -NEGATIVE_TOLERANCE || *w > cap + CAP_TOLERANCE)
    {
        return Err(PortfolioError::optimization(
            ids,
            format!("weight {} for '{}' violates bounds [0, {}]", weights[i], ids[i], cap),
        ));
    }
    Ok(())
}

fn sharpe(weights: &[f64], excess: &[f64], cov: &DMatrix<f64>) -> f64 {
    let ret: f64 = weights.iter().zip(excess.iter()).map(|(w, e)| w * e).sum();
    let vol = quad_form(cov, weights).max(0.0).sqrt();
    if vol > 0.0 {
        ret / vol
    } else {
        f64::NEG_INFINITY
    }
}

fn quad_form(cov: &DMatrix<f64>, w: &[f64]) -> f64 {
    let v = DVector::from_column_slice(w);
    v.dot(&(cov * &v))
}
