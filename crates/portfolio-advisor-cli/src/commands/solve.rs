use clap::Args;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use portfolio_advisor_core::estimation::{CovarianceMatrix, ReturnVector};
use portfolio_advisor_core::optimization::qp::SolverSettings;
use portfolio_advisor_core::optimization::{
    FrontierSolver, PortfolioPerformance, Recommendation, SolveMethod, WeightCleaner, WeightVector,
};
use portfolio_advisor_core::with_metadata;

use crate::input;

/// Arguments for solving on explicit statistics
#[derive(Args)]
pub struct SolveArgs {
    /// Path to JSON with instruments, expected_returns and covariance_matrix
    #[arg(long)]
    pub input: Option<String>,

    /// Annual risk-free rate (overrides the input file)
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<f64>,

    /// Largest weight any single instrument may take (overrides the input file)
    #[arg(long)]
    pub max_weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SolveInput {
    instruments: Vec<String>,
    expected_returns: Vec<f64>,
    covariance_matrix: Vec<Vec<f64>>,
    #[serde(default)]
    risk_free_rate: f64,
    #[serde(default)]
    max_weight: Option<f64>,
    #[serde(default)]
    precision: Option<u32>,
    #[serde(default)]
    solver: SolverSettings,
}

#[derive(Debug, Serialize)]
struct SolveOutput {
    recommendation: Recommendation,
    raw_weights: WeightVector,
    performance: PortfolioPerformance,
    method: SolveMethod,
}

pub fn run_solve(args: SolveArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let data: SolveInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_piped()? {
        data
    } else {
        return Err("Provide --input file or pipe JSON via stdin".into());
    };

    let rf = args.risk_free_rate.unwrap_or(data.risk_free_rate);
    let cap = args.max_weight.or(data.max_weight).unwrap_or(1.0);
    data.solver.validate()?;
    debug!(
        "solving for {} instruments (risk-free rate {}, max weight {})",
        data.instruments.len(),
        rf,
        cap
    );

    let mu = ReturnVector::new(data.instruments.clone(), data.expected_returns)?;
    let sigma = CovarianceMatrix::new(data.instruments, data.covariance_matrix)?;
    let solution = FrontierSolver::new(rf)
        .with_max_weight(cap)
        .with_settings(data.solver)
        .max_sharpe(&mu, &sigma)?;

    let cleaner = data.precision.map(WeightCleaner::new).unwrap_or_default();
    let output = SolveOutput {
        recommendation: cleaner.clean(&solution.weights),
        raw_weights: solution.weights,
        performance: solution.performance,
        method: solution.method,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(serde_json::to_value(with_metadata(
        "Long-only maximum Sharpe ratio (Markowitz mean-variance)",
        &serde_json::json!({
            "n_instruments": mu.len(),
            "risk_free_rate": rf,
            "max_weight": cap,
            "precision": cleaner.precision(),
        }),
        Vec::new(),
        elapsed,
        output,
    ))?)
}
