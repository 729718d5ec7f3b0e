//! Request-level orchestration: fetch, estimate, solve, clean.

use log::{debug, info, warn};
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

use crate::config::OptimizerConfig;
use crate::error::PortfolioError;
use crate::estimation::{self, covariance, returns, EstimationSettings, ReturnFrequency};
use crate::market_data::{LookbackPeriod, PriceSeriesProvider, PriceTable};
use crate::optimization::{
    FrontierSolver, Recommendation, SolveMethod, WeightCleaner, WeightVector,
};
use crate::types::{with_metadata, ComputationOutput, InstrumentId, Rate};
use crate::PortfolioResult;

/// Positions above this weight are flagged as concentrated.
const CONCENTRATION_WARNING: f64 = 0.40;
/// Annualized volatility above this is flagged.
const VOLATILITY_WARNING: f64 = 0.30;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything behind a recommendation, for callers that want more than the
/// flat weight map.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub recommendation: Recommendation,
    pub raw_weights: WeightVector,
    pub expected_return: Rate,
    pub volatility: Rate,
    pub sharpe_ratio: f64,
    pub retained_instruments: Vec<InstrumentId>,
    pub dropped_instruments: Vec<InstrumentId>,
    pub frequency: ReturnFrequency,
    /// Dated rows in the price window.
    pub observations: usize,
    pub solve_method: SolveMethod,
}

/// Maximum-Sharpe allocator over a price source.
///
/// Holds only its configuration and the provider, so it is `Send + Sync`
/// whenever the provider is and can serve concurrent requests.
#[derive(Debug, Clone)]
pub struct PortfolioOptimizer<P> {
    provider: P,
    config: OptimizerConfig,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl<P: PriceSeriesProvider> PortfolioOptimizer<P> {
    pub fn new(provider: P, config: OptimizerConfig) -> PortfolioResult<Self> {
        config.validate()?;
        Ok(PortfolioOptimizer { provider, config })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Recommend weights for `instruments` from prices over `lookback`
    /// (e.g. `"1y"`, `"6mo"`, `"max"`).
    pub fn optimize(
        &self,
        instruments: &[InstrumentId],
        lookback: &str,
    ) -> PortfolioResult<Recommendation> {
        Ok(self.optimize_detailed(instruments, lookback)?.result.recommendation)
    }

    /// Same as [`optimize`](Self::optimize), wrapped with statistics,
    /// warnings and run metadata.
    pub fn optimize_detailed(
        &self,
        instruments: &[InstrumentId],
        lookback: &str,
    ) -> PortfolioResult<ComputationOutput<OptimizationReport>> {
        validate_instruments(instruments)?;
        let period: LookbackPeriod = lookback.parse()?;

        debug!(
            "fetching {} instruments over {} (timeout {}s)",
            instruments.len(),
            period,
            self.config.fetch_timeout_secs
        );
        let table = self
            .provider
            .fetch(instruments, &period, self.config.fetch_timeout())
            .map_err(|e| PortfolioError::DataUnavailable {
                instruments: instruments.to_vec(),
                period: period.to_string(),
                reason: e.to_string(),
            })?;

        let mut output = optimize_prices(&table, instruments, &self.config)?;
        if let Some(assumptions) = output.assumptions.as_object_mut() {
            assumptions.insert(
                "lookback_period".to_string(),
                serde_json::Value::String(period.to_string()),
            );
        }
        Ok(output)
    }
}

/// Run the estimation and optimization pipeline on prices already at hand.
///
/// Requested instruments absent from `table`, or with fewer than two observed
/// prices, are dropped with a warning; at least two must remain.
pub fn optimize_prices(
    table: &PriceTable,
    instruments: &[InstrumentId],
    config: &OptimizerConfig,
) -> PortfolioResult<ComputationOutput<OptimizationReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_instruments(instruments)?;
    config.validate()?;

    let (table, dropped) = usable_history(table, instruments);
    if !dropped.is_empty() {
        warn!("dropping instruments without usable history: {}", dropped.join(", "));
        warnings.push(format!(
            "Dropped instruments without usable price history: {}",
            dropped.join(", ")
        ));
    }
    if table.instruments().len() < 2 {
        return Err(PortfolioError::insufficient(
            instruments,
            format!(
                "at least 2 instruments with price history are required, {} remain",
                table.instruments().len()
            ),
        ));
    }

    let frequency = config
        .frequency
        .unwrap_or_else(|| ReturnFrequency::infer(table.dates()));
    let settings = EstimationSettings {
        frequency,
        method: config.return_method,
        log_returns: config.log_returns,
    };
    debug!(
        "estimating {} instruments over {} rows at {:?} frequency",
        table.instruments().len(),
        table.len(),
        frequency
    );

    let period_returns = estimation::period_returns(&table, settings.log_returns)?;
    let mu = returns::from_period_returns(&period_returns, &settings);
    let sigma = covariance::from_period_returns(&period_returns, &settings)?;

    let solution = FrontierSolver::from_config(config).max_sharpe(&mu, &sigma)?;
    let recommendation = WeightCleaner::new(config.precision).clean(&solution.weights);

    // --- Warnings ---
    let residual = recommendation.residual();
    if !residual.is_zero() {
        warnings.push(format!(
            "Rounded weights leave {} unallocated; weights are not renormalized",
            residual
        ));
    }
    for (id, w) in recommendation.iter() {
        if w.to_f64().unwrap_or(0.0) > CONCENTRATION_WARNING {
            warnings.push(format!("Concentrated position: {} has weight {}", id, w));
        }
    }
    if solution.performance.volatility > VOLATILITY_WARNING {
        warnings.push(format!(
            "High portfolio volatility: {:.4}",
            solution.performance.volatility
        ));
    }

    info!(
        "optimized {} instruments: sharpe {:.4}, {} positions",
        mu.len(),
        solution.performance.sharpe_ratio,
        recommendation.len()
    );

    let report = OptimizationReport {
        recommendation,
        retained_instruments: mu.instruments().to_vec(),
        dropped_instruments: dropped,
        raw_weights: solution.weights,
        expected_return: solution.performance.expected_return,
        volatility: solution.performance.volatility,
        sharpe_ratio: solution.performance.sharpe_ratio,
        frequency,
        observations: table.len(),
        solve_method: solution.method,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Long-only maximum Sharpe ratio (Markowitz mean-variance)",
        &serde_json::json!({
            "n_instruments": report.retained_instruments.len(),
            "risk_free_rate": config.risk_free_rate,
            "max_weight": config.upper_bound(),
            "frequency": frequency,
            "periods_per_year": frequency.periods_per_year(),
            "return_method": config.return_method,
            "log_returns": config.log_returns,
            "covariance": "sample, pairwise-complete",
            "precision": config.precision,
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_instruments(instruments: &[InstrumentId]) -> PortfolioResult<()> {
    if instruments.is_empty() {
        return Err(PortfolioError::invalid(
            "instrument_ids",
            "at least one instrument is required",
        ));
    }
    let mut seen = HashSet::new();
    for id in instruments {
        if id.trim().is_empty() {
            return Err(PortfolioError::invalid(
                "instrument_ids",
                "identifiers must not be blank",
            ));
        }
        if !seen.insert(id.as_str()) {
            return Err(PortfolioError::invalid(
                "instrument_ids",
                format!("duplicate identifier '{}'", id),
            ));
        }
    }
    Ok(())
}

/// Restrict `table` to the requested instruments with at least two observed
/// prices, the minimum for one period return. Returns the usable table and the
/// dropped identifiers in request order.
fn usable_history(table: &PriceTable, instruments: &[InstrumentId]) -> (PriceTable, Vec<InstrumentId>) {
    let (restricted, _) = table.restrict_to(instruments).drop_all_missing();
    let usable: Vec<InstrumentId> = restricted
        .instruments()
        .iter()
        .filter(|id| restricted.observations(id) >= 2)
        .cloned()
        .collect();
    let dropped = instruments
        .iter()
        .filter(|id| !usable.contains(id))
        .cloned()
        .collect();
    (restricted.restrict_to(&usable), dropped)
}
