use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PortfolioError;
use crate::estimation::returns::ReturnMethod;
use crate::estimation::ReturnFrequency;
use crate::optimization::qp::SolverSettings;
use crate::types::{Rate, Weight};
use crate::PortfolioResult;

/// Largest rounding precision accepted for recommendation weights.
pub const MAX_PRECISION: u32 = 10;

/// Everything the optimizer needs to know, handed over at construction.
///
/// Deserializes from partial documents: any missing field takes its default,
/// so `{}` and an empty YAML file are both valid configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Annual risk-free rate subtracted from expected returns.
    pub risk_free_rate: Rate,
    /// Decimal places kept in the cleaned recommendation.
    pub precision: u32,
    /// Per-instrument weight cap; `None` means 1.0.
    pub max_weight: Option<Weight>,
    /// Observation frequency; `None` infers it from the price dates.
    pub frequency: Option<ReturnFrequency>,
    pub return_method: ReturnMethod,
    pub log_returns: bool,
    /// Deadline handed to the price provider.
    pub fetch_timeout_secs: u64,
    pub solver: SolverSettings,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            risk_free_rate: 0.0,
            precision: 4,
            max_weight: None,
            frequency: None,
            return_method: ReturnMethod::Mean,
            log_returns: false,
            fetch_timeout_secs: 30,
            solver: SolverSettings::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> PortfolioResult<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(PortfolioError::invalid(
                "risk_free_rate",
                "must be a finite number",
            ));
        }
        if self.precision > MAX_PRECISION {
            return Err(PortfolioError::invalid(
                "precision",
                format!("must be at most {} decimal places", MAX_PRECISION),
            ));
        }
        if let Some(cap) = self.max_weight {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(PortfolioError::invalid(
                    "max_weight",
                    format!("must lie in (0, 1], got {}", cap),
                ));
            }
        }
        if let ReturnMethod::Exponential { span } = self.return_method {
            if span == 0 {
                return Err(PortfolioError::invalid(
                    "return_method.span",
                    "exponential span must be positive",
                ));
            }
        }
        if self.fetch_timeout_secs == 0 {
            return Err(PortfolioError::invalid(
                "fetch_timeout_secs",
                "timeout must be at least one second",
            ));
        }
        self.solver.validate()
    }

    /// Effective per-instrument cap.
    pub fn upper_bound(&self) -> Weight {
        self.max_weight.unwrap_or(1.0)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
