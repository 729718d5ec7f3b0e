use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

use portfolio_advisor_core::estimation::{
    expected_returns, sample_covariance, CovarianceMatrix, EstimationSettings, ReturnFrequency,
    ReturnVector,
};
use portfolio_advisor_core::market_data::LookbackPeriod;
use portfolio_advisor_core::with_metadata;

use crate::input;

/// Arguments for return and covariance estimation
#[derive(Args)]
pub struct EstimateArgs {
    /// Path to a CSV of closing prices (header: date,ID1,ID2,...)
    #[arg(long)]
    pub prices: String,

    /// Comma-separated instrument identifiers (default: every column)
    #[arg(long, value_delimiter = ',')]
    pub tickers: Option<Vec<String>>,

    /// Lookback window, e.g. 6mo, 1y, 5y, ytd, max
    #[arg(long, default_value = "1y")]
    pub period: String,

    /// YAML or JSON optimizer configuration
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Serialize)]
struct EstimateOutput {
    frequency: ReturnFrequency,
    observations: usize,
    expected_returns: ReturnVector,
    covariance_matrix: CovarianceMatrix,
}

pub fn run_estimate(args: EstimateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = input::config::load_config(args.config.as_deref())?;
    config.validate()?;
    let period: LookbackPeriod = args.period.parse()?;

    let table = input::prices::read_price_csv(&args.prices)?;
    let tickers = args
        .tickers
        .unwrap_or_else(|| table.instruments().to_vec());
    if let Some(unknown) = tickers.iter().find(|t| !table.contains(t)) {
        return Err(format!("'{}' is not a column of {}", unknown, args.prices).into());
    }
    let table = table.restrict_to(&tickers).window(&period);

    let frequency = config
        .frequency
        .unwrap_or_else(|| ReturnFrequency::infer(table.dates()));
    let settings = EstimationSettings {
        frequency,
        method: config.return_method,
        log_returns: config.log_returns,
    };
    let output = EstimateOutput {
        frequency,
        observations: table.len(),
        expected_returns: expected_returns(&table, &settings)?,
        covariance_matrix: sample_covariance(&table, &settings)?,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(serde_json::to_value(with_metadata(
        "Annualized historical returns and sample covariance",
        &serde_json::json!({
            "lookback_period": period,
            "periods_per_year": frequency.periods_per_year(),
            "return_method": config.return_method,
            "log_returns": config.log_returns,
        }),
        Vec::new(),
        elapsed,
        output,
    ))?)
}
