use clap::Args;
use log::debug;
use serde_json::Value;

use portfolio_advisor_core::market_data::InMemoryPriceProvider;
use portfolio_advisor_core::PortfolioOptimizer;

use crate::input;
use crate::input::config::Overrides;

/// Arguments for a maximum-Sharpe recommendation
#[derive(Args)]
pub struct OptimizeArgs {
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

    /// Annual risk-free rate
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<f64>,

    /// Largest weight any single instrument may take (0 to 1)
    #[arg(long)]
    pub max_weight: Option<f64>,

    /// Decimal places kept in the recommendation
    #[arg(long)]
    pub precision: Option<u32>,

    /// Include statistics, dropped instruments and warnings
    #[arg(long)]
    pub detailed: bool,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let config = Overrides {
        risk_free_rate: args.risk_free_rate,
        max_weight: args.max_weight,
        precision: args.precision,
    }
    .apply(input::config::load_config(args.config.as_deref())?);
    debug!("resolved optimizer config: {:?}", config);

    let table = input::prices::read_price_csv(&args.prices)?;
    debug!(
        "read {} dated rows for {} instruments from {}",
        table.len(),
        table.instruments().len(),
        args.prices
    );
    let tickers = args
        .tickers
        .unwrap_or_else(|| table.instruments().to_vec());
    debug!("optimizing {} over {}", tickers.join(","), args.period);

    let optimizer = PortfolioOptimizer::new(InMemoryPriceProvider::new(table), config)?;
    if args.detailed {
        let output = optimizer.optimize_detailed(&tickers, &args.period)?;
        Ok(serde_json::to_value(output)?)
    } else {
        let recommendation = optimizer.optimize(&tickers, &args.period)?;
        Ok(serde_json::to_value(recommendation)?)
    }
}
