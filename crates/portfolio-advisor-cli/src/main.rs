mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::estimate::EstimateArgs;
use commands::optimize::OptimizeArgs;
use commands::solve::SolveArgs;
use portfolio_advisor_core::PortfolioError;

/// Maximum-Sharpe portfolio recommendations from historical prices
#[derive(Parser)]
#[command(
    name = "pfa",
    version,
    about = "Maximum-Sharpe portfolio recommendations from historical prices",
    long_about = "Estimates annualized returns and covariances from a price history and \
                  recommends the long-only allocation with the highest Sharpe ratio. \
                  Set RUST_LOG=debug to trace the estimation and solver."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend weights for a set of instruments
    Optimize(OptimizeArgs),
    /// Show the expected returns and covariance matrix behind a recommendation
    Estimate(EstimateArgs),
    /// Solve for maximum Sharpe weights from explicit returns and covariances
    Solve(SolveArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Estimate(args) => commands::estimate::run_estimate(args),
        Commands::Solve(args) => commands::solve::run_solve(args),
        Commands::Version => {
            println!("pfa {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            match e.downcast_ref::<PortfolioError>() {
                Some(err) => {
                    let label = format!("error[{}]", err.code());
                    eprintln!("{}: {}", label.as_str().red().bold(), err)
                }
                None => eprintln!("{}: {}", "error".red().bold(), e),
            }
            process::exit(1);
        }
    }
}
