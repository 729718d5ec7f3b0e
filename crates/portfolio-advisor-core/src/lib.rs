pub mod config;
pub mod error;
pub mod estimation;
pub mod market_data;
pub mod optimization;
pub mod optimizer;
pub mod types;

pub use config::OptimizerConfig;
pub use error::PortfolioError;
pub use optimizer::{optimize_prices, OptimizationReport, PortfolioOptimizer};
pub use types::*;

/// Standard result type for all portfolio-advisor operations
pub type PortfolioResult<T> = Result<T, PortfolioError>;
