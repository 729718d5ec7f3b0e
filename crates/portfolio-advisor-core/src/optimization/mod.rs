//! Turning statistics into an allocation: the convex solver, the
//! maximum-Sharpe formulation built on it, and the weight cleaner.

pub mod cleaner;
pub mod frontier;
pub mod qp;

pub use cleaner::{Recommendation, WeightCleaner};
pub use frontier::{FrontierSolver, MaxSharpeSolution, PortfolioPerformance, SolveMethod, WeightVector};
