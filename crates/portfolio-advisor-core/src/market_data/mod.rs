//! Price history and the seam to whoever supplies it.

pub mod lookback;
pub mod price_table;
pub mod provider;

pub use lookback::LookbackPeriod;
pub use price_table::{PriceRow, PriceTable};
pub use provider::{InMemoryPriceProvider, PriceSeriesProvider, ProviderError};
