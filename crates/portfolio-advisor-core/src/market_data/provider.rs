use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::market_data::lookback::LookbackPeriod;
use crate::market_data::price_table::PriceTable;
use crate::types::InstrumentId;

/// Failures a price source may report. The optimizer folds all of them into
/// `PortfolioError::DataUnavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("unknown instrument '{0}'")]
    UnknownInstrument(InstrumentId),

    #[error("{0}")]
    Unavailable(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Source of historical closing prices.
///
/// Implementations return a table bounded to `period` and must give up after
/// `timeout`, reporting `ProviderError::Timeout`.
pub trait PriceSeriesProvider {
    fn fetch(
        &self,
        instruments: &[InstrumentId],
        period: &LookbackPeriod,
        timeout: Duration,
    ) -> Result<PriceTable, ProviderError>;
}

impl<P: PriceSeriesProvider + ?Sized> PriceSeriesProvider for &P {
    fn fetch(
        &self,
        instruments: &[InstrumentId],
        period: &LookbackPeriod,
        timeout: Duration,
    ) -> Result<PriceTable, ProviderError> {
        (**self).fetch(instruments, period, timeout)
    }
}

impl<P: PriceSeriesProvider + ?Sized> PriceSeriesProvider for Box<P> {
    fn fetch(
        &self,
        instruments: &[InstrumentId],
        period: &LookbackPeriod,
        timeout: Duration,
    ) -> Result<PriceTable, ProviderError> {
        (**self).fetch(instruments, period, timeout)
    }
}

impl<P: PriceSeriesProvider + ?Sized> PriceSeriesProvider for Arc<P> {
    fn fetch(
        &self,
        instruments: &[InstrumentId],
        period: &LookbackPeriod,
        timeout: Duration,
    ) -> Result<PriceTable, ProviderError> {
        (**self).fetch(instruments, period, timeout)
    }
}

/// Serves a fixed history held in memory, windowed per request.
///
/// Never blocks, so the timeout is irrelevant to it.
#[derive(Debug, Clone)]
pub struct InMemoryPriceProvider {
    history: PriceTable,
}

impl InMemoryPriceProvider {
    pub fn new(history: PriceTable) -> Self {
        InMemoryPriceProvider { history }
    }

    pub fn history(&self) -> &PriceTable {
        &self.history
    }
}

impl PriceSeriesProvider for InMemoryPriceProvider {
    fn fetch(
        &self,
        instruments: &[InstrumentId],
        period: &LookbackPeriod,
        _timeout: Duration,
    ) -> Result<PriceTable, ProviderError> {
        if let Some(unknown) = instruments.iter().find(|id| !self.history.contains(id)) {
            return Err(ProviderError::UnknownInstrument(unknown.clone()));
        }
        let table = self.history.restrict_to(instruments).window(period);
        if table.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "no prices inside the {} window",
                period
            )));
        }
        Ok(table)
    }
}
