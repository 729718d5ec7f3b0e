//! Return and risk statistics derived from a price table.
//!
//! Both estimators share the same period-return extraction so the return
//! vector and the covariance matrix always describe the same observations in
//! the same instrument order.

pub mod covariance;
pub mod returns;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::estimation::returns::ReturnMethod;
use crate::market_data::PriceTable;
use crate::types::InstrumentId;
use crate::PortfolioResult;

pub use covariance::{sample_covariance, CovarianceMatrix};
pub use returns::{expected_returns, ReturnVector};

/// Frequency of price observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl ReturnFrequency {
    /// Number of periods in a year for annualisation
    pub fn periods_per_year(&self) -> f64 {
        match self {
            ReturnFrequency::Daily => 252.0,
            ReturnFrequency::Weekly => 52.0,
            ReturnFrequency::Monthly => 12.0,
            ReturnFrequency::Quarterly => 4.0,
            ReturnFrequency::Annual => 1.0,
        }
    }

    /// Guess the frequency from the median gap between consecutive dates.
    ///
    /// Fewer than two dates gives `Daily`.
    pub fn infer(dates: &[NaiveDate]) -> ReturnFrequency {
        let mut gaps: Vec<i64> = dates
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days())
            .collect();
        if gaps.is_empty() {
            return ReturnFrequency::Daily;
        }
        gaps.sort_unstable();
        let median = gaps[gaps.len() / 2];
        match median {
            i64::MIN..=4 => ReturnFrequency::Daily,
            5..=10 => ReturnFrequency::Weekly,
            11..=45 => ReturnFrequency::Monthly,
            46..=135 => ReturnFrequency::Quarterly,
            _ => ReturnFrequency::Annual,
        }
    }
}

/// How both estimators read the price table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationSettings {
    pub frequency: ReturnFrequency,
    pub method: ReturnMethod,
    pub log_returns: bool,
}

impl Default for EstimationSettings {
    fn default() -> Self {
        EstimationSettings {
            frequency: ReturnFrequency::Daily,
            method: ReturnMethod::Mean,
            log_returns: false,
        }
    }
}

/// Period-over-period returns, one series per instrument.
///
/// `series[i][t]` is the return ending on row `t + 1`, measured from the
/// instrument's previous observed price. It is absent when row `t + 1` has no
/// price or no earlier price exists, so a move across missing rows lands on
/// the row where the instrument prints again.
#[derive(Debug, Clone)]
pub(crate) struct PeriodReturns {
    pub instruments: Vec<InstrumentId>,
    pub series: Vec<Vec<Option<f64>>>,
}

impl PeriodReturns {
    pub fn defined(&self, i: usize) -> impl Iterator<Item = f64> + '_ {
        self.series[i].iter().filter_map(|r| *r)
    }
}

/// Extract period returns, failing when any retained instrument has fewer
/// than two observed prices.
pub(crate) fn period_returns(table: &PriceTable, log_returns: bool) -> PortfolioResult<PeriodReturns> {
    let instruments = table.instruments().to_vec();
    if instruments.is_empty() {
        return Err(PortfolioError::insufficient(
            &instruments,
            "price table holds no instruments",
        ));
    }
    if table.len() < 2 {
        return Err(PortfolioError::insufficient(
            &instruments,
            format!(
                "at least 2 dated observations are required, got {}",
                table.len()
            ),
        ));
    }

    let mut series = Vec::with_capacity(instruments.len());
    let mut starved = Vec::new();
    for id in &instruments {
        let prices = table.column(id).unwrap_or(&[]);
        let mut last_observed = prices.first().copied().flatten();
        let returns: Vec<Option<f64>> = prices
            .iter()
            .skip(1)
            .map(|price| {
                let next = (*price)?;
                let period_return = last_observed.map(|prev| {
                    if log_returns {
                        (next / prev).ln()
                    } else {
                        next / prev - 1.0
                    }
                });
                last_observed = Some(next);
                period_return
            })
            .collect();
        if returns.iter().all(|r| r.is_none()) {
            starved.push(id.clone());
        }
        series.push(returns);
    }

    if !starved.is_empty() {
        return Err(PortfolioError::insufficient(
            &starved,
            "each instrument needs at least 2 observed prices",
        ));
    }

    Ok(PeriodReturns {
        instruments,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dates(step_days: u64, count: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..count)
            .map(|i| start + chrono::Days::new(step_days * i as u64))
            .collect()
    }

    #[test]
    fn test_infer_frequency() {
        assert_eq!(ReturnFrequency::infer(&dates(1, 30)), ReturnFrequency::Daily);
        assert_eq!(ReturnFrequency::infer(&dates(7, 30)), ReturnFrequency::Weekly);
        assert_eq!(ReturnFrequency::infer(&dates(30, 30)), ReturnFrequency::Monthly);
        assert_eq!(ReturnFrequency::infer(&dates(91, 8)), ReturnFrequency::Quarterly);
        assert_eq!(ReturnFrequency::infer(&dates(365, 5)), ReturnFrequency::Annual);
        assert_eq!(ReturnFrequency::infer(&dates(1, 1)), ReturnFrequency::Daily);
    }

    #[test]
    fn test_period_returns_span_gaps() {
        let table = PriceTable::new(
            dates(1, 5),
            vec![("A".into(), vec![Some(100.0), Some(110.0), None, Some(200.0), Some(210.0)])],
        )
        .unwrap();
        let returns = period_returns(&table, false).unwrap();
        assert_eq!(returns.series[0].len(), 4);
        assert_relative_eq!(returns.series[0][0].unwrap(), 0.10, epsilon = 1e-12);
        assert!(returns.series[0][1].is_none());
        // 110 -> 200 across the missing row
        assert_relative_eq!(returns.series[0][2].unwrap(), 200.0 / 110.0 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(returns.series[0][3].unwrap(), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_alternate_row_prices_still_produce_returns() {
        let prices: Vec<Option<f64>> = (0..20)
            .map(|t| (t % 2 == 0).then(|| 100.0 + t as f64))
            .collect();
        let table = PriceTable::new(dates(1, 20), vec![("A".into(), prices)]).unwrap();
        let returns = period_returns(&table, false).unwrap();
        assert_eq!(returns.defined(0).count(), 9);
        assert_relative_eq!(returns.series[0][1].unwrap(), 102.0 / 100.0 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_log_returns() {
        let table = PriceTable::new(
            dates(1, 2),
            vec![("A".into(), vec![Some(100.0), Some(200.0)])],
        )
        .unwrap();
        let returns = period_returns(&table, true).unwrap();
        assert_relative_eq!(returns.series[0][0].unwrap(), 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_single_row_is_insufficient() {
        let table = PriceTable::new(dates(1, 1), vec![("A".into(), vec![Some(1.0)])]).unwrap();
        let err = period_returns(&table, false).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_DATA");
    }

    #[test]
    fn test_isolated_prices_are_insufficient() {
        let table = PriceTable::new(
            dates(1, 3),
            vec![
                ("A".into(), vec![Some(1.0), Some(1.1), Some(1.2)]),
                ("B".into(), vec![None, None, Some(1.2)]),
            ],
        )
        .unwrap();
        match period_returns(&table, false).unwrap_err() {
            PortfolioError::InsufficientData { instruments, .. } => {
                assert_eq!(instruments, vec!["B".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
