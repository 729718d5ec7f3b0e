//! Expected-return estimation.
//!
//! The default is the historical arithmetic mean of period returns scaled to
//! a year. `Compounded` (geometric growth) and `Exponential` are selectable
//! through [`ReturnMethod`] and produce the same shape of output.

use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::estimation::{period_returns, EstimationSettings, PeriodReturns};
use crate::market_data::PriceTable;
use crate::types::{InstrumentId, Rate};
use crate::PortfolioResult;

/// Expected-return estimator selection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMethod {
    /// Arithmetic mean of period returns times periods per year.
    #[default]
    Mean,
    /// Geometric growth rate: `(prod(1 + r))^(periods_per_year / n) - 1`.
    Compounded,
    /// Exponentially weighted mean, `alpha = 2 / (span + 1)`, newest first.
    Exponential { span: u32 },
}

/// Annualized expected return per instrument, in table order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnVector {
    instruments: Vec<InstrumentId>,
    values: Vec<Rate>,
}

impl ReturnVector {
    pub fn new(instruments: Vec<InstrumentId>, values: Vec<Rate>) -> PortfolioResult<Self> {
        if instruments.len() != values.len() {
            return Err(PortfolioError::invalid(
                "expected_returns",
                format!(
                    "{} instruments but {} returns",
                    instruments.len(),
                    values.len()
                ),
            ));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(PortfolioError::invalid(
                "expected_returns",
                format!("return for '{}' is not finite", instruments[i]),
            ));
        }
        Ok(ReturnVector {
            instruments,
            values,
        })
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    pub fn values(&self) -> &[Rate] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Rate> {
        self.instruments
            .iter()
            .position(|i| i == id)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstrumentId, Rate)> + '_ {
        self.instruments.iter().zip(self.values.iter().copied())
    }
}

/// Estimate annualized expected returns for every instrument in `table`.
pub fn expected_returns(
    table: &PriceTable,
    settings: &EstimationSettings,
) -> PortfolioResult<ReturnVector> {
    let returns = period_returns(table, settings.log_returns)?;
    Ok(from_period_returns(&returns, settings))
}

pub(crate) fn from_period_returns(
    returns: &PeriodReturns,
    settings: &EstimationSettings,
) -> ReturnVector {
    let periods = settings.frequency.periods_per_year();
    let values = (0..returns.instruments.len())
        .map(|i| {
            let observed: Vec<f64> = returns.defined(i).collect();
            match settings.method {
                ReturnMethod::Mean => mean(&observed) * periods,
                ReturnMethod::Compounded => compounded(&observed, periods, settings.log_returns),
                ReturnMethod::Exponential { span } => ewm_mean(&observed, span) * periods,
            }
        })
        .collect();
    ReturnVector {
        instruments: returns.instruments.clone(),
        values,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn compounded(values: &[f64], periods: f64, log_returns: bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let growth = if log_returns {
        values.iter().sum::<f64>().exp()
    } else {
        values.iter().map(|r| 1.0 + r).product::<f64>()
    };
    growth.powf(periods / values.len() as f64) - 1.0
}

/// Weighted mean with weight `(1 - alpha)^k` on the k-th newest return.
fn ewm_mean(values: &[f64], span: u32) -> f64 {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut weight = 1.0;
    let mut num = 0.0;
    let mut denom = 0.0;
    for r in values.iter().rev() {
        num += weight * r;
        denom += weight;
        weight *= 1.0 - alpha;
    }
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::ReturnFrequency;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn table(columns: Vec<(&str, Vec<Option<f64>>)>) -> PriceTable {
        let n = columns[0].1.len();
        let dates = (0..n)
            .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64))
            .collect();
        PriceTable::new(
            dates,
            columns.into_iter().map(|(id, c)| (id.to_string(), c)).collect(),
        )
        .unwrap()
    }

    fn settings(method: ReturnMethod) -> EstimationSettings {
        EstimationSettings {
            frequency: ReturnFrequency::Daily,
            method,
            log_returns: false,
        }
    }

    #[test]
    fn test_mean_is_annualized() {
        // Returns +10% then -10%: mean 0
        let t = table(vec![("A", vec![Some(100.0), Some(110.0), Some(99.0)])]);
        let mu = expected_returns(&t, &settings(ReturnMethod::Mean)).unwrap();
        assert_relative_eq!(mu.get("A").unwrap(), 0.0, epsilon = 1e-12);

        let t = table(vec![("A", vec![Some(100.0), Some(101.0), Some(102.01)])]);
        let mu = expected_returns(&t, &settings(ReturnMethod::Mean)).unwrap();
        assert_relative_eq!(mu.get("A").unwrap(), 0.01 * 252.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mean_counts_moves_across_gaps() {
        let t = table(vec![(
            "A",
            vec![Some(100.0), Some(110.0), None, Some(200.0), Some(210.0)],
        )]);
        let mu = expected_returns(&t, &settings(ReturnMethod::Mean)).unwrap();
        let per_period = (0.10 + (200.0 / 110.0 - 1.0) + 0.05) / 3.0;
        assert_relative_eq!(mu.get("A").unwrap(), per_period * 252.0, max_relative = 1e-9);
    }

    #[test]
    fn test_compounded_matches_geometric_growth() {
        let t = table(vec![("A", vec![Some(100.0), Some(101.0), Some(102.01)])]);
        let mu = expected_returns(&t, &settings(ReturnMethod::Compounded)).unwrap();
        assert_relative_eq!(mu.get("A").unwrap(), 1.01f64.powf(252.0) - 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_compounded_agrees_for_log_returns() {
        let t = table(vec![("A", vec![Some(100.0), Some(103.0), Some(101.0), Some(104.0)])]);
        let simple = expected_returns(&t, &settings(ReturnMethod::Compounded)).unwrap();
        let logged = expected_returns(
            &t,
            &EstimationSettings {
                log_returns: true,
                ..settings(ReturnMethod::Compounded)
            },
        )
        .unwrap();
        assert_relative_eq!(simple.values()[0], logged.values()[0], max_relative = 1e-9);
    }

    #[test]
    fn test_exponential_weights_recent_returns() {
        // Early gains, late losses: EWM sits below the plain mean
        let t = table(vec![(
            "A",
            vec![Some(100.0), Some(105.0), Some(110.0), Some(108.0), Some(106.0)],
        )]);
        let plain = expected_returns(&t, &settings(ReturnMethod::Mean)).unwrap();
        let ewm = expected_returns(&t, &settings(ReturnMethod::Exponential { span: 2 })).unwrap();
        assert!(ewm.values()[0] < plain.values()[0]);
    }

    #[test]
    fn test_covers_exactly_table_instruments() {
        let t = table(vec![
            ("B", vec![Some(10.0), Some(11.0), Some(12.0)]),
            ("A", vec![None, None, Some(5.5)]),
            ("C", vec![Some(7.0), Some(7.0), Some(7.7)]),
        ]);
        // A has a single observation
        assert!(expected_returns(&t, &settings(ReturnMethod::Mean)).is_err());

        let t = t.restrict_to(&["C".into(), "B".into()]);
        let mu = expected_returns(&t, &settings(ReturnMethod::Mean)).unwrap();
        assert_eq!(mu.instruments(), &["C".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_new_checks_lengths() {
        assert!(ReturnVector::new(vec!["A".into()], vec![0.1, 0.2]).is_err());
        assert!(ReturnVector::new(vec!["A".into()], vec![f64::NAN]).is_err());
    }
}
