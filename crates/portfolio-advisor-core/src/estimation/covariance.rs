use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::estimation::{period_returns, EstimationSettings, PeriodReturns};
use crate::market_data::PriceTable;
use crate::types::InstrumentId;
use crate::PortfolioResult;

/// Annualized covariance of period returns, indexed like the `ReturnVector`
/// built from the same table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    instruments: Vec<InstrumentId>,
    values: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
    /// Wrap an explicit matrix. Only the shape is checked here; symmetry and
    /// definiteness are the solver's business.
    pub fn new(instruments: Vec<InstrumentId>, values: Vec<Vec<f64>>) -> PortfolioResult<Self> {
        let n = instruments.len();
        if values.len() != n {
            return Err(PortfolioError::invalid(
                "covariance_matrix",
                format!("Expected {}x{} matrix but got {} rows", n, n, values.len()),
            ));
        }
        for (i, row) in values.iter().enumerate() {
            if row.len() != n {
                return Err(PortfolioError::invalid(
                    "covariance_matrix",
                    format!("Row {} has {} columns, expected {}", i, row.len(), n),
                ));
            }
        }
        Ok(CovarianceMatrix {
            instruments,
            values,
        })
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.instruments.iter().position(|id| id == a)?;
        let j = self.instruments.iter().position(|id| id == b)?;
        Some(self.values[i][j])
    }

    pub fn variance(&self, id: &str) -> Option<f64> {
        self.get(id, id)
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        let n = self.len();
        DMatrix::from_fn(n, n, |i, j| self.values[i][j])
    }
}

/// Sample covariance (n - 1 denominator) over pairwise-complete periods,
/// annualized with the same factor as the expected returns.
pub fn sample_covariance(
    table: &PriceTable,
    settings: &EstimationSettings,
) -> PortfolioResult<CovarianceMatrix> {
    let returns = period_returns(table, settings.log_returns)?;
    from_period_returns(&returns, settings)
}

#[allow(clippy::needless_range_loop)]
pub(crate) fn from_period_returns(
    returns: &PeriodReturns,
    settings: &EstimationSettings,
) -> PortfolioResult<CovarianceMatrix> {
    let n = returns.instruments.len();
    let periods = settings.frequency.periods_per_year();
    let mut values = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in i..n {
            let pairs: Vec<(f64, f64)> = returns.series[i]
                .iter()
                .zip(returns.series[j].iter())
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .collect();
            if pairs.len() < 2 {
                let mut offending = vec![returns.instruments[i].clone()];
                if i != j {
                    offending.push(returns.instruments[j].clone());
                }
                return Err(PortfolioError::insufficient(
                    &offending,
                    format!(
                        "covariance needs at least 2 overlapping return periods, found {}",
                        pairs.len()
                    ),
                ));
            }
            let count = pairs.len() as f64;
            let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / count;
            let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / count;
            let cov = pairs
                .iter()
                .map(|(a, b)| (a - mean_a) * (b - mean_b))
                .sum::<f64>()
                / (count - 1.0);
            values[i][j] = cov * periods;
            values[j][i] = cov * periods;
        }
    }

    Ok(CovarianceMatrix {
        instruments: returns.instruments.clone(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::returns::ReturnMethod;
    use crate::estimation::ReturnFrequency;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn table(columns: Vec<(&str, Vec<Option<f64>>)>) -> PriceTable {
        let n = columns[0].1.len();
        let dates = (0..n)
            .map(|i| NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + chrono::Days::new(i as u64))
            .collect();
        PriceTable::new(
            dates,
            columns.into_iter().map(|(id, c)| (id.to_string(), c)).collect(),
        )
        .unwrap()
    }

    fn monthly() -> EstimationSettings {
        EstimationSettings {
            frequency: ReturnFrequency::Monthly,
            method: ReturnMethod::Mean,
            log_returns: false,
        }
    }

    #[test]
    fn test_variance_matches_hand_calculation() {
        // Returns: 0.10, -0.10, 0.10 -> mean 1/30, sample var = 0.04/3
        let t = table(vec![(
            "A",
            vec![Some(100.0), Some(110.0), Some(99.0), Some(108.9)],
        )]);
        let cov = sample_covariance(&t, &monthly()).unwrap();
        assert_relative_eq!(
            cov.variance("A").unwrap(),
            (0.04 / 3.0) * 12.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_symmetric_with_matching_order() {
        let t = table(vec![
            ("X", vec![Some(10.0), Some(10.4), Some(10.1), Some(10.6), Some(10.2)]),
            ("Y", vec![Some(20.0), Some(20.1), Some(20.5), Some(20.2), Some(20.9)]),
            ("Z", vec![Some(5.0), Some(5.2), Some(5.1), Some(5.3), Some(5.25)]),
        ]);
        let cov = sample_covariance(&t, &monthly()).unwrap();
        assert_eq!(cov.instruments(), t.instruments());
        for a in ["X", "Y", "Z"] {
            assert!(cov.variance(a).unwrap() >= 0.0);
            for b in ["X", "Y", "Z"] {
                assert_eq!(cov.get(a, b), cov.get(b, a));
            }
        }
    }

    #[test]
    fn test_pairwise_complete_uses_overlap_only() {
        // B misses one price; its 55 -> 60 move lands on period 2, so the pair
        // overlaps on periods 0, 2 and 3
        let t = table(vec![
            ("A", vec![Some(100.0), Some(110.0), Some(99.0), Some(108.9), Some(119.79)]),
            ("B", vec![Some(50.0), Some(55.0), None, Some(60.0), Some(66.0)]),
        ]);
        let cov = sample_covariance(&t, &monthly()).unwrap();
        // A returns 10% on each of those periods -> zero covariance
        assert_relative_eq!(cov.get("A", "B").unwrap(), 0.0, epsilon = 1e-12);
        assert!(cov.variance("A").unwrap() > 0.0);
    }

    #[test]
    fn test_too_little_overlap_is_insufficient() {
        let t = table(vec![
            ("A", vec![Some(1.0), Some(1.1), None, None]),
            ("B", vec![None, None, Some(2.0), Some(2.2)]),
        ]);
        let err = sample_covariance(&t, &monthly()).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_DATA");
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let bad = CovarianceMatrix::new(
            vec!["A".into(), "B".into()],
            vec![vec![0.04, 0.01], vec![0.01]],
        );
        assert!(bad.is_err());
    }
}
