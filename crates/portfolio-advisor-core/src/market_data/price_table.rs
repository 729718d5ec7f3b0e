use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::PortfolioError;
use crate::market_data::lookback::LookbackPeriod;
use crate::types::InstrumentId;
use crate::PortfolioResult;

/// One dated observation: a closing price per instrument, `None` when the
/// instrument did not print that day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub prices: BTreeMap<InstrumentId, Option<f64>>,
}

/// Time-ordered closing prices for a fixed, ordered set of instruments.
///
/// Stored column-wise. Dates are strictly increasing and every present price
/// is finite and positive; the constructors enforce this. The instrument
/// order is the order every downstream statistic uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PriceRow>", into = "Vec<PriceRow>")]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    instruments: Vec<InstrumentId>,
    columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Build from dates plus one price column per instrument.
    ///
    /// NaN entries are read as missing.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<(InstrumentId, Vec<Option<f64>>)>,
    ) -> PortfolioResult<Self> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PortfolioError::invalid(
                "price_table.dates",
                format!(
                    "dates must be strictly increasing ({} is followed by {})",
                    pair[0], pair[1]
                ),
            ));
        }

        let mut seen = HashSet::new();
        let mut instruments = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (id, column) in columns {
            if !seen.insert(id.clone()) {
                return Err(PortfolioError::invalid(
                    "price_table.instruments",
                    format!("instrument '{}' appears twice", id),
                ));
            }
            if column.len() != dates.len() {
                return Err(PortfolioError::invalid(
                    "price_table.columns",
                    format!(
                        "'{}' has {} prices for {} dates",
                        id,
                        column.len(),
                        dates.len()
                    ),
                ));
            }
            let mut cleaned = Vec::with_capacity(column.len());
            for (price, date) in column.into_iter().zip(dates.iter()) {
                match price {
                    Some(p) if p.is_nan() => cleaned.push(None),
                    Some(p) if !p.is_finite() || p <= 0.0 => {
                        return Err(PortfolioError::invalid(
                            "price_table.prices",
                            format!("'{}' has non-positive price {} on {}", id, p, date),
                        ));
                    }
                    other => cleaned.push(other),
                }
            }
            instruments.push(id);
            values.push(cleaned);
        }

        Ok(PriceTable {
            dates,
            instruments,
            columns: values,
        })
    }

    /// Build from dated rows. Rows are sorted by date; the instrument set is
    /// the union of every row's keys, in identifier order, and an instrument
    /// absent from a row counts as missing on that date.
    pub fn from_rows(mut rows: Vec<PriceRow>) -> PortfolioResult<Self> {
        rows.sort_by_key(|r| r.date);
        let mut ids: Vec<InstrumentId> = rows
            .iter()
            .flat_map(|r| r.prices.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();

        let dates = rows.iter().map(|r| r.date).collect();
        let columns = ids
            .into_iter()
            .map(|id| {
                let column = rows
                    .iter()
                    .map(|r| r.prices.get(&id).copied().flatten())
                    .collect();
                (id, column)
            })
            .collect();
        PriceTable::new(dates, columns)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    /// Number of dated rows.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn column(&self, id: &str) -> Option<&[Option<f64>]> {
        self.position(id).map(|i| self.columns[i].as_slice())
    }

    /// Count of dates on which `id` has a price.
    pub fn observations(&self, id: &str) -> usize {
        self.column(id)
            .map(|c| c.iter().filter(|p| p.is_some()).count())
            .unwrap_or(0)
    }

    /// Keep only `ids`, in the order given. Identifiers the table does not
    /// know are skipped.
    pub fn restrict_to(&self, ids: &[InstrumentId]) -> PriceTable {
        let mut instruments = Vec::new();
        let mut columns = Vec::new();
        for id in ids {
            if let Some(i) = self.position(id) {
                instruments.push(id.clone());
                columns.push(self.columns[i].clone());
            }
        }
        PriceTable {
            dates: self.dates.clone(),
            instruments,
            columns,
        }
    }

    /// Split off instruments with no price at all in this table.
    ///
    /// Returns the retained table and the dropped identifiers.
    pub fn drop_all_missing(&self) -> (PriceTable, Vec<InstrumentId>) {
        let mut kept_ids = Vec::new();
        let mut kept_cols = Vec::new();
        let mut dropped = Vec::new();
        for (id, column) in self.instruments.iter().zip(self.columns.iter()) {
            if column.iter().any(|p| p.is_some()) {
                kept_ids.push(id.clone());
                kept_cols.push(column.clone());
            } else {
                dropped.push(id.clone());
            }
        }
        let table = PriceTable {
            dates: self.dates.clone(),
            instruments: kept_ids,
            columns: kept_cols,
        };
        (table, dropped)
    }

    /// Rows inside `period`, measured back from the last date in the table.
    pub fn window(&self, period: &LookbackPeriod) -> PriceTable {
        let start = match self.dates.last().and_then(|end| period.start_date(*end)) {
            Some(start) => start,
            None => return self.clone(),
        };
        let first = self.dates.partition_point(|d| *d < start);
        PriceTable {
            dates: self.dates[first..].to_vec(),
            instruments: self.instruments.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c[first..].to_vec())
                .collect(),
        }
    }

    pub fn rows(&self) -> Vec<PriceRow> {
        self.dates
            .iter()
            .enumerate()
            .map(|(t, date)| PriceRow {
                date: *date,
                prices: self
                    .instruments
                    .iter()
                    .zip(self.columns.iter())
                    .map(|(id, column)| (id.clone(), column[t]))
                    .collect(),
            })
            .collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i == id)
    }
}

impl TryFrom<Vec<PriceRow>> for PriceTable {
    type Error = PortfolioError;

    fn try_from(rows: Vec<PriceRow>) -> Result<Self, Self::Error> {
        PriceTable::from_rows(rows)
    }
}

impl From<PriceTable> for Vec<PriceRow> {
    fn from(table: PriceTable) -> Self {
        table.rows()
    }
}
