use chrono::NaiveDate;
use std::io;

use portfolio_advisor_core::market_data::PriceTable;
use portfolio_advisor_core::InstrumentId;

use super::file;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Load a closing-price CSV: a header `date,ID1,ID2,...` followed by one row
/// per ISO date. Empty cells are missing prices.
pub fn read_price_csv(path: &str) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let canonical = file::resolve_path(path)?;
    let handle = std::fs::File::open(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    parse_price_csv(handle)
        .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e).into())
}

pub fn parse_price_csv<R: io::Read>(reader: R) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err("expected a header row 'date,ID1,ID2,...'".into());
    }
    let instruments: Vec<InstrumentId> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        // header is line 1
        let line = line + 2;
        let date_cell = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_cell, DATE_FORMAT)
            .map_err(|e| format!("line {}: invalid date '{}': {}", line, date_cell, e))?;

        let mut prices = Vec::with_capacity(instruments.len());
        for (col, id) in instruments.iter().enumerate() {
            let cell = record.get(col + 1).unwrap_or_default();
            if cell.is_empty() {
                prices.push(None);
                continue;
            }
            let price: f64 = cell
                .parse()
                .map_err(|_| format!("line {}: invalid price '{}' for {}", line, cell, id))?;
            prices.push(Some(price));
        }
        rows.push((date, prices));
    }

    rows.sort_by_key(|(date, _)| *date);
    let dates = rows.iter().map(|(date, _)| *date).collect();
    let columns = instruments
        .iter()
        .enumerate()
        .map(|(col, id)| (id.clone(), rows.iter().map(|(_, p)| p[col]).collect()))
        .collect();
    Ok(PriceTable::new(dates, columns)?)
}
