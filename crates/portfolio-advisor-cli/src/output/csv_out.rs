use serde_json::Value;
use std::io;

use super::format_cell;

/// Write output as CSV to stdout.
///
/// A bare recommendation becomes `instrument,weight` rows; an envelope prints
/// its `result` as `field,value` rows.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());
    let _ = write_csv(&mut wtr, value);
    let _ = wtr.flush();
}

fn write_csv<W: io::Write>(wtr: &mut csv::Writer<W>, value: &Value) -> csv::Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(result)) = map.get("result") {
                wtr.write_record(["field", "value"])?;
                for (key, val) in result {
                    wtr.write_record([key.as_str(), &format_cell(val)])?;
                }
            } else if map.values().all(Value::is_number) {
                wtr.write_record(["instrument", "weight"])?;
                for (key, val) in map {
                    wtr.write_record([key.as_str(), &format_cell(val)])?;
                }
            } else {
                wtr.write_record(["field", "value"])?;
                for (key, val) in map {
                    wtr.write_record([key.as_str(), &format_cell(val)])?;
                }
            }
        }
        _ => wtr.write_record([&format_cell(value)])?,
    }
    Ok(())
}
