use serde_json::Value;

use super::format_cell;

/// Print just the allocation: one `ID weight` line per position.
///
/// Envelopes are unwrapped to their `recommendation`; anything else falls back
/// to the first field of the result.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let weights = result_obj
        .as_object()
        .and_then(|m| m.get("recommendation"))
        .unwrap_or(result_obj);

    match weights {
        Value::Object(map) if map.values().all(Value::is_number) => {
            for (id, w) in map {
                println!("{} {}", id, format_cell(w));
            }
        }
        Value::Object(map) => {
            if let Some((key, val)) = map.iter().next() {
                println!("{}: {}", key, format_cell(val));
            }
        }
        other => println!("{}", format_cell(other)),
    }
}
