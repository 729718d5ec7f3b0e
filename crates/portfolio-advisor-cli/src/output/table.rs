use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::format_cell;

/// Format output as a table using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result_table(result, map);
            } else {
                print_object(map);
            }
        }
        _ => println!("{}", value),
    }
}

fn print_result_table(result: &Value, envelope: &serde_json::Map<String, Value>) {
    if let Value::Object(res_map) = result {
        // Nested weight maps read better as their own table
        let mut scalars = serde_json::Map::new();
        let mut nested = Vec::new();
        for (key, val) in res_map {
            match val {
                Value::Object(inner) if inner.values().all(Value::is_number) && !inner.is_empty() => {
                    nested.push((key, inner))
                }
                _ => {
                    scalars.insert(key.clone(), val.clone());
                }
            }
        }
        print_object(&scalars);
        for (key, inner) in nested {
            println!("\n{}:", key);
            print_object(inner);
        }
    } else {
        print_object(envelope);
    }

    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_object(map: &serde_json::Map<String, Value>) {
    let numeric = !map.is_empty() && map.values().all(Value::is_number);
    let mut builder = Builder::default();
    if numeric {
        builder.push_record(["Instrument", "Weight"]);
    } else {
        builder.push_record(["Field", "Value"]);
    }
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        _ => format_cell(value),
    }
}
