use serde_json::Value;
use std::io::{self, Write};

/// Pretty JSON with a trailing newline. Object keys keep insertion order, so
/// a recommendation stays sorted by descending weight.
pub fn render_json(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value).map(|mut text| {
        text.push('\n');
        text
    })
}

/// Write the rendered document to stdout; a closed pipe (`| head`) is not an error.
pub fn print_json(value: &Value) {
    let text = match render_json(value) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("could not render output as JSON: {}", e);
            return;
        }
    };
    if let Err(e) = io::stdout().lock().write_all(text.as_bytes()) {
        if e.kind() != io::ErrorKind::BrokenPipe {
            eprintln!("could not write output: {}", e);
        }
    }
}
