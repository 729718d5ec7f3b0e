use serde::de::DeserializeOwned;
use std::io::{self, Read};

/// Deserialize a solve request piped on stdin.
///
/// Yields `None` when stdin is a terminal or carries only whitespace, so the
/// caller can report that neither `--input` nor a pipe was given.
pub fn read_piped<T: DeserializeOwned>() -> Result<Option<T>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut text = String::new();
    io::stdin().read_to_string(&mut text)?;
    parse_piped(&text)
}

fn parse_piped<T: DeserializeOwned>(text: &str) -> Result<Option<T>, Box<dyn std::error::Error>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| format!("stdin is not a valid request: {}", e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Request {
        instruments: Vec<String>,
    }

    #[test]
    fn test_blank_pipe_is_absent() {
        let parsed: Option<Request> = parse_piped(" \n\t").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_piped_request_is_typed() {
        let parsed: Option<Request> = parse_piped("{\"instruments\": [\"SPY\", \"TLT\"]}\n").unwrap();
        assert_eq!(
            parsed,
            Some(Request {
                instruments: vec!["SPY".into(), "TLT".into()]
            })
        );
    }

    #[test]
    fn test_malformed_pipe_names_stdin() {
        let err = parse_piped::<Request>("{\"instruments\": ").unwrap_err();
        assert!(err.to_string().starts_with("stdin is not a valid request"));
    }
}
