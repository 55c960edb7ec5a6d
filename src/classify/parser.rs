use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::RawClassification;

/// Parses a model reply into exactly `expected` classifications, in input order.
pub fn parse_classifications(response: &str, expected: usize) -> Result<Vec<RawClassification>> {
    let json_str = extract_json(response)?;
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| Error::ParseError(format!("Failed to parse model response: {}", e)))?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("results").or_else(|| obj.remove("reviews")) {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::ParseError("Response has no results array".to_string())),
        },
        _ => return Err(Error::ParseError("Response is not a JSON object".to_string())),
    };

    let mut results = entries
        .into_iter()
        .map(serde_json::from_value::<RawClassification>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::ParseError(format!("Malformed classification entry: {}", e)))?;

    if results.len() != expected {
        return Err(Error::Misaligned {
            expected,
            got: results.len(),
        });
    }

    align_by_index(&mut results)?;
    Ok(results)
}

/// When every entry carries an index, reorder by it. Indices must cover
/// `1..=n` (or `0..n`) exactly.
fn align_by_index(results: &mut [RawClassification]) -> Result<()> {
    if results.is_empty() || results.iter().any(|r| r.index.is_none()) {
        return Ok(());
    }

    results.sort_by_key(|r| r.index);
    let n = results.len();
    let offset = results[0].index.unwrap_or(0);
    let contiguous = (offset == 0 || offset == 1)
        && results
            .iter()
            .enumerate()
            .all(|(i, r)| r.index == Some(i + offset));

    if !contiguous {
        return Err(Error::Misaligned { expected: n, got: n });
    }
    Ok(())
}

/// The reply's JSON payload: inside the first fenced block if there is one,
/// the first bracketed object or array through its matching close.
fn extract_json(text: &str) -> Result<&str> {
    let body = fenced(text).unwrap_or(text);
    body.find(['{', '['])
        .and_then(|start| matching_close(&body[start..]).map(|len| &body[start..start + len]))
        .ok_or_else(|| Error::ParseError("No JSON object or array in response".to_string()))
}

fn fenced(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("```")?;
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.split_once("```").map(|(inner, _)| inner)
}

/// Byte length of the bracketed value `s` starts with. Brackets inside
/// strings are skipped; a mismatched close yields `None`.
fn matching_close(s: &str) -> Option<usize> {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.pop() != Some(c) {
                    return None;
                }
                if open.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
