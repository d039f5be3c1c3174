//! Decoding of the YAML bodies carried by `OK` replies.
//!
//! The server only ever emits two shapes, so this is not a YAML parser:
//!
//! ```text
//! ---               ---
//! - default         current-jobs-ready: 3
//! - emails          name: "emails"
//! ```
//!
//! Lines that do not fit the expected shape are skipped.

/// Decode a sequence document into its items.
pub fn parse_list(body: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .filter_map(|line| line.strip_prefix("- "))
        .map(|item| unquote(item.trim()).to_string())
        .collect()
}

/// Decode a flat mapping document into key/value pairs, in document order.
///
/// Values are trimmed but keep their quotes, so callers can tell the string
/// `"42"` from the number `42`.
pub fn parse_dict(body: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .filter(|line| *line != "---")
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| !key.is_empty() && !key.starts_with(' '))
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

/// Strip one pair of surrounding double quotes, if present.
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
