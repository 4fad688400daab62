//! Field extraction from free-form JSON probe responses.
//!
//! Matcher keys are dotted paths (`result.sync_info.latest_block_height`)
//! resolved against the decoded response tree. Leaves render via their
//! canonical JSON form; a path that walks off the tree yields the
//! `<no value>` sentinel so callers can treat "absent" uniformly.

use serde_json::Value;

/// Sentinel returned when a path does not resolve to a leaf.
pub const NO_VALUE: &str = "<no value>";

/// Resolves a dotted path against a JSON tree and renders the leaf.
///
/// Strings render without quotes; numbers, booleans and null render via their
/// canonical JSON form (integers never pick up an exponent). Arrays and
/// objects at the leaf position render as compact JSON.
#[must_use]
pub fn extract_field(value: &Value, path: &str) -> String {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return NO_VALUE.to_string(),
        }
    }
    render(current)
}

/// Renders a JSON value the way the extraction layer exposes it to matchers.
#[must_use]
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Parses a block height in decimal or `0x`-prefixed hexadecimal form.
///
/// # Errors
///
/// Returns a [`std::num::ParseIntError`] when the string is not a valid
/// height in either base.
pub fn parse_height(val: &str) -> Result<i64, std::num::ParseIntError> {
    if let Some(hex) = val.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        val.parse::<i64>()
    }
}
