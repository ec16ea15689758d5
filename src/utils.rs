//! Utility functions for the 3xpl MCP server

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{from_value, Value};

use crate::mcp::protocol::{error_codes, Response};

/// Helper function to extract a required argument from a JSON object
pub fn get_required_arg<T: DeserializeOwned>(
    args: &Value,
    key: &str,
    req_id: &Value,
) -> Result<T, Response> {
    from_value(args.get(key).cloned().unwrap_or(Value::Null)).map_err(|_| {
        Response::error(
            req_id.clone(),
            error_codes::INVALID_PARAMS,
            format!("Missing or invalid required argument: '{}'", key),
        )
    })
}

/// Like [`get_required_arg`] for block heights, which clients send either as
/// a number or as a numeric string.
pub fn get_height_arg(args: &Value, key: &str, req_id: &Value) -> Result<u64, Response> {
    let invalid = || {
        Response::error(
            req_id.clone(),
            error_codes::INVALID_PARAMS,
            format!("Missing or invalid required argument: '{}'", key),
        )
    };
    match args.get(key) {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Renders an amount given in the smallest currency unit as a decimal
/// string, keeping the fraction up to its second significant digit.
///
/// `format_amount("12182", 18)` is `"0.000000000000012"`.
pub fn format_amount(amount: &str, decimals: u32) -> String {
    let amount = amount.trim();
    let (negative, digits) = match amount.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, amount),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return amount.to_string();
    }

    let decimals = decimals as usize;
    let digits = digits.trim_start_matches('0');
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac = frac_part.trim_end_matches('0');

    let mut end = 0;
    let mut significant = 0;
    for (idx, b) in frac.bytes().enumerate() {
        end = idx + 1;
        if b != b'0' {
            significant += 1;
            if significant == 2 {
                break;
            }
        }
    }

    let sign = if negative && (int_part != "0" || end > 0) { "-" } else { "" };
    if end == 0 {
        format!("{}{}", sign, int_part)
    } else {
        format!("{}{}.{}", sign, int_part, &frac[..end])
    }
}

/// Drops sub-second precision from an explorer timestamp
/// (`2024-01-01T10:00:00.123Z` becomes `2024-01-01T10:00:00Z`). Unparseable
/// input is returned unchanged.
pub fn reformat_time(time: &str) -> String {
    DateTime::parse_from_rfc3339(time)
        .map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|_| time.to_string())
}

/// `ethereum-classic` becomes `Ethereum-classic`.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
