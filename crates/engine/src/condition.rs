//! Local evaluation of condition steps.
//!
//! A condition step compares an interpolated `left` value against `right`
//! using a small fixed comparator set. Its output is a boolean `result`
//! field that selects between the step's two successor sets.

use serde_json::Value as JsonValue;
use skein_util::format_json_value;

/// Comparators accepted in a condition step's `op` parameter.
const COMPARATORS: [&str; 7] = ["eq", "ne", "gt", "lt", "gte", "lte", "contains"];

/// Evaluates `left <op> right` over resolved JSON values.
///
/// Ordering comparators coerce both sides to numbers; equality falls back
/// to formatted-text comparison so `"1000"` and `1000` compare equal the
/// way planner-suggested literals expect.
pub fn evaluate_comparison(left: &JsonValue, comparator: &str, right: &JsonValue) -> Result<bool, String> {
    match comparator {
        "eq" => Ok(loosely_equal(left, right)),
        "ne" => Ok(!loosely_equal(left, right)),
        "gt" | "lt" | "gte" | "lte" => {
            let left_number = as_number(left).ok_or_else(|| format!("left operand is not numeric: {left}"))?;
            let right_number = as_number(right).ok_or_else(|| format!("right operand is not numeric: {right}"))?;
            Ok(match comparator {
                "gt" => left_number > right_number,
                "lt" => left_number < right_number,
                "gte" => left_number >= right_number,
                _ => left_number <= right_number,
            })
        }
        "contains" => Ok(contains(left, right)),
        other => Err(format!(
            "unknown comparator '{other}'; expected one of: {}",
            COMPARATORS.join(", ")
        )),
    }
}

fn loosely_equal(left: &JsonValue, right: &JsonValue) -> bool {
    if left == right {
        return true;
    }
    format_json_value(left) == format_json_value(right)
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match haystack {
        JsonValue::String(text) => text.contains(&format_json_value(needle)),
        JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        _ => false,
    }
}
