//! Template reference parsing and interpolation.
//!
//! Parameter values proposed by the planner may embed references to
//! upstream step outputs using the `${{ steps.<id>.<field> }}` syntax and
//! secret placeholders using `${secret:NAME}`. The graph builder scans for
//! references to infer dependencies and data-flow edges; the engine
//! interpolates them against recorded outputs at invocation time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

static STEP_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{\s*steps\.([A-Za-z0-9_-]+)\.([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*\}\}").expect("step reference pattern"));

static SECRET_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{secret:([A-Za-z0-9_-]+)}").expect("secret reference pattern"));

/// A parsed reference to an upstream step's output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFieldRef {
    /// Referenced step identifier (planner-provisional or stable).
    pub step_id: String,
    /// Dotted field path into the step's output. The first segment is the
    /// schema-level field name.
    pub field: String,
}

impl StepFieldRef {
    /// Schema-level output field (first path segment).
    pub fn root_field(&self) -> &str {
        self.field.split('.').next().unwrap_or(&self.field)
    }
}

/// Extracts every step reference embedded in a string, in order.
pub fn parse_step_references(text: &str) -> Vec<StepFieldRef> {
    STEP_REFERENCE
        .captures_iter(text)
        .map(|capture| StepFieldRef {
            step_id: capture[1].to_string(),
            field: capture[2].to_string(),
        })
        .collect()
}

/// Returns the reference when the whole string is exactly one reference
/// (ignoring surrounding whitespace), which lets a parameter bind directly
/// instead of via string substitution.
pub fn pure_reference(text: &str) -> Option<StepFieldRef> {
    let trimmed = text.trim();
    let capture = STEP_REFERENCE.captures(trimmed)?;
    let full = capture.get(0)?;
    if full.start() == 0 && full.end() == trimmed.len() {
        Some(StepFieldRef {
            step_id: capture[1].to_string(),
            field: capture[2].to_string(),
        })
    } else {
        None
    }
}

/// Extracts secret placeholder names (`${secret:NAME}`) from a string.
pub fn parse_secret_refs(text: &str) -> Vec<String> {
    SECRET_REFERENCE.captures_iter(text).map(|capture| capture[1].to_string()).collect()
}

/// Replaces every step reference in a string with the referenced output
/// value, formatted as text. Unresolvable references collapse to the empty
/// string so downstream validation can flag the missing value.
pub fn interpolate_references(text: &str, outputs: &HashMap<String, JsonValue>) -> String {
    STEP_REFERENCE
        .replace_all(text, |capture: &regex::Captures<'_>| {
            let step_id = &capture[1];
            let path = &capture[2];
            outputs
                .get(step_id)
                .and_then(|output| navigate_output_path(output, path))
                .map(|value| format_json_value(&value))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Navigates a dotted path (with optional numeric segments for arrays)
/// through a JSON output payload.
pub fn navigate_output_path(root: &JsonValue, path: &str) -> Option<JsonValue> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        match current {
            JsonValue::Object(map) => current = map.get(segment)?,
            JsonValue::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Formats a JSON value for embedding into a string parameter.
pub fn format_json_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        JsonValue::Number(number) => number.to_string(),
        JsonValue::Bool(boolean) => boolean.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
