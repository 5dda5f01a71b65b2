//! Candidate steps proposed by the completion service.
//!
//! Candidates are untrusted input. They carry provisional `ref` names the
//! model invented; the graph builder re-derives stable ids, dependencies,
//! and edges from them and is the sole authority on structure.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One proposed step, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateStep {
    /// Provisional name other candidates use to reference this step.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Qualified operation name the step should invoke.
    pub operation: String,
    /// Suggested parameter values; strings may embed
    /// `${{ steps.<ref>.<field> }}` references.
    #[serde(default)]
    pub parameters: IndexMap<String, JsonValue>,
    /// Suggested upstream refs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Present when the model marked this step as a decision point.
    #[serde(default)]
    pub branch: Option<CandidateBranch>,
}

/// Successor refs for a proposed decision point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CandidateBranch {
    /// Refs executed when the condition resolves true.
    #[serde(rename = "then", default)]
    pub then_refs: Vec<String>,
    /// Refs executed when the condition resolves false.
    #[serde(rename = "else", default)]
    pub else_refs: Vec<String>,
}

/// Parses the completion text into candidate steps.
///
/// Models routinely wrap JSON in markdown fences; those are tolerated.
/// Anything else malformed is an error string describing what was wrong.
pub fn parse_candidates(completion_text: &str) -> Result<Vec<CandidateStep>, String> {
    let stripped = strip_code_fences(completion_text);
    let json_slice = extract_json_array(stripped).ok_or_else(|| "no JSON array found in completion".to_string())?;
    serde_json::from_str(json_slice).map_err(|error| format!("candidate JSON did not parse: {error}"))
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}

fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
