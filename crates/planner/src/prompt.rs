//! Prompt assembly constrained to registered operations.
//!
//! The registry is consulted before the completion call so the prompt only
//! enumerates operations that actually exist, pre-filtered by keyword
//! relevance to keep the prompt bounded.

use skein_registry::OperationRegistry;
use skein_types::Operation;

/// Upper bound on operations enumerated in a single prompt.
pub const MAX_PROMPT_OPERATIONS: usize = 24;

/// Selects the operations most relevant to the request text.
///
/// Falls back to the first registered operations when keyword search finds
/// nothing, so a vague request still gets a constrained catalog rather
/// than an empty one.
pub fn candidate_operations(registry: &OperationRegistry, request_text: &str) -> Vec<Operation> {
    let hits = registry.search(request_text, MAX_PROMPT_OPERATIONS);
    if hits.is_empty() {
        return registry.operations().take(MAX_PROMPT_OPERATIONS).cloned().collect();
    }
    hits.iter()
        .filter_map(|hit| registry.lookup(&hit.qualified_name).ok().cloned())
        .collect()
}

/// Renders the completion prompt for a request and its candidate catalog.
pub fn build_prompt(request_text: &str, operations: &[Operation]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You convert an automation request into workflow steps.\n");
    prompt.push_str("Use only the operations listed below, referenced by their exact qualified name.\n\n");
    prompt.push_str("Available operations:\n");
    for operation in operations {
        prompt.push_str(&format!("- {}: {}", operation.qualified_name, operation.summary));
        let inputs: Vec<String> = operation
            .input_schema
            .fields
            .iter()
            .map(|(name, spec)| if spec.required { format!("{name}*") } else { name.clone() })
            .collect();
        if !inputs.is_empty() {
            prompt.push_str(&format!(" (inputs: {})", inputs.join(", ")));
        }
        prompt.push('\n');
    }
    prompt.push_str("\nRequest:\n");
    prompt.push_str(request_text.trim());
    prompt.push_str(
        "\n\nAnswer with a JSON array only. Each element is an object with:\n\
         - \"ref\": short unique name for the step\n\
         - \"operation\": a qualified name from the list\n\
         - \"parameters\": object of input values; reference earlier outputs as \"${{ steps.<ref>.<field> }}\"\n\
         - \"depends_on\": array of refs that must finish first\n\
         - \"branch\": only for decision steps, {\"then\": [refs], \"else\": [refs]}\n\
         Required inputs are marked with *. Do not invent operations.\n",
    );
    prompt
}
