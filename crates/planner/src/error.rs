//! Planner failure taxonomy.

use thiserror::Error;

/// Failures surfaced by the planning pipeline.
///
/// All of these are recoverable by the user: `Unavailable` by trying again
/// later, the others by rephrasing the request.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    /// The completion service kept failing transiently.
    #[error("the planning service is unavailable after {attempts} attempts ({message}); please try again in a few moments")]
    Unavailable {
        /// Attempts made, including the initial call.
        attempts: u32,
        /// Last underlying failure.
        message: String,
    },
    /// The request was too vague or referenced capabilities that are not
    /// connected; each suggestion is a concrete way to fix it.
    #[error("the request could not be turned into a workflow: {}", suggestions.join("; "))]
    IncompleteRequest {
        /// Concrete, user-facing suggestions.
        suggestions: Vec<String>,
    },
    /// The service answered, but not with parseable candidates.
    #[error("the planning service returned an unusable answer ({message}); rephrasing the request usually helps")]
    MalformedResponse {
        /// What was wrong with the response.
        message: String,
    },
}
