//! Typed validation issues and the report that collects them.
//!
//! Structural graph problems are never raised as exceptions mid-walk; the
//! validator collects every finding into a [`ValidationReport`] so a user
//! sees the whole picture at once. Errors block saving and execution,
//! warnings do not.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether an issue blocks validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocking; the workflow cannot be marked validated.
    Error,
    /// Advisory; surfaced but does not block.
    Warning,
}

/// A single validation finding with enough context to act on.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// The dependency graph contains a cycle.
    #[error("circular dependency involving steps: {}", step_ids.join(", "))]
    CircularDependency {
        /// Steps participating in the cycle, sorted for stable output.
        step_ids: Vec<String>,
    },
    /// A step references an operation the registry does not know.
    #[error("step '{step_id}' references unknown operation '{qualified_name}'")]
    UnknownOperation { step_id: String, qualified_name: String },
    /// A step depends on an id that is not part of the workflow.
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },
    /// A step lists itself as a dependency.
    #[error("step '{step_id}' cannot depend on itself")]
    SelfDependency { step_id: String },
    /// Two steps share an identifier.
    #[error("duplicate step identifier '{step_id}'")]
    DuplicateStepId { step_id: String },
    /// A required input field has neither a literal nor an edge binding.
    #[error("step '{step_id}' is missing a value for required field '{field}'; bind a literal or an upstream output")]
    UnboundRequiredField { step_id: String, field: String },
    /// An edge names an output field absent from the producer's schema.
    #[error("step '{step_id}' binds '{field}' from step '{from_step_id}', which declares no such output")]
    UnknownOutputField {
        step_id: String,
        from_step_id: String,
        field: String,
    },
    /// An edge binds an input field absent from the consumer's schema.
    #[error("step '{step_id}' binds unknown input field '{field}'")]
    UnknownInputField { step_id: String, field: String },
    /// A data-flow edge exists without the matching dependency entry.
    #[error("data-flow edge from '{from_step_id}' to '{to_step_id}' has no matching dependency")]
    EdgeWithoutDependency { from_step_id: String, to_step_id: String },
    /// A condition step has an empty branch.
    #[error("condition step '{step_id}' must have at least one step in each branch")]
    ConditionMissingBranch { step_id: String },
    /// No trigger step could be identified.
    #[error("no trigger step specified; the workflow will only run on demand")]
    NoTriggerStep,
    /// More than one upstream output could satisfy a required field; the
    /// earliest-declared edge was kept.
    #[error("step '{step_id}' field '{field}' is satisfiable by multiple upstream outputs; kept the earliest, dropped '{dropped_from}'")]
    AmbiguousBinding {
        step_id: String,
        field: String,
        dropped_from: String,
    },
}

impl ValidationIssue {
    /// Severity classification for this issue.
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::CircularDependency { .. }
            | ValidationIssue::UnknownOperation { .. }
            | ValidationIssue::UnknownDependency { .. }
            | ValidationIssue::SelfDependency { .. }
            | ValidationIssue::DuplicateStepId { .. }
            | ValidationIssue::UnboundRequiredField { .. }
            | ValidationIssue::UnknownOutputField { .. }
            | ValidationIssue::UnknownInputField { .. }
            | ValidationIssue::EdgeWithoutDependency { .. }
            | ValidationIssue::ConditionMissingBranch { .. } => Severity::Error,
            ValidationIssue::NoTriggerStep | ValidationIssue::AmbiguousBinding { .. } => Severity::Warning,
        }
    }
}

/// Outcome of validating a workflow: blocking errors plus advisories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationReport {
    /// Blocking findings.
    pub errors: Vec<ValidationIssue>,
    /// Non-blocking findings.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Routes an issue into the matching bucket.
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity() {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    /// True when no blocking issue was found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Absorbs another report's findings.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}
