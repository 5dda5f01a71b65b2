//! Service-level failure taxonomy.

use skein_engine::StoreError;
use skein_planner::PlannerError;
use skein_types::{StateTransitionError, ValidationReport};
use thiserror::Error;

/// Failures surfaced by the service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The planning pipeline failed; see the inner error for user-facing
    /// guidance.
    #[error(transparent)]
    Planner(#[from] PlannerError),
    /// The workflow has blocking validation errors and cannot be saved or
    /// executed; the full report is attached.
    #[error("the workflow has {} blocking validation error(s)", report.errors.len())]
    Validation {
        /// The complete validation report.
        report: ValidationReport,
    },
    /// A run-control command was not valid for the run's current state.
    #[error(transparent)]
    StateTransition(#[from] StateTransitionError),
    /// Run persistence failed.
    #[error(transparent)]
    RunStore(#[from] StoreError),
    /// Unknown workflow id.
    #[error("workflow '{workflow_id}' was not found")]
    WorkflowNotFound {
        /// Requested workflow id.
        workflow_id: String,
    },
    /// Unknown or no longer controllable run id.
    #[error("run '{run_id}' is not active")]
    RunNotActive {
        /// Requested run id.
        run_id: String,
    },
    /// The workflow exists but is not in an executable state.
    #[error("workflow '{workflow_id}' is not executable (status: {status})")]
    NotExecutable {
        /// Requested workflow id.
        workflow_id: String,
        /// Its current status.
        status: String,
    },
    /// Workflow persistence failed.
    #[error("workflow store error: {0}")]
    WorkflowStore(String),
    /// Shared state became unusable (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}
