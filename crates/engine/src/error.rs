//! Engine-level execution errors.

use thiserror::Error;

use crate::traits::StoreError;

/// Failures that abort a run driver, as opposed to failing a single step.
///
/// Step-level invocation failures never surface here; they fail the step
/// (and then the run) through the persisted `StepExecution` records.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The run store rejected a persistence call; the run cannot continue
    /// crash-safe without it.
    #[error("run persistence failed: {0}")]
    Store(#[from] StoreError),
    /// The operation catalog lock was poisoned.
    #[error("operation catalog unavailable: {message}")]
    RegistryUnavailable {
        /// Underlying detail.
        message: String,
    },
}
