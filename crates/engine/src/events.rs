//! Run lifecycle events and control commands.
//!
//! The engine emits events over an unbounded tokio channel so progress is
//! observable step by step; the caller issues control commands through the
//! corresponding control channel.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use skein_types::{RunState, StepExecState};

/// Commands a caller can issue against a running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    /// Stop launching new steps; in-flight invocations finish.
    Pause,
    /// Re-evaluate eligible steps after a pause.
    Resume,
    /// Skip everything that has not started and end the run.
    Cancel,
}

/// Lifecycle notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The run was created and is about to start.
    RunStarted {
        /// Run identifier.
        run_id: String,
        /// Start timestamp.
        at: DateTime<Utc>,
    },
    /// The run moved to a new lifecycle state.
    RunStatusChanged {
        /// New state.
        state: RunState,
        /// Optional operator-facing detail.
        message: Option<String>,
    },
    /// A step began executing.
    StepStarted {
        /// Step identifier.
        step_id: String,
        /// Launch timestamp.
        at: DateTime<Utc>,
    },
    /// A step reached a terminal state.
    StepFinished {
        /// Step identifier.
        step_id: String,
        /// Terminal state.
        state: StepExecState,
        /// Attempts made (0 when the step never ran).
        attempts: u32,
        /// Output payload for succeeded steps.
        output: JsonValue,
        /// Error detail for failed steps.
        error: Option<String>,
    },
    /// The run reached a terminal state.
    RunCompleted {
        /// Terminal state.
        state: RunState,
        /// Finish timestamp.
        finished_at: DateTime<Utc>,
    },
}
