//! Execution run records and the run-state machine.
//!
//! One [`ExecutionRun`] exists per execution attempt. Runs are append-only
//! once created: the engine adds [`StepExecution`] entries and advances
//! states, and every transition is checked against the state machine so an
//! invalid control command is rejected with no side effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Lifecycle state of an execution run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created but not yet started.
    Pending,
    /// Actively evaluating and launching steps.
    Running,
    /// New steps are held back; in-flight invocations finish.
    Paused,
    /// Every step reached a terminal state without failure.
    Completed,
    /// A step exhausted its attempts, failing the run.
    Failed,
    /// Cancelled on request; unfinished steps were skipped.
    Cancelled,
}

impl RunState {
    /// True once the run can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }

    /// Whether the state machine permits moving to `next`.
    ///
    /// `pending → running | cancelled`, `running ⇄ paused`, and both active
    /// states may finish as `completed`, `failed`, or `cancelled`. Terminal
    /// states admit nothing.
    pub fn can_transition_to(self, next: RunState) -> bool {
        match self {
            RunState::Pending => matches!(next, RunState::Running | RunState::Cancelled),
            RunState::Running => matches!(
                next,
                RunState::Paused | RunState::Completed | RunState::Failed | RunState::Cancelled
            ),
            RunState::Paused => matches!(next, RunState::Running | RunState::Cancelled),
            RunState::Completed | RunState::Failed | RunState::Cancelled => false,
        }
    }
}

/// Rejected run-control command or state change.
///
/// Carries enough context for actionable guidance; these are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid run state transition from {from:?} to {to:?}")]
pub struct StateTransitionError {
    /// State the run was in when the command arrived.
    pub from: RunState,
    /// State the command would have produced.
    pub to: RunState,
}

/// One attempt at executing a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRun {
    /// Stable run identifier.
    pub id: String,
    /// Workflow this run executes.
    pub workflow_id: String,
    /// Current lifecycle state.
    pub state: RunState,
    /// Per-step progress records, created as steps become eligible.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the run reaches a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    /// Creates a fresh pending run.
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            state: RunState::Pending,
            step_executions: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Looks up the execution record for a step.
    pub fn step_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|execution| execution.step_id == step_id)
    }

    /// Mutable variant of [`Self::step_execution`].
    pub fn step_execution_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.step_executions.iter_mut().find(|execution| execution.step_id == step_id)
    }

    /// Advances the run state, enforcing the state machine.
    pub fn transition(&mut self, next: RunState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(StateTransitionError { from: self.state, to: next });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Lifecycle state of a single step within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepExecState {
    /// Dependencies not yet satisfied.
    Waiting,
    /// Invocation in flight.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Exhausted its attempts.
    Failed,
    /// Not executed: unselected branch, cancelled run, or failed upstream.
    Skipped,
}

impl StepExecState {
    /// True once the step can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepExecState::Succeeded | StepExecState::Failed | StepExecState::Skipped)
    }
}

/// Progress record for one step of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    /// Step this record tracks.
    pub step_id: String,
    /// Current state.
    pub state: StepExecState,
    /// Attempt counter; 1-based once the step has run.
    #[serde(default)]
    pub attempt: u32,
    /// Resolved input parameters at launch time. Secret placeholders are
    /// recorded unresolved.
    #[serde(default)]
    pub input_snapshot: JsonValue,
    /// Output payload captured on success.
    #[serde(default)]
    pub output_snapshot: JsonValue,
    /// Terminal error message, when failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Set when the step first starts running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the step reaches a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Creates a waiting record for a step.
    pub fn waiting(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            state: StepExecState::Waiting,
            attempt: 0,
            input_snapshot: JsonValue::Null,
            output_snapshot: JsonValue::Null,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}
