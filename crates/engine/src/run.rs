//! The per-run driver.
//!
//! Wave scheduling: collect every step whose dependencies succeeded and
//! whose branch was selected, launch the set concurrently (bounded by
//! `max_concurrency`), persist each transition, re-evaluate. Control
//! commands are drained between launches, so `pause` lets in-flight
//! invocations finish while nothing new starts, and `cancel` skips
//! everything that has not started. Late or invalid commands are ignored
//! here; callers validate transitions against the run state machine before
//! issuing them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{Value as JsonValue, json};
use skein_graph::conditional::{BranchConstraint, branch_membership};
use skein_registry::SharedRegistry;
use skein_types::{ExecutionRun, Operation, RunState, Step, StepExecState, StepExecution, StepKind, Workflow};
use skein_util::{redact_sensitive, retry_delay};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, warn};

use crate::binding::resolve_arguments;
use crate::condition::evaluate_comparison;
use crate::error::ExecutionError;
use crate::events::{RunControl, RunEvent};
use crate::traits::{ProviderInvoker, RateLimiter, RunStore, SecretsResolver};

/// Tunables for a single run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently in-flight steps.
    pub max_concurrency: usize,
    /// Attempts per step before it fails, including the first.
    pub max_attempts: u32,
    /// Base retry backoff, doubled per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Collaborators a run driver needs.
#[derive(Clone)]
pub struct EngineDeps {
    /// Provider invocation seam.
    pub invoker: Arc<dyn ProviderInvoker>,
    /// Secret resolution seam.
    pub secrets: Arc<dyn SecretsResolver>,
    /// Throttling seam.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Run persistence seam.
    pub store: Arc<dyn RunStore>,
    /// Operation catalog.
    pub registry: SharedRegistry,
}

/// Result of one step execution attempt series.
struct StepOutcome {
    step_id: String,
    state: StepExecState,
    attempts: u32,
    input_snapshot: JsonValue,
    output: JsonValue,
    error: Option<String>,
}

/// Drives a validated workflow to a terminal run state.
pub async fn drive_run(
    workflow: Workflow,
    run_id: String,
    trigger_payload: JsonValue,
    deps: EngineDeps,
    config: EngineConfig,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<ExecutionRun, ExecutionError> {
    let mut run = ExecutionRun::new(run_id, workflow.id.clone());
    for step in &workflow.steps {
        run.step_executions.push(StepExecution::waiting(&step.id));
    }
    deps.store.create_run(&run).await?;
    let _ = event_tx.send(RunEvent::RunStarted {
        run_id: run.id.clone(),
        at: Utc::now(),
    });

    let _ = run.transition(RunState::Running);
    deps.store.save_run(&run).await?;
    emit_status(&event_tx, RunState::Running, None);

    let membership = branch_membership(&workflow);
    let mut outputs: HashMap<String, JsonValue> = HashMap::new();
    let mut selected_branches: HashMap<String, bool> = HashMap::new();
    let mut cancel_requested = false;
    let mut run_failed = false;

    'drive: loop {
        apply_queued_controls(&mut control_rx, &mut run, &mut cancel_requested, &deps, &event_tx).await?;
        if cancel_requested {
            break 'drive;
        }
        if run.state == RunState::Paused {
            wait_for_resume(&mut control_rx, &mut run, &mut cancel_requested, &deps, &event_tx).await?;
            if cancel_requested {
                break 'drive;
            }
        }

        skip_unreachable_steps(&workflow, &membership, &selected_branches, &mut run, &deps, &event_tx).await?;

        let eligible: Vec<Step> = workflow
            .steps
            .iter()
            .filter(|step| is_eligible(step, &run, &membership, &selected_branches))
            .cloned()
            .collect();

        if eligible.is_empty() {
            // Anything still waiting at this point is unreachable.
            skip_remaining_waiting(&mut run, &deps, &event_tx).await?;
            break 'drive;
        }

        for wave in eligible.chunks(config.max_concurrency.max(1)) {
            apply_queued_controls(&mut control_rx, &mut run, &mut cancel_requested, &deps, &event_tx).await?;
            if cancel_requested {
                break 'drive;
            }
            if run.state == RunState::Paused {
                wait_for_resume(&mut control_rx, &mut run, &mut cancel_requested, &deps, &event_tx).await?;
                if cancel_requested {
                    break 'drive;
                }
                // Eligibility may have changed while paused.
                continue 'drive;
            }

            let operations = lookup_operations(wave, &deps.registry)?;

            for step in wave {
                if let Some(execution) = run.step_execution_mut(&step.id) {
                    execution.state = StepExecState::Running;
                    execution.started_at = Some(Utc::now());
                }
                let _ = event_tx.send(RunEvent::StepStarted {
                    step_id: step.id.clone(),
                    at: Utc::now(),
                });
            }
            deps.store.save_run(&run).await?;

            let step_futures = wave.iter().map(|step| {
                execute_step(
                    step.clone(),
                    operations.get(&step.id).cloned(),
                    trigger_payload.clone(),
                    outputs.clone(),
                    deps.clone(),
                    config.clone(),
                )
            });
            let outcomes = join_all(step_futures).await;

            for outcome in outcomes {
                if outcome.state == StepExecState::Succeeded {
                    outputs.insert(outcome.step_id.clone(), outcome.output.clone());
                    if let Some(step) = workflow.step(&outcome.step_id)
                        && step.is_condition()
                    {
                        let selected = outcome.output.get("result").and_then(JsonValue::as_bool).unwrap_or(false);
                        selected_branches.insert(outcome.step_id.clone(), selected);
                    }
                } else if outcome.state == StepExecState::Failed {
                    run_failed = true;
                }

                if let Some(execution) = run.step_execution_mut(&outcome.step_id) {
                    execution.state = outcome.state;
                    execution.attempt = outcome.attempts;
                    execution.input_snapshot = outcome.input_snapshot.clone();
                    execution.output_snapshot = outcome.output.clone();
                    execution.error = outcome.error.clone();
                    execution.finished_at = Some(Utc::now());
                }
                let _ = event_tx.send(RunEvent::StepFinished {
                    step_id: outcome.step_id.clone(),
                    state: outcome.state,
                    attempts: outcome.attempts,
                    output: outcome.output,
                    error: outcome.error,
                });
            }
            deps.store.save_run(&run).await?;

            if run_failed {
                break 'drive;
            }
        }
    }

    finish_run(&mut run, cancel_requested, run_failed, &deps, &event_tx).await?;
    Ok(run)
}

fn is_eligible(
    step: &Step,
    run: &ExecutionRun,
    membership: &HashMap<String, Vec<BranchConstraint>>,
    selected_branches: &HashMap<String, bool>,
) -> bool {
    let waiting = run
        .step_execution(&step.id)
        .map(|execution| execution.state == StepExecState::Waiting)
        .unwrap_or(false);
    if !waiting {
        return false;
    }

    let dependencies_met = step.depends_on.iter().all(|dependency| {
        run.step_execution(dependency)
            .map(|execution| execution.state == StepExecState::Succeeded)
            .unwrap_or(false)
    });
    if !dependencies_met {
        return false;
    }

    membership
        .get(&step.id)
        .map(|constraints| {
            constraints
                .iter()
                .all(|(condition_id, selected)| selected_branches.get(condition_id) == Some(selected))
        })
        .unwrap_or(true)
}

/// Marks steps on unselected branches (and anything downstream of a skipped
/// step) as skipped, to a fixpoint.
async fn skip_unreachable_steps(
    workflow: &Workflow,
    membership: &HashMap<String, Vec<BranchConstraint>>,
    selected_branches: &HashMap<String, bool>,
    run: &mut ExecutionRun,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    let mut skipped_any = false;
    loop {
        let to_skip: Vec<String> = workflow
            .steps
            .iter()
            .filter(|step| {
                let waiting = run
                    .step_execution(&step.id)
                    .map(|execution| execution.state == StepExecState::Waiting)
                    .unwrap_or(false);
                if !waiting {
                    return false;
                }
                let branch_rejected = membership
                    .get(&step.id)
                    .map(|constraints| {
                        constraints
                            .iter()
                            .any(|(condition_id, selected)| selected_branches.get(condition_id) == Some(&!selected))
                    })
                    .unwrap_or(false);
                let upstream_skipped = step.depends_on.iter().any(|dependency| {
                    run.step_execution(dependency)
                        .map(|execution| execution.state == StepExecState::Skipped)
                        .unwrap_or(false)
                });
                branch_rejected || upstream_skipped
            })
            .map(|step| step.id.clone())
            .collect();

        if to_skip.is_empty() {
            break;
        }
        skipped_any = true;
        for step_id in to_skip {
            mark_skipped(run, &step_id, event_tx);
        }
    }

    if skipped_any {
        deps.store.save_run(run).await?;
    }
    Ok(())
}

async fn skip_remaining_waiting(
    run: &mut ExecutionRun,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    let waiting_ids: Vec<String> = run
        .step_executions
        .iter()
        .filter(|execution| !execution.state.is_terminal())
        .map(|execution| execution.step_id.clone())
        .collect();
    if waiting_ids.is_empty() {
        return Ok(());
    }
    for step_id in waiting_ids {
        mark_skipped(run, &step_id, event_tx);
    }
    deps.store.save_run(run).await?;
    Ok(())
}

fn mark_skipped(run: &mut ExecutionRun, step_id: &str, event_tx: &UnboundedSender<RunEvent>) {
    if let Some(execution) = run.step_execution_mut(step_id) {
        execution.state = StepExecState::Skipped;
        execution.finished_at = Some(Utc::now());
    }
    let _ = event_tx.send(RunEvent::StepFinished {
        step_id: step_id.to_string(),
        state: StepExecState::Skipped,
        attempts: 0,
        output: JsonValue::Null,
        error: None,
    });
}

async fn finish_run(
    run: &mut ExecutionRun,
    cancel_requested: bool,
    run_failed: bool,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    if cancel_requested {
        skip_remaining_waiting(run, deps, event_tx).await?;
    }
    let terminal_state = if cancel_requested {
        RunState::Cancelled
    } else if run_failed {
        skip_remaining_waiting(run, deps, event_tx).await?;
        RunState::Failed
    } else {
        RunState::Completed
    };
    let _ = run.transition(terminal_state);
    deps.store.save_run(run).await?;
    emit_status(event_tx, terminal_state, None);
    let _ = event_tx.send(RunEvent::RunCompleted {
        state: terminal_state,
        finished_at: Utc::now(),
    });
    debug!(run_id = %run.id, state = ?terminal_state, "run finished");
    Ok(())
}

async fn apply_queued_controls(
    control_rx: &mut UnboundedReceiver<RunControl>,
    run: &mut ExecutionRun,
    cancel_requested: &mut bool,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    loop {
        match control_rx.try_recv() {
            Ok(command) => apply_control(command, run, cancel_requested, deps, event_tx).await?,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    Ok(())
}

async fn wait_for_resume(
    control_rx: &mut UnboundedReceiver<RunControl>,
    run: &mut ExecutionRun,
    cancel_requested: &mut bool,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    while run.state == RunState::Paused && !*cancel_requested {
        match control_rx.recv().await {
            Some(command) => apply_control(command, run, cancel_requested, deps, event_tx).await?,
            None => {
                // Controller went away while paused; nothing can ever resume
                // this run, so cancel it.
                *cancel_requested = true;
            }
        }
    }
    Ok(())
}

async fn apply_control(
    command: RunControl,
    run: &mut ExecutionRun,
    cancel_requested: &mut bool,
    deps: &EngineDeps,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<(), ExecutionError> {
    match command {
        RunControl::Pause => {
            if run.state == RunState::Running {
                let _ = run.transition(RunState::Paused);
                deps.store.save_run(run).await?;
                emit_status(event_tx, RunState::Paused, None);
            }
        }
        RunControl::Resume => {
            if run.state == RunState::Paused {
                let _ = run.transition(RunState::Running);
                deps.store.save_run(run).await?;
                emit_status(event_tx, RunState::Running, None);
            }
        }
        RunControl::Cancel => {
            if !*cancel_requested {
                *cancel_requested = true;
                emit_status(event_tx, run.state, Some("cancelling; in-flight steps will finish".to_string()));
            }
        }
    }
    Ok(())
}

fn emit_status(event_tx: &UnboundedSender<RunEvent>, state: RunState, message: Option<String>) {
    let _ = event_tx.send(RunEvent::RunStatusChanged { state, message });
}

fn lookup_operations(wave: &[Step], registry: &SharedRegistry) -> Result<HashMap<String, Operation>, ExecutionError> {
    let guard = registry.read().map_err(|error| ExecutionError::RegistryUnavailable {
        message: error.to_string(),
    })?;
    let mut operations = HashMap::new();
    for step in wave {
        if let Some(qualified_name) = &step.qualified_operation
            && let Ok(operation) = guard.lookup(qualified_name)
        {
            operations.insert(step.id.clone(), operation.clone());
        }
    }
    Ok(operations)
}

async fn execute_step(
    step: Step,
    operation: Option<Operation>,
    trigger_payload: JsonValue,
    outputs: HashMap<String, JsonValue>,
    deps: EngineDeps,
    config: EngineConfig,
) -> StepOutcome {
    let purpose = format!("step '{}' invocation", step.id);
    let resolved = match resolve_arguments(&step, &outputs, deps.secrets.as_ref(), &purpose).await {
        Ok(resolved) => resolved,
        Err(message) => {
            return StepOutcome {
                step_id: step.id,
                state: StepExecState::Failed,
                attempts: 0,
                input_snapshot: JsonValue::Null,
                output: JsonValue::Null,
                error: Some(message),
            };
        }
    };
    let input_snapshot = JsonValue::Object(resolved.snapshot.clone());

    match step.kind {
        StepKind::Trigger => StepOutcome {
            step_id: step.id,
            state: StepExecState::Succeeded,
            attempts: 1,
            input_snapshot,
            output: trigger_payload,
            error: None,
        },
        StepKind::Condition => {
            let left = resolved.invocation.get("left").cloned().unwrap_or(JsonValue::Null);
            let right = resolved.invocation.get("right").cloned().unwrap_or(JsonValue::Null);
            let comparator = resolved
                .invocation
                .get("op")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            match evaluate_comparison(&left, &comparator, &right) {
                Ok(result) => StepOutcome {
                    step_id: step.id,
                    state: StepExecState::Succeeded,
                    attempts: 1,
                    input_snapshot,
                    output: json!({ "result": result }),
                    error: None,
                },
                Err(message) => StepOutcome {
                    step_id: step.id,
                    state: StepExecState::Failed,
                    attempts: 1,
                    input_snapshot,
                    output: JsonValue::Null,
                    error: Some(message),
                },
            }
        }
        StepKind::Transform | StepKind::ParallelGroup => StepOutcome {
            step_id: step.id,
            state: StepExecState::Succeeded,
            attempts: 1,
            input_snapshot,
            output: JsonValue::Object(resolved.invocation),
            error: None,
        },
        StepKind::ApiCall => {
            let Some(operation) = operation else {
                return StepOutcome {
                    step_id: step.id.clone(),
                    state: StepExecState::Failed,
                    attempts: 0,
                    input_snapshot,
                    output: JsonValue::Null,
                    error: Some(format!(
                        "operation '{}' is no longer registered",
                        step.qualified_operation.as_deref().unwrap_or("<none>")
                    )),
                };
            };
            invoke_with_retry(step, operation, input_snapshot, resolved.invocation, deps, config).await
        }
    }
}

async fn invoke_with_retry(
    step: Step,
    operation: Operation,
    input_snapshot: JsonValue,
    arguments: serde_json::Map<String, JsonValue>,
    deps: EngineDeps,
    config: EngineConfig,
) -> StepOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match deps.rate_limiter.acquire(&operation.provider_id).await {
            Ok(()) => deps.invoker.invoke(&operation, &arguments).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(invocation) => {
                return StepOutcome {
                    step_id: step.id,
                    state: StepExecState::Succeeded,
                    attempts: attempt,
                    input_snapshot,
                    output: invocation.body,
                    error: None,
                };
            }
            Err(error) if error.is_transient() && attempt < config.max_attempts => {
                let delay = retry_delay(attempt, config.base_delay, config.max_delay);
                warn!(
                    step_id = %step.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient step failure; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return StepOutcome {
                    step_id: step.id,
                    state: StepExecState::Failed,
                    attempts: attempt,
                    input_snapshot,
                    output: JsonValue::Null,
                    error: Some(redact_sensitive(&error.to_string())),
                };
            }
        }
    }
}
