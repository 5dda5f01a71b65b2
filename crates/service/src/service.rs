//! The automation service: generate, save, execute, control, observe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use skein_engine::{EngineConfig, EngineDeps, RunControl, RunEvent, drive_run};
use skein_graph::{BuildOutcome, WorkflowMeta, build_workflow, validate_workflow};
use skein_planner::Planner;
use skein_registry::SharedRegistry;
use skein_types::{ExecutionRun, RunState, StateTransitionError, Workflow, WorkflowStatus};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::workflow_store::WorkflowStore;

/// Handle to a launched run: its id and the event stream.
#[derive(Debug)]
pub struct RunHandle {
    /// Run identifier for later control and status calls.
    pub run_id: String,
    /// Lifecycle events, step by step.
    pub events: UnboundedReceiver<RunEvent>,
}

/// Composition root for the workflow pipeline.
pub struct AutomationService {
    registry: SharedRegistry,
    planner: Planner,
    workflow_store: Arc<dyn WorkflowStore>,
    engine_deps: EngineDeps,
    engine_config: EngineConfig,
    active_controls: Mutex<HashMap<String, UnboundedSender<RunControl>>>,
    id_counter: AtomicU64,
}

impl AutomationService {
    /// Wires the service from its collaborators.
    pub fn new(
        registry: SharedRegistry,
        planner: Planner,
        workflow_store: Arc<dyn WorkflowStore>,
        engine_deps: EngineDeps,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            planner,
            workflow_store,
            engine_deps,
            engine_config,
            active_controls: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(Utc::now().timestamp_millis().max(0) as u64),
        }
    }

    fn allocate_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.id_counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Turns a natural-language request into a workflow draft plus its
    /// validation report. The draft is not persisted; call [`Self::save`].
    pub async fn generate(&self, name: &str, request_text: &str) -> Result<BuildOutcome, ServiceError> {
        let candidates = self.planner.plan(request_text).await?;
        let registry = self.registry.read().map_err(|error| ServiceError::Internal(error.to_string()))?;
        let outcome = build_workflow(
            WorkflowMeta {
                id: self.allocate_id("wf"),
                name: name.to_string(),
                description: Some(request_text.trim().to_string()),
                owner_id: None,
            },
            &candidates,
            &registry,
        );
        info!(
            workflow_id = %outcome.workflow.id,
            steps = outcome.workflow.steps.len(),
            errors = outcome.report.errors.len(),
            "workflow draft generated"
        );
        Ok(outcome)
    }

    /// Persists a workflow after full re-validation.
    ///
    /// There is no partial-edit path: every save re-validates the whole
    /// graph, and blocking errors reject the save with the full report.
    pub async fn save(&self, mut workflow: Workflow) -> Result<Workflow, ServiceError> {
        let report = {
            let registry = self.registry.read().map_err(|error| ServiceError::Internal(error.to_string()))?;
            validate_workflow(&workflow, &registry)
        };
        if !report.is_valid() {
            return Err(ServiceError::Validation { report });
        }
        workflow.status = WorkflowStatus::Validated;
        workflow.version += 1;
        self.workflow_store.save(&workflow).await.map_err(ServiceError::WorkflowStore)?;
        debug!(workflow_id = %workflow.id, version = workflow.version, "workflow saved");
        Ok(workflow)
    }

    /// Soft-deletes a workflow; run history keeps resolving it.
    pub async fn archive(&self, workflow_id: &str) -> Result<Workflow, ServiceError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.status = WorkflowStatus::Archived;
        self.workflow_store.save(&workflow).await.map_err(ServiceError::WorkflowStore)?;
        Ok(workflow)
    }

    /// Creates and starts an execution run for a validated workflow.
    pub async fn execute(&self, workflow_id: &str, trigger_payload: JsonValue) -> Result<RunHandle, ServiceError> {
        let workflow = self.load_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Validated {
            return Err(ServiceError::NotExecutable {
                workflow_id: workflow_id.to_string(),
                status: format!("{:?}", workflow.status).to_lowercase(),
            });
        }

        let run_id = self.allocate_id("run");
        let (control_tx, control_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();

        {
            let mut controls = self.active_controls.lock().expect("controls lock");
            controls.insert(run_id.clone(), control_tx);
        }

        let deps = self.engine_deps.clone();
        let config = self.engine_config.clone();
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            if let Err(error) = drive_run(workflow, spawned_run_id.clone(), trigger_payload, deps, config, control_rx, event_tx).await {
                tracing::error!(run_id = %spawned_run_id, %error, "run driver aborted");
            }
        });

        info!(run_id = %run_id, workflow_id, "execution run started");
        Ok(RunHandle { run_id, events: event_rx })
    }

    /// Pauses a running workflow; in-flight steps finish.
    pub async fn pause(&self, run_id: &str) -> Result<RunState, ServiceError> {
        self.control(run_id, RunControl::Pause, RunState::Paused).await
    }

    /// Resumes a paused workflow.
    pub async fn resume(&self, run_id: &str) -> Result<RunState, ServiceError> {
        self.control(run_id, RunControl::Resume, RunState::Running).await
    }

    /// Cancels a run; unstarted steps are skipped.
    pub async fn cancel(&self, run_id: &str) -> Result<RunState, ServiceError> {
        self.control(run_id, RunControl::Cancel, RunState::Cancelled).await
    }

    /// Current state of a run, step executions included.
    pub async fn run_status(&self, run_id: &str) -> Result<ExecutionRun, ServiceError> {
        Ok(self.engine_deps.store.load_run(run_id).await?)
    }

    async fn control(&self, run_id: &str, command: RunControl, target: RunState) -> Result<RunState, ServiceError> {
        let run = self.engine_deps.store.load_run(run_id).await?;
        if !run.state.can_transition_to(target) {
            return Err(ServiceError::StateTransition(StateTransitionError {
                from: run.state,
                to: target,
            }));
        }

        let sender = {
            let controls = self.active_controls.lock().expect("controls lock");
            controls.get(run_id).cloned()
        };
        let Some(sender) = sender else {
            return Err(ServiceError::RunNotActive { run_id: run_id.to_string() });
        };
        sender.send(command).map_err(|_| ServiceError::RunNotActive {
            run_id: run_id.to_string(),
        })?;
        debug!(run_id, command = ?command, "run control accepted");
        Ok(target)
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow, ServiceError> {
        self.workflow_store
            .load(workflow_id)
            .await
            .map_err(ServiceError::WorkflowStore)?
            .ok_or_else(|| ServiceError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }
}
