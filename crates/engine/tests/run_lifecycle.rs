//! End-to-end run lifecycle tests: waves, retries, branches, controls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, indexmap};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use skein_engine::{
    EngineConfig, EngineDeps, Invocation, InvokeError, MemoryRunStore, NoopRateLimiter, ProviderInvoker, RunControl, RunEvent,
    RunStore, SecretError, SecretsResolver, drive_run,
};
use skein_graph::{WorkflowMeta, build_workflow};
use skein_planner::{CandidateBranch, CandidateStep};
use skein_registry::{OperationDefinition, OperationRegistry, SharedRegistry, into_shared};
use skein_types::{FieldKind, HttpBinding, OperationSchema, RunState, StepExecState, Workflow};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, Vec<Result<Invocation, InvokeError>>>>,
    calls: Mutex<Vec<(String, JsonMap<String, JsonValue>)>>,
    delay: Duration,
}

impl ScriptedInvoker {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn script(self, qualified_name: &str, responses: Vec<Result<Invocation, InvokeError>>) -> Self {
        self.scripts.lock().expect("scripts lock").insert(qualified_name.to_string(), responses);
        self
    }

    fn calls(&self) -> Vec<(String, JsonMap<String, JsonValue>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ProviderInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        operation: &skein_types::Operation,
        arguments: &JsonMap<String, JsonValue>,
    ) -> Result<Invocation, InvokeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push((operation.qualified_name.clone(), arguments.clone()));

        let mut scripts = self.scripts.lock().expect("scripts lock");
        if let Some(responses) = scripts.get_mut(&operation.qualified_name)
            && !responses.is_empty()
        {
            return responses.remove(0);
        }
        Ok(Invocation {
            status: 200,
            body: json!({ "ok": true }),
        })
    }
}

struct MapSecrets;

#[async_trait]
impl SecretsResolver for MapSecrets {
    async fn resolve(&self, secret_ref: &str, _purpose: &str) -> Result<String, SecretError> {
        match secret_ref {
            "CHAT_TOKEN" => Ok("xoxb-resolved".to_string()),
            other => Err(SecretError {
                name: other.to_string(),
                message: "unknown secret".to_string(),
            }),
        }
    }
}

fn seeded_registry() -> SharedRegistry {
    let mut registry = OperationRegistry::default();
    registry
        .register(
            "tracker",
            vec![OperationDefinition {
                name: "issue_created".into(),
                summary: "Fires when a new issue is created".into(),
                input_schema: OperationSchema::default(),
                output_schema: OperationSchema::default()
                    .with_field("title", FieldKind::String, false)
                    .with_field("amount", FieldKind::Number, false),
                http: None,
            }],
        )
        .expect("register tracker");
    registry
        .register(
            "chat",
            vec![OperationDefinition {
                name: "post_message".into(),
                summary: "Post a message to a channel".into(),
                input_schema: OperationSchema::default()
                    .with_field("channel", FieldKind::String, true)
                    .with_field("message", FieldKind::String, true),
                output_schema: OperationSchema::default().with_field("ts", FieldKind::String, false),
                http: Some(HttpBinding {
                    method: "POST".into(),
                    path: "/chat.postMessage".into(),
                }),
            }],
        )
        .expect("register chat");
    registry
        .register(
            "boards",
            vec![OperationDefinition {
                name: "create_card".into(),
                summary: "Create a tracking card".into(),
                input_schema: OperationSchema::default().with_field("title", FieldKind::String, true),
                output_schema: OperationSchema::default().with_field("card_id", FieldKind::String, false),
                http: Some(HttpBinding {
                    method: "POST".into(),
                    path: "/cards".into(),
                }),
            }],
        )
        .expect("register boards");
    registry
        .register(
            "approvals",
            vec![
                OperationDefinition {
                    name: "threshold_check".into(),
                    summary: "Compare a value against a threshold".into(),
                    input_schema: OperationSchema::default(),
                    output_schema: OperationSchema::default().with_field("result", FieldKind::Boolean, false),
                    http: None,
                },
                OperationDefinition {
                    name: "request_manager".into(),
                    summary: "Send to manager approval".into(),
                    input_schema: OperationSchema::default().with_field("amount", FieldKind::Number, true),
                    output_schema: OperationSchema::default(),
                    http: Some(HttpBinding {
                        method: "POST".into(),
                        path: "/approvals".into(),
                    }),
                },
                OperationDefinition {
                    name: "auto_approve".into(),
                    summary: "Approve automatically".into(),
                    input_schema: OperationSchema::default(),
                    output_schema: OperationSchema::default(),
                    http: Some(HttpBinding {
                        method: "POST".into(),
                        path: "/approvals/auto".into(),
                    }),
                },
            ],
        )
        .expect("register approvals");
    into_shared(registry)
}

fn fanout_workflow(registry: &SharedRegistry) -> Workflow {
    let candidates = vec![
        CandidateStep {
            reference: "on_issue".into(),
            operation: "tracker_issue_created".into(),
            parameters: IndexMap::new(),
            depends_on: vec![],
            branch: None,
        },
        CandidateStep {
            reference: "notify".into(),
            operation: "chat_post_message".into(),
            parameters: indexmap! {
                "channel".to_string() => json!("#eng"),
                "message".to_string() => json!("new issue: ${{ steps.on_issue.title }}"),
            },
            depends_on: vec!["on_issue".into()],
            branch: None,
        },
        CandidateStep {
            reference: "card".into(),
            operation: "boards_create_card".into(),
            parameters: indexmap! {
                "title".to_string() => json!("${{ steps.on_issue.title }}"),
            },
            depends_on: vec!["on_issue".into()],
            branch: None,
        },
    ];
    let guard = registry.read().expect("registry lock");
    let outcome = build_workflow(
        WorkflowMeta {
            id: "wf-fanout".into(),
            name: "notify on issue".into(),
            description: None,
            owner_id: None,
        },
        &candidates,
        &guard,
    );
    assert!(outcome.report.is_valid(), "fixture must validate: {:?}", outcome.report.errors);
    outcome.workflow
}

fn approval_workflow(registry: &SharedRegistry) -> Workflow {
    let candidates = vec![
        CandidateStep {
            reference: "on_expense".into(),
            operation: "tracker_issue_created".into(),
            parameters: IndexMap::new(),
            depends_on: vec![],
            branch: None,
        },
        CandidateStep {
            reference: "check".into(),
            operation: "approvals_threshold_check".into(),
            parameters: indexmap! {
                "left".to_string() => json!("${{ steps.on_expense.amount }}"),
                "op".to_string() => json!("gt"),
                "right".to_string() => json!(1000),
            },
            depends_on: vec!["on_expense".into()],
            branch: Some(CandidateBranch {
                then_refs: vec!["manager".into()],
                else_refs: vec!["auto".into()],
            }),
        },
        CandidateStep {
            reference: "manager".into(),
            operation: "approvals_request_manager".into(),
            parameters: indexmap! {
                "amount".to_string() => json!("${{ steps.on_expense.amount }}"),
            },
            depends_on: vec![],
            branch: None,
        },
        CandidateStep {
            reference: "auto".into(),
            operation: "approvals_auto_approve".into(),
            parameters: IndexMap::new(),
            depends_on: vec![],
            branch: None,
        },
    ];
    let guard = registry.read().expect("registry lock");
    let outcome = build_workflow(
        WorkflowMeta {
            id: "wf-approval".into(),
            name: "expense approval".into(),
            description: None,
            owner_id: None,
        },
        &candidates,
        &guard,
    );
    assert!(outcome.report.is_valid(), "fixture must validate: {:?}", outcome.report.errors);
    outcome.workflow
}

fn deps_with(invoker: Arc<ScriptedInvoker>, registry: SharedRegistry, store: Arc<MemoryRunStore>) -> EngineDeps {
    EngineDeps {
        invoker,
        secrets: Arc::new(MapSecrets),
        rate_limiter: Arc::new(NoopRateLimiter),
        store,
        registry,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 4,
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

fn channels() -> (
    UnboundedSender<RunControl>,
    UnboundedReceiver<RunControl>,
    UnboundedSender<RunEvent>,
    UnboundedReceiver<RunEvent>,
) {
    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();
    (control_tx, control_rx, event_tx, event_rx)
}

async fn next_event(event_rx: &mut UnboundedReceiver<RunEvent>) -> RunEvent {
    tokio::time::timeout(EVENT_TIMEOUT, event_rx.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

async fn wait_for_step_started(event_rx: &mut UnboundedReceiver<RunEvent>, step_id: &str) {
    loop {
        if let RunEvent::StepStarted { step_id: started, .. } = next_event(event_rx).await
            && started == step_id
        {
            return;
        }
    }
}

async fn wait_for_state(event_rx: &mut UnboundedReceiver<RunEvent>, state: RunState) {
    loop {
        if let RunEvent::RunStatusChanged { state: changed, .. } = next_event(event_rx).await
            && changed == state
        {
            return;
        }
    }
}

#[tokio::test]
async fn fan_out_runs_both_siblings_and_completes() {
    let registry = seeded_registry();
    let workflow = fanout_workflow(&registry);
    let invoker = Arc::new(ScriptedInvoker::new());
    let store = Arc::new(MemoryRunStore::new());
    let (_control_tx, control_rx, event_tx, _event_rx) = channels();

    let run = drive_run(
        workflow,
        "run-1".into(),
        json!({ "title": "login broken" }),
        deps_with(invoker.clone(), registry, store.clone()),
        fast_config(),
        control_rx,
        event_tx,
    )
    .await
    .expect("run drives to completion");

    assert_eq!(run.state, RunState::Completed);
    for execution in &run.step_executions {
        assert_eq!(execution.state, StepExecState::Succeeded, "step {} should succeed", execution.step_id);
        assert_eq!(execution.attempt, 1);
    }

    let calls = invoker.calls();
    assert_eq!(calls.len(), 2, "both fan-out siblings invoke their providers");
    let notify_call = calls.iter().find(|(name, _)| name == "chat_post_message").expect("chat call");
    assert_eq!(notify_call.1["message"], json!("new issue: login broken"));

    let persisted = store.load_run("run-1").await.expect("run persisted");
    assert_eq!(persisted.state, RunState::Completed);
}

#[tokio::test]
async fn transient_failures_retry_and_record_the_attempt_count() {
    let registry = seeded_registry();
    let workflow = fanout_workflow(&registry);
    let invoker = Arc::new(ScriptedInvoker::new().script(
        "chat_post_message",
        vec![
            Err(InvokeError::Status(500)),
            Err(InvokeError::Timeout),
            Ok(Invocation {
                status: 200,
                body: json!({ "ts": "123" }),
            }),
        ],
    ));
    let store = Arc::new(MemoryRunStore::new());
    let (_control_tx, control_rx, event_tx, _event_rx) = channels();

    let run = drive_run(
        workflow,
        "run-retry".into(),
        json!({ "title": "x" }),
        deps_with(invoker, registry, store),
        fast_config(),
        control_rx,
        event_tx,
    )
    .await
    .expect("run completes after retries");

    assert_eq!(run.state, RunState::Completed);
    let notify = run.step_execution("step-2").expect("notify execution");
    assert_eq!(notify.state, StepExecState::Succeeded);
    assert_eq!(notify.attempt, 3, "two transient failures then success");
}

#[tokio::test]
async fn exhausting_the_attempt_limit_fails_the_run_and_skips_downstream() {
    let registry = seeded_registry();
    // Chain: trigger -> chat -> boards, so the boards step has a failed
    // upstream.
    let candidates = vec![
        CandidateStep {
            reference: "on_issue".into(),
            operation: "tracker_issue_created".into(),
            parameters: IndexMap::new(),
            depends_on: vec![],
            branch: None,
        },
        CandidateStep {
            reference: "notify".into(),
            operation: "chat_post_message".into(),
            parameters: indexmap! {
                "channel".to_string() => json!("#eng"),
                "message".to_string() => json!("${{ steps.on_issue.title }}"),
            },
            depends_on: vec!["on_issue".into()],
            branch: None,
        },
        CandidateStep {
            reference: "card".into(),
            operation: "boards_create_card".into(),
            parameters: indexmap! {
                "title".to_string() => json!("${{ steps.on_issue.title }}"),
            },
            depends_on: vec!["notify".into()],
            branch: None,
        },
    ];
    let workflow = {
        let guard = registry.read().expect("registry lock");
        let outcome = build_workflow(
            WorkflowMeta {
                id: "wf-chain".into(),
                name: "chain".into(),
                description: None,
                owner_id: None,
            },
            &candidates,
            &guard,
        );
        assert!(outcome.report.is_valid(), "fixture must validate: {:?}", outcome.report.errors);
        outcome.workflow
    };

    let invoker = Arc::new(ScriptedInvoker::new().script(
        "chat_post_message",
        vec![
            Err(InvokeError::Status(500)),
            Err(InvokeError::Status(503)),
            Err(InvokeError::Timeout),
        ],
    ));
    let store = Arc::new(MemoryRunStore::new());
    let (_control_tx, control_rx, event_tx, _event_rx) = channels();

    let run = drive_run(
        workflow,
        "run-fail".into(),
        json!({ "title": "x" }),
        deps_with(invoker, registry, store),
        fast_config(),
        control_rx,
        event_tx,
    )
    .await
    .expect("run drives to a terminal state");

    assert_eq!(run.state, RunState::Failed);
    let notify = run.step_execution("step-2").expect("notify execution");
    assert_eq!(notify.state, StepExecState::Failed);
    assert_eq!(notify.attempt, 3);
    assert!(notify.error.as_deref().unwrap_or_default().contains("provider"));
    let card = run.step_execution("step-3").expect("card execution");
    assert_eq!(card.state, StepExecState::Skipped, "downstream of a failed step never starts");
}

#[tokio::test]
async fn condition_selects_exactly_one_branch() {
    let registry = seeded_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    let store = Arc::new(MemoryRunStore::new());
    let (_control_tx, control_rx, event_tx, _event_rx) = channels();

    let run = drive_run(
        approval_workflow(&registry),
        "run-approve-high".into(),
        json!({ "amount": 1500 }),
        deps_with(invoker.clone(), registry.clone(), store),
        fast_config(),
        control_rx,
        event_tx,
    )
    .await
    .expect("run completes");

    assert_eq!(run.state, RunState::Completed);
    let check = run.step_execution("step-2").expect("condition execution");
    assert_eq!(check.state, StepExecState::Succeeded);
    assert_eq!(check.output_snapshot, json!({ "result": true }));
    assert_eq!(
        run.step_execution("step-3").expect("manager execution").state,
        StepExecState::Succeeded
    );
    assert_eq!(
        run.step_execution("step-4").expect("auto execution").state,
        StepExecState::Skipped,
        "the unselected branch is skipped"
    );
    assert_eq!(invoker.calls().len(), 1, "only the selected branch invokes a provider");

    // The low-amount payload selects the other branch.
    let invoker_low = Arc::new(ScriptedInvoker::new());
    let store_low = Arc::new(MemoryRunStore::new());
    let (_control_tx2, control_rx2, event_tx2, _event_rx2) = channels();
    let run_low = drive_run(
        approval_workflow(&registry),
        "run-approve-low".into(),
        json!({ "amount": 250 }),
        deps_with(invoker_low.clone(), registry, store_low),
        fast_config(),
        control_rx2,
        event_tx2,
    )
    .await
    .expect("run completes");

    assert_eq!(run_low.state, RunState::Completed);
    assert_eq!(
        run_low.step_execution("step-3").expect("manager execution").state,
        StepExecState::Skipped
    );
    assert_eq!(
        run_low.step_execution("step-4").expect("auto execution").state,
        StepExecState::Succeeded
    );
}

#[tokio::test]
async fn pause_lets_in_flight_steps_finish_and_holds_the_rest() {
    let registry = seeded_registry();
    let workflow = fanout_workflow(&registry);
    let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(50)));
    let store = Arc::new(MemoryRunStore::new());
    let (control_tx, control_rx, event_tx, mut event_rx) = channels();

    let config = EngineConfig {
        max_concurrency: 1,
        ..fast_config()
    };
    let driver = tokio::spawn(drive_run(
        workflow,
        "run-pause".into(),
        json!({ "title": "x" }),
        deps_with(invoker, registry, store.clone()),
        config,
        control_rx,
        event_tx,
    ));

    // Pause while the first fan-out sibling is in flight.
    wait_for_step_started(&mut event_rx, "step-2").await;
    control_tx.send(RunControl::Pause).expect("send pause");
    wait_for_state(&mut event_rx, RunState::Paused).await;

    let paused = store.load_run("run-pause").await.expect("paused run persisted");
    assert_eq!(paused.state, RunState::Paused);
    assert_eq!(
        paused.step_execution("step-2").expect("in-flight sibling").state,
        StepExecState::Succeeded,
        "the in-flight step finishes"
    );
    assert_eq!(
        paused.step_execution("step-3").expect("held sibling").state,
        StepExecState::Waiting,
        "unstarted steps stay waiting while paused"
    );

    control_tx.send(RunControl::Resume).expect("send resume");
    let run = driver.await.expect("driver task").expect("run completes");
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.step_execution("step-3").expect("resumed sibling").state, StepExecState::Succeeded);
}

#[tokio::test]
async fn cancel_skips_everything_that_has_not_started() {
    let registry = seeded_registry();
    let workflow = fanout_workflow(&registry);
    let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(50)));
    let store = Arc::new(MemoryRunStore::new());
    let (control_tx, control_rx, event_tx, mut event_rx) = channels();

    let config = EngineConfig {
        max_concurrency: 1,
        ..fast_config()
    };
    let driver = tokio::spawn(drive_run(
        workflow,
        "run-cancel".into(),
        json!({ "title": "x" }),
        deps_with(invoker, registry, store.clone()),
        config,
        control_rx,
        event_tx,
    ));

    wait_for_step_started(&mut event_rx, "step-2").await;
    control_tx.send(RunControl::Cancel).expect("send cancel");

    let run = driver.await.expect("driver task").expect("run reaches a terminal state");
    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(
        run.step_execution("step-2").expect("in-flight sibling").state,
        StepExecState::Succeeded,
        "cancellation is cooperative; in-flight work finishes"
    );
    assert_eq!(
        run.step_execution("step-3").expect("unstarted sibling").state,
        StepExecState::Skipped
    );
}

#[tokio::test]
async fn secret_placeholders_resolve_for_invocation_but_never_persist() {
    let registry = seeded_registry();
    let candidates = vec![
        CandidateStep {
            reference: "on_issue".into(),
            operation: "tracker_issue_created".into(),
            parameters: IndexMap::new(),
            depends_on: vec![],
            branch: None,
        },
        CandidateStep {
            reference: "notify".into(),
            operation: "chat_post_message".into(),
            parameters: indexmap! {
                "channel".to_string() => json!("#eng"),
                "message".to_string() => json!("hello"),
                "authorization".to_string() => json!("Bearer ${secret:CHAT_TOKEN}"),
            },
            depends_on: vec!["on_issue".into()],
            branch: None,
        },
    ];
    let workflow = {
        let guard = registry.read().expect("registry lock");
        let outcome = build_workflow(
            WorkflowMeta {
                id: "wf-secret".into(),
                name: "secret".into(),
                description: None,
                owner_id: None,
            },
            &candidates,
            &guard,
        );
        assert!(outcome.report.is_valid(), "fixture must validate: {:?}", outcome.report.errors);
        outcome.workflow
    };

    let invoker = Arc::new(ScriptedInvoker::new());
    let store = Arc::new(MemoryRunStore::new());
    let (_control_tx, control_rx, event_tx, _event_rx) = channels();

    let run = drive_run(
        workflow,
        "run-secret".into(),
        json!({ "title": "x" }),
        deps_with(invoker.clone(), registry, store.clone()),
        fast_config(),
        control_rx,
        event_tx,
    )
    .await
    .expect("run completes");

    assert_eq!(run.state, RunState::Completed);
    let calls = invoker.calls();
    let chat_call = calls.iter().find(|(name, _)| name == "chat_post_message").expect("chat call");
    assert_eq!(chat_call.1["authorization"], json!("Bearer xoxb-resolved"));

    let persisted = store.load_run("run-secret").await.expect("run persisted");
    let notify = persisted.step_execution("step-2").expect("notify execution");
    assert_eq!(
        notify.input_snapshot["authorization"],
        json!("Bearer ${secret:CHAT_TOKEN}"),
        "persisted snapshots keep the placeholder"
    );
}
