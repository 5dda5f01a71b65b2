//! Operator CLI over the skein pipeline.
//!
//! The dashboard UI is a separate concern; this binary covers catalog
//! management, draft generation, validation, and running a workflow
//! document from the shell.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use skein_engine::{
    EngineConfig, EngineDeps, HttpProviderInvoker, JsonRunStore, NoopRateLimiter, RunEvent, drive_run, resolver_from_env,
};
use skein_graph::validate_workflow;
use skein_planner::{HttpCompletionClient, Planner};
use skein_registry::{OperationDefinition, OperationRegistry, into_shared, persistence};
use skein_types::Workflow;
use tokio::sync::mpsc::unbounded_channel;

/// Environment variable naming the completion service endpoint.
const COMPLETIONS_URL_ENV: &str = "SKEIN_COMPLETIONS_URL";

#[derive(Parser)]
#[command(name = "skein", about = "Compile natural-language automations into executable workflows", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect and manage the operation catalog.
    Ops {
        #[command(subcommand)]
        command: OpsCommand,
    },
    /// Generate a workflow draft from a natural-language request.
    Generate {
        /// The request, in plain language.
        request: String,
        /// Name for the generated workflow.
        #[arg(long, default_value = "untitled")]
        name: String,
    },
    /// Validate a workflow document against the catalog.
    Validate {
        /// Workflow YAML document.
        file: PathBuf,
    },
    /// Execute a workflow document.
    Run {
        /// Workflow YAML document.
        file: PathBuf,
        /// Trigger payload as inline JSON.
        #[arg(long)]
        trigger: Option<String>,
        /// Upper bound on concurrently in-flight steps.
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,
        /// Provider base URL as `provider=url`; repeatable.
        #[arg(long = "provider-url")]
        provider_urls: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OpsCommand {
    /// Register provider operations from a JSON catalog file.
    Import {
        /// Catalog file: `[{"provider_id": ..., "operations": [...]}]`.
        file: PathBuf,
    },
    /// List registered operations.
    List {
        /// Restrict to one provider.
        #[arg(long)]
        provider: Option<String>,
    },
    /// Search operations by free text.
    Search {
        /// Query terms.
        query: String,
    },
}

#[derive(Deserialize)]
struct ProviderCatalog {
    provider_id: String,
    operations: Vec<OperationDefinition>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Ops { command } => run_ops(command).await,
        Command::Generate { request, name } => run_generate(&name, &request).await,
        Command::Validate { file } => run_validate(&file),
        Command::Run {
            file,
            trigger,
            max_concurrency,
            provider_urls,
        } => run_workflow(&file, trigger.as_deref(), max_concurrency, &provider_urls).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_registry() -> Result<OperationRegistry> {
    let path = persistence::snapshot_path()?;
    if path.exists() {
        Ok(OperationRegistry::load_snapshot(&path)?)
    } else {
        Ok(OperationRegistry::default())
    }
}

async fn run_ops(command: OpsCommand) -> Result<()> {
    match command {
        OpsCommand::Import { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let catalogs: Vec<ProviderCatalog> = serde_json::from_str(&text).context("parsing provider catalog")?;

            let mut registry = load_registry()?;
            for catalog in catalogs {
                registry
                    .register(&catalog.provider_id, catalog.operations)
                    .with_context(|| format!("registering provider '{}'", catalog.provider_id))?;
            }
            let path = persistence::snapshot_path()?;
            registry.save_snapshot(&path)?;
            println!("catalog saved: {} operations at {}", registry.len(), path.display());
        }
        OpsCommand::List { provider } => {
            let registry = load_registry()?;
            let operations: Vec<_> = match &provider {
                Some(provider_id) => registry.list_by_provider(provider_id),
                None => registry.operations().collect(),
            };
            for operation in operations {
                println!("{}\t{}", operation.qualified_name, operation.summary);
            }
        }
        OpsCommand::Search { query } => {
            let registry = load_registry()?;
            for hit in registry.search(&query, 20) {
                println!("{}\t(score {})", hit.qualified_name, hit.score);
            }
        }
    }
    Ok(())
}

async fn run_generate(name: &str, request: &str) -> Result<()> {
    let endpoint = std::env::var(COMPLETIONS_URL_ENV).with_context(|| format!("{COMPLETIONS_URL_ENV} is not set"))?;
    let registry = into_shared(load_registry()?);
    let completion_client = Arc::new(HttpCompletionClient::new(endpoint)?);
    let planner = Planner::new(completion_client, registry.clone());

    let candidates = planner.plan(request).await?;
    let guard = registry.read().map_err(|error| anyhow::anyhow!("registry lock poisoned: {error}"))?;
    let outcome = skein_graph::build_workflow(
        skein_graph::WorkflowMeta {
            id: format!("wf-{}", name.replace(' ', "-")),
            name: name.to_string(),
            description: Some(request.to_string()),
            owner_id: None,
        },
        &candidates,
        &guard,
    );

    print!("{}", serde_yaml::to_string(&outcome.workflow)?);
    print_report(&outcome.report);
    if !outcome.report.is_valid() {
        bail!("the draft has blocking validation errors");
    }
    Ok(())
}

fn run_validate(file: &PathBuf) -> Result<()> {
    let workflow = load_workflow(file)?;
    let registry = load_registry()?;
    let report = validate_workflow(&workflow, &registry);
    print_report(&report);
    if !report.is_valid() {
        bail!("validation failed");
    }
    println!("workflow '{}' is valid", workflow.id);
    Ok(())
}

async fn run_workflow(file: &PathBuf, trigger: Option<&str>, max_concurrency: usize, provider_urls: &[String]) -> Result<()> {
    let workflow = load_workflow(file)?;
    let registry = into_shared(load_registry()?);

    {
        let guard = registry.read().map_err(|error| anyhow::anyhow!("registry lock poisoned: {error}"))?;
        let report = validate_workflow(&workflow, &guard);
        if !report.is_valid() {
            print_report(&report);
            bail!("refusing to run an invalid workflow");
        }
    }

    let mut invoker = HttpProviderInvoker::new()?;
    for mapping in provider_urls {
        let (provider_id, base_url) = mapping
            .split_once('=')
            .with_context(|| format!("expected provider=url, got '{mapping}'"))?;
        invoker = invoker.with_provider(provider_id, base_url)?;
    }

    let trigger_payload = match trigger {
        Some(text) => serde_json::from_str(text).context("parsing --trigger JSON")?,
        None => serde_json::Value::Null,
    };

    let store = JsonRunStore::from_env().context("no run store location available")?;
    let deps = EngineDeps {
        invoker: Arc::new(invoker),
        secrets: resolver_from_env(),
        rate_limiter: Arc::new(NoopRateLimiter),
        store: Arc::new(store),
        registry,
    };
    let config = EngineConfig {
        max_concurrency,
        ..EngineConfig::default()
    };

    let (_control_tx, control_rx) = unbounded_channel();
    let (event_tx, mut event_rx) = unbounded_channel();
    let run_id = format!("run-{}", unix_timestamp_millis());
    let driver = tokio::spawn(drive_run(workflow, run_id, trigger_payload, deps, config, control_rx, event_tx));

    while let Some(event) = event_rx.recv().await {
        match event {
            RunEvent::StepStarted { step_id, .. } => println!("▶ {step_id}"),
            RunEvent::StepFinished {
                step_id, state, attempts, ..
            } => println!("  {step_id}: {state:?} (attempts: {attempts})"),
            RunEvent::RunStatusChanged { state, message } => match message {
                Some(message) => println!("status: {state:?} ({message})"),
                None => println!("status: {state:?}"),
            },
            RunEvent::RunCompleted { state, .. } => {
                println!("run finished: {state:?}");
            }
            RunEvent::RunStarted { run_id, .. } => println!("run {run_id} started"),
        }
    }

    let run = driver.await.context("driver task panicked")??;
    if run.state != skein_types::RunState::Completed {
        bail!("run ended in state {:?}", run.state);
    }
    Ok(())
}

fn unix_timestamp_millis() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis()).unwrap_or_default()
}

fn load_workflow(file: &PathBuf) -> Result<Workflow> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_yaml::from_str(&text).context("parsing workflow document")
}

fn print_report(report: &skein_types::ValidationReport) {
    for issue in &report.errors {
        eprintln!("error: {issue}");
    }
    for issue in &report.warnings {
        eprintln!("warning: {issue}");
    }
}
