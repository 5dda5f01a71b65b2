//! Workflow definition persistence.
//!
//! Definitions are YAML documents on disk (or in memory for tests).
//! Archiving is the only deletion path: records are soft-deleted so run
//! history keeps resolving.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use skein_types::Workflow;
use tracing::debug;

/// Storage seam for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persists a workflow, replacing any previous version.
    async fn save(&self, workflow: &Workflow) -> Result<(), String>;
    /// Loads a workflow by id.
    async fn load(&self, workflow_id: &str) -> Result<Option<Workflow>, String>;
    /// Lists all stored workflow ids.
    async fn list(&self) -> Result<Vec<String>, String>;
}

/// In-memory workflow store.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: Mutex<HashMap<String, Workflow>>,
}

impl MemoryWorkflowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<(), String> {
        let mut workflows = self.workflows.lock().map_err(|error| error.to_string())?;
        workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<Workflow>, String> {
        let workflows = self.workflows.lock().map_err(|error| error.to_string())?;
        Ok(workflows.get(workflow_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, String> {
        let workflows = self.workflows.lock().map_err(|error| error.to_string())?;
        let mut workflow_ids: Vec<String> = workflows.keys().cloned().collect();
        workflow_ids.sort();
        Ok(workflow_ids)
    }
}

/// YAML-file-backed workflow store, one document per workflow.
#[derive(Debug, Clone)]
pub struct YamlWorkflowStore {
    directory: PathBuf,
}

impl YamlWorkflowStore {
    /// Creates a store rooted at the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    fn workflow_path(&self, workflow_id: &str) -> PathBuf {
        self.directory.join(format!("{workflow_id}.yaml"))
    }
}

#[async_trait]
impl WorkflowStore for YamlWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<(), String> {
        fs::create_dir_all(&self.directory).map_err(|error| error.to_string())?;
        let encoded = serde_yaml::to_string(workflow).map_err(|error| error.to_string())?;
        let path = self.workflow_path(&workflow.id);
        fs::write(&path, encoded).map_err(|error| error.to_string())?;
        debug!(workflow_id = %workflow.id, path = %path.display(), "workflow persisted");
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<Workflow>, String> {
        let path = self.workflow_path(workflow_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|error| error.to_string())?;
        let workflow = serde_yaml::from_str(&text).map_err(|error| error.to_string())?;
        Ok(Some(workflow))
    }

    async fn list(&self) -> Result<Vec<String>, String> {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return Ok(Vec::new());
        };
        let mut workflow_ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|extension| extension.to_str()) == Some("yaml") {
                    path.file_stem().and_then(|stem| stem.to_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect();
        workflow_ids.sort();
        Ok(workflow_ids)
    }
}
