//! Run store implementations.
//!
//! [`MemoryRunStore`] backs tests and embedded use; [`JsonRunStore`] keeps
//! one JSON document per run under a directory resolved from
//! `SKEIN_RUNS_PATH` or the platform config dir. Both give read-your-writes
//! consistency for the owning run.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use dirs_next::config_dir;
use skein_types::ExecutionRun;
use tracing::debug;

use crate::traits::{RunStore, StoreError};

/// Environment variable overriding the run directory.
pub const RUNS_PATH_ENV: &str = "SKEIN_RUNS_PATH";

/// In-memory run store.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, ExecutionRun>>,
}

impl MemoryRunStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &ExecutionRun) -> Result<(), StoreError> {
        self.save_run(run).await
    }

    async fn save_run(&self, run: &ExecutionRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().expect("run store lock");
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<ExecutionRun, StoreError> {
        let runs = self.runs.lock().expect("run store lock");
        runs.get(run_id).cloned().ok_or_else(|| StoreError::NotFound {
            run_id: run_id.to_string(),
        })
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<String>, StoreError> {
        let runs = self.runs.lock().expect("run store lock");
        let mut run_ids: Vec<String> = runs
            .values()
            .filter(|run| run.workflow_id == workflow_id)
            .map(|run| run.id.clone())
            .collect();
        run_ids.sort();
        Ok(run_ids)
    }
}

/// File-backed run store, one JSON document per run.
#[derive(Debug, Clone)]
pub struct JsonRunStore {
    directory: PathBuf,
}

impl JsonRunStore {
    /// Creates a store rooted at the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// Resolves the run directory from `SKEIN_RUNS_PATH` or the platform
    /// config dir.
    pub fn from_env() -> Option<Self> {
        if let Ok(configured) = env::var(RUNS_PATH_ENV) {
            let trimmed = configured.trim();
            if !trimmed.is_empty() {
                return Some(Self::new(trimmed));
            }
        }
        config_dir().map(|directory| Self::new(directory.join("skein").join("runs")))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.directory.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl RunStore for JsonRunStore {
    async fn create_run(&self, run: &ExecutionRun) -> Result<(), StoreError> {
        self.save_run(run).await
    }

    async fn save_run(&self, run: &ExecutionRun) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory)?;
        let path = self.run_path(&run.id);
        let encoded = serde_json::to_vec_pretty(run)?;
        // Write-then-rename keeps a crash from truncating the previous state.
        let staging_path = path.with_extension("json.tmp");
        fs::write(&staging_path, encoded)?;
        fs::rename(&staging_path, &path)?;
        debug!(run_id = %run.id, path = %path.display(), "run persisted");
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<ExecutionRun, StoreError> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<String>, StoreError> {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return Ok(Vec::new());
        };
        let mut run_ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            if let Ok(run) = serde_json::from_slice::<ExecutionRun>(&bytes)
                && run.workflow_id == workflow_id
            {
                run_ids.push(run.id);
            }
        }
        run_ids.sort();
        Ok(run_ids)
    }
}
