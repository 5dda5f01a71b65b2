//! Service surface over the planner, graph builder, and engine.
//!
//! This crate wires the pipeline together and exposes the operations a UI
//! layer consumes: generate a draft from natural language, save it after
//! full re-validation, execute it as a run, control the run
//! (pause/resume/cancel), and observe its status. The UI itself is out of
//! scope; [`AutomationService`] is the whole exposed contract.

pub mod error;
pub mod service;
pub mod workflow_store;

pub use error::ServiceError;
pub use service::{AutomationService, RunHandle};
pub use workflow_store::{MemoryWorkflowStore, WorkflowStore, YamlWorkflowStore};
