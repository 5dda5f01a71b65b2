//! Graph builder, validator, and conditional resolver.
//!
//! This crate is the sole authority on workflow structure. The planner's
//! untrusted candidates are re-derived here into the strongly typed
//! [`skein_types::Workflow`] model: stable ids, dependency and data-flow
//! derivation, branch expansion, topological ordering, and a full
//! validation report. Validation always runs over the whole graph; there is
//! no incremental path that could leave divergent state behind.

pub mod builder;
pub mod conditional;
pub mod schedule;
pub mod validate;

pub use builder::{BuildOutcome, WorkflowMeta, build_workflow};
pub use schedule::{ExecutionSchedule, compute_schedule, topo_levels};
pub use validate::validate_workflow;
