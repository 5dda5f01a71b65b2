//! Execution engine: drives a validated workflow as a per-run state
//! machine with true concurrency inside parallel groups.
//!
//! The engine owns all mutation of [`skein_types::ExecutionRun`] records
//! for a run. Steps launch only when every dependency succeeded and their
//! branch was selected; transient provider failures retry with capped
//! backoff; `pause` stops launching while in-flight invocations finish;
//! `cancel` skips everything that has not started. Every `StepExecution`
//! transition is persisted through the [`RunStore`] before the next step
//! group is evaluated, so runs survive a process restart.

pub mod binding;
pub mod condition;
pub mod error;
pub mod events;
pub mod invoker;
pub mod run;
pub mod secrets;
pub mod store;
pub mod traits;

pub use error::ExecutionError;
pub use events::{RunControl, RunEvent};
pub use invoker::HttpProviderInvoker;
pub use run::{EngineConfig, EngineDeps, drive_run};
pub use secrets::{EnvSecretsResolver, KeyringSecretsResolver, SecretsBackend, resolver_from_env};
pub use store::{JsonRunStore, MemoryRunStore};
pub use traits::{Invocation, InvokeError, NoopRateLimiter, ProviderInvoker, RateLimiter, RunStore, SecretError, SecretsResolver, StoreError};
