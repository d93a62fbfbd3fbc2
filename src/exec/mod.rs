// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`scheduler`] runs a whole task file: validates it, spawns one runner
//!   per task and returns the first failure.
//! - [`task_runner`] is the per-task lifecycle.
//! - [`signal`] holds the write-once completion signal of every task.
//! - [`gate`] bounds how many commands run at the same time.
//! - [`sink`] serializes task output into one prefixed stream.
//! - [`backend`] provides the `CommandBackend` trait and the real
//!   `tokio::process` implementation, which tests can replace with a fake.

pub mod backend;
pub mod gate;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub(crate) mod task_runner;

pub use backend::{
    CommandBackend, CommandExit, ExitFuture, Invocation, OutputStream, ProcessBackend,
    SpawnedCommand,
};
pub use gate::AdmissionGate;
pub use scheduler::{DEFAULT_MAX_CONCURRENCY, Scheduler, run_tasks};
pub use signal::{Completion, CompletionGuard, CompletionRegistry, WaitError};
pub use sink::{PrefixingSink, TaskWriter};
