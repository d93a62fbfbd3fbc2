// src/errors.rs

//! Crate-wide error type.
//!
//! Every variant produced while running a task carries the originating task
//! name, so the scheduler can surface "which task failed and why" as a single
//! value.

use thiserror::Error;

use crate::exec::CommandExit;

#[derive(Error, Debug)]
pub enum TaskdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("cyclic dependency detected at task {task} ({})", .cycle.join(" -> "))]
    CyclicDependency { task: String, cycle: Vec<String> },

    #[error("dependency {dependency} not found for task {task}")]
    DependencyNotFound { task: String, dependency: String },

    #[error("dependency {dependency} of task {task} finished with error")]
    DependencyFailed { task: String, dependency: String },

    #[error("task {task} has empty command")]
    EmptyCommand { task: String },

    #[error("start error for {task}: {source}")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task {task} failed: {exit}")]
    CommandFailed { task: String, exit: CommandExit },

    #[error("task {task} cancelled")]
    Cancelled { task: String },

    #[error("output error for {task}: {source}")]
    Output {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runner for task {task} aborted: {reason}")]
    RunnerAborted { task: String, reason: String },
}

impl TaskdagError {
    /// Name of the task this error originated from, if it is task-scoped.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            TaskdagError::CyclicDependency { task, .. }
            | TaskdagError::DependencyNotFound { task, .. }
            | TaskdagError::DependencyFailed { task, .. }
            | TaskdagError::EmptyCommand { task }
            | TaskdagError::Spawn { task, .. }
            | TaskdagError::CommandFailed { task, .. }
            | TaskdagError::Cancelled { task }
            | TaskdagError::Output { task, .. }
            | TaskdagError::RunnerAborted { task, .. } => Some(task),
            TaskdagError::ConfigError(_)
            | TaskdagError::IoError(_)
            | TaskdagError::JsonError(_)
            | TaskdagError::TomlError(_) => None,
        }
    }

    /// True for errors caused by the run being cancelled rather than by
    /// the task itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskdagError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, TaskdagError>;
