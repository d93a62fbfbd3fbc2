// src/exec/backend.rs

//! Pluggable process backend.
//!
//! Task runners talk to a `CommandBackend` instead of `tokio::process`
//! directly. Production uses [`ProcessBackend`]; tests can provide their own
//! implementation that hands back canned output without spawning anything.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::debug;

use crate::config::model::{TaskConfig, TaskName};
use crate::errors::{Result, TaskdagError};

/// Boxed output stream of a spawned command.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Resolves once the command has exited.
///
/// Dropping this future before it resolves must stop the command.
pub type ExitFuture = Pin<Box<dyn Future<Output = io::Result<CommandExit>> + Send>>;

/// How a command terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExit {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl CommandExit {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for CommandExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for CommandExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// A fully resolved command ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task: TaskName,
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the current one.
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Split a task's command line on whitespace into program and arguments.
    ///
    /// No shell quoting is interpreted. An empty or all-whitespace command
    /// line is an error.
    pub fn from_task(name: &str, task: &TaskConfig) -> Result<Self> {
        let mut parts = task.cmd.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| TaskdagError::EmptyCommand {
            task: name.to_string(),
        })?;

        Ok(Self {
            task: name.to_string(),
            program,
            args: parts.collect(),
            cwd: task.working_dir().map(|p| p.to_path_buf()),
        })
    }
}

/// Handles to a command that has been started.
pub struct SpawnedCommand {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub exit: ExitFuture,
}

/// Trait abstracting how commands are started.
pub trait CommandBackend: Send + Sync + 'static {
    /// Start `invocation`, returning its output streams and exit future.
    fn spawn(&self, invocation: &Invocation) -> io::Result<SpawnedCommand>;
}

/// Real backend: runs the program directly (no shell) with the inherited
/// environment and a null stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBackend;

impl CommandBackend for ProcessBackend {
    fn spawn(&self, invocation: &Invocation) -> io::Result<SpawnedCommand> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        debug!(task = %invocation.task, pid = ?child.id(), "spawned process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;

        // `child` moves into the future; dropping the future kills it.
        let exit: ExitFuture = Box::pin(async move {
            let status = child.wait().await?;
            Ok(CommandExit::from(status))
        });

        Ok(SpawnedCommand {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
        })
    }
}
