// src/exec/task_runner.rs

//! Lifecycle of a single task within a batch.
//!
//! `started -> waiting on deps -> admitted -> running -> finished`. Whatever
//! happens, the runner emits exactly one terminal marker, releases its gate
//! permit, reports a failure to the scheduler and then fires its completion
//! signal, in that order.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::model::{TaskConfig, TaskName};
use crate::errors::{Result, TaskdagError};
use crate::exec::backend::{CommandBackend, Invocation};
use crate::exec::gate::AdmissionGate;
use crate::exec::scheduler::FirstError;
use crate::exec::signal::{Completion, CompletionGuard, CompletionRegistry, WaitError};
use crate::exec::sink::PrefixingSink;

/// How long output is still read after the command has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Everything a runner shares with its siblings.
pub(crate) struct RunnerContext<W, B> {
    pub sink: PrefixingSink<W>,
    pub signals: Arc<CompletionRegistry>,
    pub gate: AdmissionGate,
    pub backend: Arc<B>,
    pub cancel: CancellationToken,
    pub failures: Arc<FirstError>,
}

impl<W, B> Clone for RunnerContext<W, B> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            signals: Arc::clone(&self.signals),
            gate: self.gate.clone(),
            backend: Arc::clone(&self.backend),
            cancel: self.cancel.clone(),
            failures: Arc::clone(&self.failures),
        }
    }
}

/// Run one task to completion. Never returns an error: failures are handed
/// to the scheduler through `ctx.failures`.
pub(crate) async fn run_task<W, B>(
    ctx: RunnerContext<W, B>,
    name: TaskName,
    task: TaskConfig,
    mut done: CompletionGuard,
) where
    W: AsyncWrite + Unpin + Send,
    B: CommandBackend,
{
    let mut permit: Option<OwnedSemaphorePermit> = None;
    let mut result = drive(&ctx, &name, &task, &mut permit).await;

    let marker = match &result {
        Ok(()) => format!("---- {name} finished successfully ----"),
        Err(err) => format!("---- {name} finished with error ----\n {err}"),
    };
    if let Err(source) = ctx.sink.notice(&marker).await {
        warn!(task = %name, error = %source, "failed to write terminal marker");
        if result.is_ok() {
            result = Err(TaskdagError::Output {
                task: name.clone(),
                source,
            });
        }
    }

    drop(permit);

    match result {
        Ok(()) => {
            info!(task = %name, "task finished successfully");
            done.mark_succeeded();
        }
        Err(err) => {
            if err.is_cancellation() {
                debug!(task = %name, "task cancelled");
            } else {
                warn!(task = %name, error = %err, "task failed");
            }
            ctx.failures.record(err);
        }
    }

    drop(done);
}

async fn drive<W, B>(
    ctx: &RunnerContext<W, B>,
    name: &str,
    task: &TaskConfig,
    permit: &mut Option<OwnedSemaphorePermit>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
    B: CommandBackend,
{
    let output_err = |source: io::Error| TaskdagError::Output {
        task: name.to_string(),
        source,
    };
    let cancelled = || TaskdagError::Cancelled {
        task: name.to_string(),
    };

    ctx.sink
        .notice(&format!("---- {name} started ----"))
        .await
        .map_err(output_err)?;

    for dep in task.dependencies() {
        if !ctx.signals.contains(dep) {
            return Err(TaskdagError::DependencyNotFound {
                task: name.to_string(),
                dependency: dep.to_string(),
            });
        }

        ctx.sink
            .notice(&format!("---- {name} waiting for dependency: {dep} ----"))
            .await
            .map_err(output_err)?;
        debug!(task = %name, dep = %dep, "waiting for dependency");

        match ctx.signals.wait(dep, &ctx.cancel).await {
            Ok(Completion::Succeeded) => {}
            Ok(Completion::Failed) => {
                return Err(TaskdagError::DependencyFailed {
                    task: name.to_string(),
                    dependency: dep.to_string(),
                });
            }
            Err(WaitError::Cancelled) => return Err(cancelled()),
            Err(WaitError::Unknown) => {
                return Err(TaskdagError::DependencyNotFound {
                    task: name.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }
    }

    *permit = Some(ctx.gate.acquire(&ctx.cancel).await.ok_or_else(cancelled)?);
    debug!(task = %name, available = ctx.gate.available(), "admitted");

    let invocation = Invocation::from_task(name, task)?;
    info!(
        task = %name,
        program = %invocation.program,
        args = ?invocation.args,
        "starting task process"
    );

    let spawned = ctx
        .backend
        .spawn(&invocation)
        .map_err(|source| TaskdagError::Spawn {
            task: name.to_string(),
            source,
        })?;

    // A background process started by the command can inherit its pipes and
    // keep them open; stop reading shortly after the command itself is gone.
    let exited = CancellationToken::new();
    let detach = |exited: CancellationToken| async move {
        exited.cancelled().await;
        tokio::time::sleep(OUTPUT_DRAIN_GRACE).await;
    };
    let stdout = ctx
        .sink
        .view(name)
        .copy_until(spawned.stdout, detach(exited.clone()));
    let stderr = ctx
        .sink
        .view(name)
        .copy_until(spawned.stderr, detach(exited.clone()));
    let exit = spawned.exit;
    let wait = async {
        let status = tokio::select! {
            biased;
            // Dropping `exit` stops the child, which closes its pipes.
            _ = ctx.cancel.cancelled() => None,
            status = exit => Some(status),
        };
        exited.cancel();
        status
    };

    let (status, stdout_res, stderr_res) = tokio::join!(wait, stdout, stderr);

    let status = status
        .ok_or_else(cancelled)?
        .map_err(|source| TaskdagError::Spawn {
            task: name.to_string(),
            source,
        })?;

    info!(
        task = %name,
        exit_code = ?status.code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        return Err(TaskdagError::CommandFailed {
            task: name.to_string(),
            exit: status,
        });
    }

    stdout_res.map_err(output_err)?;
    stderr_res.map_err(output_err)?;

    Ok(())
}
