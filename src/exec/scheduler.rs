// src/exec/scheduler.rs

//! Batch scheduler: validates the graph, spawns one runner per task and
//! returns the first failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWrite;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::model::{ConfigFile, TaskName};
use crate::config::validate::validate_no_cycles;
use crate::errors::{Result, TaskdagError};
use crate::exec::backend::{CommandBackend, ProcessBackend};
use crate::exec::gate::AdmissionGate;
use crate::exec::signal::CompletionRegistry;
use crate::exec::sink::PrefixingSink;
use crate::exec::task_runner::{RunnerContext, run_task};

/// Default number of external commands allowed to run at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// "First error wins" slot shared by all runners of a batch.
///
/// Recording the first error also cancels the batch, so every sibling that
/// is waiting on a dependency, the gate or its command unwinds promptly.
#[derive(Debug)]
pub(crate) struct FirstError {
    cancel: CancellationToken,
    slot: Mutex<Option<TaskdagError>>,
}

impl FirstError {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            slot: Mutex::new(None),
        }
    }

    /// Store `err` if no error was stored yet.
    pub(crate) fn record(&self, err: TaskdagError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.is_none() {
            info!(
                task = ?err.task_name(),
                error = %err,
                "first failure; cancelling remaining tasks"
            );
            *slot = Some(err);
            self.cancel.cancel();
        } else {
            debug!(task = ?err.task_name(), error = %err, "additional failure ignored");
        }
    }

    fn take(&self) -> Option<TaskdagError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Runs a whole task file with a bounded number of concurrent commands.
#[derive(Debug)]
pub struct Scheduler<B = ProcessBackend> {
    backend: Arc<B>,
    max_concurrency: usize,
}

impl Scheduler<ProcessBackend> {
    /// Scheduler that spawns real processes.
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_backend(ProcessBackend, max_concurrency)
    }
}

impl<B: CommandBackend> Scheduler<B> {
    pub fn with_backend(backend: B, max_concurrency: usize) -> Self {
        Self {
            backend: Arc::new(backend),
            max_concurrency,
        }
    }

    /// Run every task in `cfg`, honouring dependencies.
    ///
    /// - A cyclic graph is rejected before anything is spawned or written.
    /// - The first task failure cancels the rest of the batch; that error is
    ///   returned.
    /// - Cancelling `cancel` aborts the batch with a cancellation error.
    ///   The scheduler itself never cancels `cancel`; it works on a child
    ///   token.
    /// - Returns only after every runner has terminated.
    pub async fn run<W>(
        &self,
        cancel: &CancellationToken,
        cfg: &ConfigFile,
        sink: &PrefixingSink<W>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        validate_no_cycles(cfg)?;
        let gate = AdmissionGate::new(self.max_concurrency)?;

        // All signals exist before the first runner can look one up.
        let (registry, mut guards) = CompletionRegistry::new(cfg.names());
        let batch_cancel = cancel.child_token();

        let ctx = RunnerContext {
            sink: sink.clone(),
            signals: Arc::new(registry),
            gate,
            backend: Arc::clone(&self.backend),
            cancel: batch_cancel.clone(),
            failures: Arc::new(FirstError::new(batch_cancel.clone())),
        };
        let failures = Arc::clone(&ctx.failures);

        info!(
            tasks = cfg.len(),
            max_concurrency = self.max_concurrency,
            "starting task batch"
        );

        let mut runners = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, TaskName> = HashMap::with_capacity(cfg.len());

        for (name, task) in cfg.iter() {
            let Some(done) = guards.remove(name) else {
                continue;
            };
            let handle = runners.spawn(run_task(ctx.clone(), name.clone(), task.clone(), done));
            names.insert(handle.id(), name.clone());
        }
        drop(ctx);

        while let Some(joined) = runners.join_next_with_id().await {
            if let Err(join_err) = joined {
                let task = names
                    .get(&join_err.id())
                    .cloned()
                    .unwrap_or_else(|| "<unknown>".to_string());
                error!(task = %task, error = %join_err, "task runner aborted");
                failures.record(TaskdagError::RunnerAborted {
                    task,
                    reason: join_err.to_string(),
                });
            }
        }

        match failures.take() {
            Some(err) => Err(err),
            None => {
                info!("all tasks finished successfully");
                Ok(())
            }
        }
    }
}

/// Convenience wrapper: run `cfg` with real processes.
pub async fn run_tasks<W>(
    cancel: &CancellationToken,
    cfg: &ConfigFile,
    max_concurrency: usize,
    sink: &PrefixingSink<W>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    Scheduler::new(max_concurrency).run(cancel, cfg, sink).await
}
