// src/exec/signal.rs

//! Per-task completion signals.
//!
//! Every task gets a write-once `watch` channel. The write end lives in a
//! [`CompletionGuard`] owned by that task's runner and fires when the guard
//! is dropped, so the signal is set on every exit path, including panics and
//! aborted runner futures. Any number of dependents can wait on the read end.

use std::collections::HashMap;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::TaskName;

/// Terminal state reported through a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed,
}

/// Why [`CompletionRegistry::wait`] returned without a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No task with this name exists.
    Unknown,
    /// The run was cancelled first.
    Cancelled,
}

/// Read side of all completion signals for one run.
#[derive(Debug)]
pub struct CompletionRegistry {
    waiters: HashMap<TaskName, watch::Receiver<Option<Completion>>>,
}

/// Write side of one task's completion signal.
///
/// Signals [`Completion::Failed`] on drop unless
/// [`mark_succeeded`](Self::mark_succeeded) was called.
#[derive(Debug)]
pub struct CompletionGuard {
    task: TaskName,
    outcome: Completion,
    tx: watch::Sender<Option<Completion>>,
}

impl CompletionRegistry {
    /// Create a pending signal for every name.
    ///
    /// Returns the shared registry and one guard per task, to be handed to
    /// that task's runner.
    pub fn new<I, S>(names: I) -> (Self, HashMap<TaskName, CompletionGuard>)
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let mut waiters = HashMap::new();
        let mut guards = HashMap::new();

        for name in names {
            let name: TaskName = name.into();
            let (tx, rx) = watch::channel(None);
            waiters.insert(name.clone(), rx);
            guards.insert(
                name.clone(),
                CompletionGuard {
                    task: name,
                    outcome: Completion::Failed,
                    tx,
                },
            );
        }

        (Self { waiters }, guards)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.waiters.contains_key(name)
    }

    /// Wait until `name` has finished, or until `cancel` fires.
    pub async fn wait(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion, WaitError> {
        let mut rx = self.waiters.get(name).ok_or(WaitError::Unknown)?.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            res = rx.wait_for(Option::is_some) => match res {
                Ok(state) => Ok((*state).unwrap_or(Completion::Failed)),
                // Sender gone without a value; treat as a failed task.
                Err(_) => Ok(Completion::Failed),
            },
        }
    }
}

impl CompletionGuard {
    /// Report success when the guard is dropped.
    pub fn mark_succeeded(&mut self) {
        self.outcome = Completion::Succeeded;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        debug!(task = %self.task, outcome = ?self.outcome, "completion signalled");
        self.tx.send_replace(Some(self.outcome));
    }
}
