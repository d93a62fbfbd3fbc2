use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use taskdag::exec::{
    CommandBackend, CommandExit, ExitFuture, Invocation, OutputStream, SpawnedCommand,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Canned behaviour for one task's command.
#[derive(Debug, Clone, Default)]
pub struct FakeCommand {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub delay: Duration,
    pub fail_spawn: bool,
    pub hold_output_open: bool,
}

impl FakeCommand {
    /// Exits 0 after writing `stdout`.
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            ..Self::default()
        }
    }

    /// Exits with `code`.
    pub fn failing(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Cannot be started at all.
    pub fn spawn_error() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.as_bytes().to_vec();
        self
    }

    pub fn with_exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Leave stdout open after the command exits, the way a background
    /// process that inherited the pipe would.
    pub fn with_output_held_open(mut self) -> Self {
        self.hold_output_open = true;
        self
    }

    /// Keep "running" for `delay` before exiting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Reader that never reaches end of stream and never becomes ready.
struct NeverEof;

impl AsyncRead for NeverEof {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// What the fake backend observed, shared with the test after the backend
/// has been moved into a scheduler.
#[derive(Debug, Default)]
pub struct FakeState {
    events: Mutex<Vec<String>>,
    invocations: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeState {
    /// `start:<task>` / `end:<task>` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Every invocation that was spawned (or attempted), in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Task names whose command was started, in order.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    /// Highest number of commands that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Marks a fake command as finished when its exit future completes or is
/// dropped.
struct ActiveGuard {
    task: String,
    state: Arc<FakeState>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("end:{}", self.task));
    }
}

/// A `CommandBackend` that never spawns processes.
///
/// Tasks without a registered [`FakeCommand`] succeed immediately with no
/// output.
#[derive(Debug, Default)]
pub struct FakeBackend {
    commands: HashMap<String, FakeCommand>,
    state: Arc<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, task: &str, command: FakeCommand) -> Self {
        self.commands.insert(task.to_string(), command);
        self
    }

    pub fn state(&self) -> Arc<FakeState> {
        Arc::clone(&self.state)
    }
}

impl CommandBackend for FakeBackend {
    fn spawn(&self, invocation: &Invocation) -> io::Result<SpawnedCommand> {
        self.state
            .invocations
            .lock()
            .unwrap()
            .push(invocation.clone());

        let command = self
            .commands
            .get(&invocation.task)
            .cloned()
            .unwrap_or_default();

        if command.fail_spawn {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("program not found: {}", invocation.program),
            ));
        }

        let now_active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now_active, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("start:{}", invocation.task));

        let guard = ActiveGuard {
            task: invocation.task.clone(),
            state: Arc::clone(&self.state),
        };
        let delay = command.delay;
        let code = command.exit_code;

        let exit: ExitFuture = Box::pin(async move {
            let _guard = guard;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(CommandExit::from_code(code))
        });

        let stdout: OutputStream = if command.hold_output_open {
            Box::new(io::Cursor::new(command.stdout).chain(NeverEof))
        } else {
            Box::new(io::Cursor::new(command.stdout))
        };

        Ok(SpawnedCommand {
            stdout,
            stderr: Box::new(io::Cursor::new(command.stderr)),
            exit,
        })
    }
}
