// tests/scheduler_fake_backend.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use taskdag::config::ConfigFile;
use taskdag::errors::TaskdagError;
use taskdag::exec::{PrefixingSink, Scheduler};
use taskdag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use taskdag_test_utils::fake_backend::{FakeBackend, FakeCommand, FakeState};
use taskdag_test_utils::{init_tracing, line_index, lines, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

struct RunOutput {
    result: Result<(), TaskdagError>,
    lines: Vec<String>,
    state: Arc<FakeState>,
}

async fn run_with(backend: FakeBackend, cfg: &ConfigFile, limit: usize) -> RunOutput {
    run_with_token(backend, cfg, limit, &CancellationToken::new()).await
}

async fn run_with_token(
    backend: FakeBackend,
    cfg: &ConfigFile,
    limit: usize,
    cancel: &CancellationToken,
) -> RunOutput {
    let state = backend.state();
    let sink = PrefixingSink::new(Vec::<u8>::new());
    let scheduler = Scheduler::with_backend(backend, limit);
    let result = with_timeout(scheduler.run(cancel, cfg, &sink)).await;
    let out = sink.into_inner().expect("all runners must have released the sink");

    RunOutput {
        result,
        lines: lines(&out),
        state,
    }
}

fn event_index(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("event {event:?} not found in {events:?}"))
}

#[tokio::test]
async fn dependent_runs_after_dependency() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .task("a", "echo A", &[])
        .task("b", "echo B", &["a"])
        .build();
    let backend = FakeBackend::new()
        .with_command("a", FakeCommand::ok("A\n"))
        .with_command("b", FakeCommand::ok("B\n"));

    let run = run_with(backend, &cfg, 1).await;
    run.result?;

    let l = &run.lines;
    assert!(l.contains(&"---- a started ----".to_string()));
    assert!(l.contains(&"---- b started ----".to_string()));
    assert!(l.contains(&"---- b waiting for dependency: a ----".to_string()));

    let a_out = line_index(l, "[a] A");
    let a_done = line_index(l, "---- a finished successfully ----");
    let b_out = line_index(l, "[b] B");
    let b_done = line_index(l, "---- b finished successfully ----");

    assert!(a_out < a_done);
    assert!(a_done < b_out, "b produced output before a finished:\n{}", l.join("\n"));
    assert!(b_out < b_done);

    assert_eq!(run.state.started(), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn invocation_is_split_on_whitespace() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(
            "t",
            TaskConfigBuilder::new("  cargo   test  --all ")
                .cwd("sub/dir")
                .desc("run tests")
                .build(),
        )
        .build();

    let run = run_with(FakeBackend::new(), &cfg, 4).await;
    run.result?;

    let invocations = run.state.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].task, "t");
    assert_eq!(invocations[0].program, "cargo");
    assert_eq!(invocations[0].args, vec!["test", "--all"]);
    assert_eq!(invocations[0].cwd.as_deref(), Some(std::path::Path::new("sub/dir")));
    Ok(())
}

#[tokio::test]
async fn fan_in_waits_for_every_dependency() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .task("first", "x", &[])
        .task("second", "x", &["first"])
        .task("third", "x", &["first", "second"])
        .build();
    let backend = FakeBackend::new()
        .with_command("first", FakeCommand::ok("").with_delay(Duration::from_millis(30)))
        .with_command("second", FakeCommand::ok("").with_delay(Duration::from_millis(10)));

    let run = run_with(backend, &cfg, 4).await;
    run.result?;

    let events = run.state.events();
    assert!(event_index(&events, "end:first") < event_index(&events, "start:second"));
    assert!(event_index(&events, "end:second") < event_index(&events, "start:third"));

    let first = line_index(&run.lines, "---- first finished successfully ----");
    let second = line_index(&run.lines, "---- second finished successfully ----");
    let third = line_index(&run.lines, "---- third finished successfully ----");
    assert!(first < second && second < third);
    Ok(())
}

#[tokio::test]
async fn limit_of_one_serializes_independent_commands() -> TestResult {
    let mut builder = ConfigFileBuilder::new();
    let mut backend = FakeBackend::new();
    for i in 0..6 {
        let name = format!("t{i}");
        builder = builder.task(&name, "work", &[]);
        let command = FakeCommand::ok("").with_delay(Duration::from_millis(10));
        backend = backend.with_command(&name, command);
    }

    let run = run_with(backend, &builder.build(), 1).await;
    run.result?;

    assert_eq!(run.state.peak_concurrency(), 1);

    // Strict start/end alternation: no two commands overlap.
    let events = run.state.events();
    assert_eq!(events.len(), 12);
    for pair in events.chunks(2) {
        let started = pair[0].strip_prefix("start:").expect("start event");
        assert_eq!(pair[1], format!("end:{started}"));
    }
    Ok(())
}

#[tokio::test]
async fn concurrency_is_capped_but_used() -> TestResult {
    let mut builder = ConfigFileBuilder::new();
    let mut backend = FakeBackend::new();
    for i in 0..8 {
        let name = format!("t{i}");
        builder = builder.task(&name, "work", &[]);
        let command = FakeCommand::ok("").with_delay(Duration::from_millis(50));
        backend = backend.with_command(&name, command);
    }

    let run = run_with(backend, &builder.build(), 3).await;
    run.result?;

    assert_eq!(run.state.started().len(), 8);
    assert!(run.state.peak_concurrency() <= 3);
    assert!(run.state.peak_concurrency() >= 2, "tasks never ran in parallel");
    Ok(())
}

#[tokio::test]
async fn waiting_on_dependencies_does_not_hold_a_permit() -> TestResult {
    // With one permit, `waiter` (blocked on `slow`) must not starve `slow`.
    let cfg = ConfigFileBuilder::new()
        .task("waiter", "x", &["slow"])
        .task("slow", "x", &[])
        .build();
    let backend = FakeBackend::new()
        .with_command("slow", FakeCommand::ok("").with_delay(Duration::from_millis(20)));

    let run = run_with(backend, &cfg, 1).await;
    run.result?;
    assert_eq!(run.state.started(), vec!["slow", "waiter"]);
    Ok(())
}

#[tokio::test]
async fn missing_dependency_error_names_it() {
    let cfg = ConfigFileBuilder::new()
        .task("clean", "echo hi", &["DoesNotExist"])
        .build();

    let run = run_with(FakeBackend::new(), &cfg, 1).await;

    let err = run.result.expect_err("missing dependency must fail");
    assert!(err.to_string().contains("dependency DoesNotExist not found"), "got: {err}");
    assert_eq!(err.task_name(), Some("clean"));
    assert!(run.state.started().is_empty());
    assert!(run.lines.contains(&"---- clean finished with error ----".to_string()));
}

#[tokio::test]
async fn cyclic_graph_produces_no_output_and_runs_nothing() {
    let cfg = ConfigFileBuilder::new()
        .task("clean", "echo hi", &["build"])
        .task("build", "echo hi", &["test"])
        .task("test", "echo hi", &["clean"])
        .build();

    let run = run_with(FakeBackend::new(), &cfg, 1).await;

    let err = run.result.expect_err("cycle must be rejected");
    assert!(err.to_string().contains("cyclic dependency detected"), "got: {err}");
    assert!(run.lines.is_empty(), "unexpected output: {:?}", run.lines);
    assert!(run.state.invocations().is_empty());
}

#[tokio::test]
async fn self_dependency_is_rejected_before_running() {
    let cfg = ConfigFileBuilder::new().task("me", "echo hi", &["me"]).build();

    let run = run_with(FakeBackend::new(), &cfg, 1).await;

    assert!(matches!(run.result, Err(TaskdagError::CyclicDependency { .. })));
    assert!(run.lines.is_empty());
}

#[tokio::test]
async fn failing_command_fails_the_run_and_skips_dependents() {
    let cfg = ConfigFileBuilder::new()
        .task("a", "x", &[])
        .task("b", "x", &["a"])
        .task("c", "x", &["b"])
        .build();
    let backend = FakeBackend::new()
        .with_command("a", FakeCommand::ok("partial output\n").with_stderr("boom\n").with_exit(3));

    let run = run_with(backend, &cfg, 2).await;

    match run.result {
        Err(TaskdagError::CommandFailed { ref task, exit }) => {
            assert_eq!(task, "a");
            assert_eq!(exit.code, Some(3));
        }
        ref other => panic!("expected CommandFailed, got: {other:?}"),
    }

    assert_eq!(run.state.started(), vec!["a"]);
    // Output produced before the failure is preserved.
    assert!(run.lines.contains(&"[a] partial output".to_string()));
    assert!(run.lines.contains(&"[a] boom".to_string()));
    assert!(run.lines.contains(&"---- a finished with error ----".to_string()));
    assert!(run.lines.contains(&"---- b finished with error ----".to_string()));
    assert!(run.lines.contains(&"---- c finished with error ----".to_string()));
}

#[tokio::test]
async fn first_failure_cancels_running_siblings() {
    let cfg = ConfigFileBuilder::new()
        .task("bad", "x", &[])
        .task("slow", "x", &[])
        .build();
    let backend = FakeBackend::new()
        .with_command("bad", FakeCommand::failing(1).with_delay(Duration::from_millis(20)))
        .with_command("slow", FakeCommand::ok("").with_delay(Duration::from_secs(60)));

    let run = run_with(backend, &cfg, 2).await;

    let err = run.result.expect_err("run must fail");
    assert_eq!(err.task_name(), Some("bad"));
    assert!(!err.is_cancellation());

    // The slow command was stopped instead of running to completion.
    assert_eq!(run.state.active(), 0);
    assert!(run.state.events().contains(&"end:slow".to_string()));
    let slow_done = line_index(&run.lines, "---- slow finished with error ----");
    assert!(run.lines[slow_done + 1].contains("cancelled"));
}

#[tokio::test]
async fn empty_command_is_a_task_error() {
    let cfg = ConfigFileBuilder::new().task("blank", "   ", &[]).build();

    let run = run_with(FakeBackend::new(), &cfg, 1).await;

    assert!(matches!(
        run.result,
        Err(TaskdagError::EmptyCommand { ref task }) if task == "blank"
    ));
    assert!(run.state.invocations().is_empty());
}

#[tokio::test]
async fn spawn_failure_is_a_task_error() {
    let cfg = ConfigFileBuilder::new().task("ghost", "no-such-program", &[]).build();
    let backend = FakeBackend::new().with_command("ghost", FakeCommand::spawn_error());

    let run = run_with(backend, &cfg, 1).await;

    match run.result {
        Err(TaskdagError::Spawn { ref task, .. }) => assert_eq!(task, "ghost"),
        ref other => panic!("expected Spawn error, got: {other:?}"),
    }
}

#[tokio::test]
async fn external_cancellation_stops_the_batch() {
    let cfg = ConfigFileBuilder::new()
        .task("long", "x", &[])
        .task("after", "x", &["long"])
        .build();
    let backend = FakeBackend::new()
        .with_command("long", FakeCommand::ok("").with_delay(Duration::from_secs(60)));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let run = run_with_token(backend, &cfg, 2, &cancel).await;

    let err = run.result.expect_err("cancelled run must fail");
    assert!(err.is_cancellation(), "got: {err}");
    assert_eq!(run.state.started(), vec!["long"]);
}

#[tokio::test]
async fn scheduler_never_cancels_the_callers_token() {
    let cfg = ConfigFileBuilder::new().task("bad", "x", &[]).build();
    let backend = FakeBackend::new().with_command("bad", FakeCommand::failing(2));
    let cancel = CancellationToken::new();

    let run = run_with_token(backend, &cfg, 1, &cancel).await;

    assert!(run.result.is_err());
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn zero_concurrency_is_rejected_without_output() {
    let cfg = ConfigFileBuilder::new().task("a", "x", &[]).build();

    let run = run_with(FakeBackend::new(), &cfg, 0).await;

    assert!(matches!(run.result, Err(TaskdagError::ConfigError(_))));
    assert!(run.lines.is_empty());
}

#[tokio::test]
async fn empty_task_file_succeeds() -> TestResult {
    let run = run_with(FakeBackend::new(), &ConfigFile::default(), 4).await;
    run.result?;
    assert!(run.lines.is_empty());
    Ok(())
}

#[tokio::test]
async fn output_left_open_after_exit_does_not_hold_the_task() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .task("server", "spawn-and-exit", &[])
        .task("after", "echo after", &["server"])
        .build();
    let backend = FakeBackend::new()
        .with_command("server", FakeCommand::ok("listening\n").with_output_held_open())
        .with_command("after", FakeCommand::ok("after\n"));

    let run = run_with(backend, &cfg, 2).await;
    run.result?;

    let listening = line_index(&run.lines, "[server] listening");
    let done = line_index(&run.lines, "---- server finished successfully ----");
    assert!(listening < done);
    assert!(done < line_index(&run.lines, "[after] after"));
    Ok(())
}

/// Random DAG over `task_0..task_n`: task N may only depend on lower indices.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_tasks)
            .prop_map(|raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        if i == 0 {
                            vec![]
                        } else {
                            deps.into_iter().map(|d| d % i).collect()
                        }
                    })
                    .collect()
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_dags_respect_order_limit_and_failures(
        deps in dag_strategy(8),
        limit in 1usize..4,
        failing in proptest::option::of(0usize..8),
    ) {
        let failing = failing.filter(|&f| f < deps.len()).map(|f| format!("task_{f}"));

        let mut builder = ConfigFileBuilder::new();
        let mut backend = FakeBackend::new();
        for (i, task_deps) in deps.iter().enumerate() {
            let name = format!("task_{i}");
            let dep_names: Vec<String> = task_deps.iter().map(|d| format!("task_{d}")).collect();
            let refs: Vec<&str> = dep_names.iter().map(String::as_str).collect();
            builder = builder.task(&name, "work", &refs);

            let command = if failing.as_deref() == Some(name.as_str()) {
                FakeCommand::failing(1)
            } else {
                FakeCommand::ok("").with_delay(Duration::from_millis(2))
            };
            backend = backend.with_command(&name, command);
        }
        let cfg = builder.build();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let run = rt.block_on(run_with(backend, &cfg, limit));

        // Ok iff no command failed.
        prop_assert_eq!(run.result.is_ok(), failing.is_none());
        prop_assert!(run.state.peak_concurrency() <= limit);

        // No command started before all of its dependencies ended.
        let events = run.state.events();
        for (i, task_deps) in deps.iter().enumerate() {
            let start = format!("start:task_{i}");
            let Some(start_at) = events.iter().position(|e| *e == start) else {
                continue;
            };
            for d in task_deps {
                let end = format!("end:task_{d}");
                let end_at = events.iter().position(|e| *e == end);
                prop_assert!(
                    matches!(end_at, Some(e) if e < start_at),
                    "task_{} started before task_{} ended",
                    i,
                    d
                );
            }
        }

        if failing.is_none() {
            prop_assert_eq!(run.state.started().len(), deps.len());
        }
    }
}
