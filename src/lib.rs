// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_from_path;
use crate::config::model::ConfigFile;
use crate::config::validate::validate_no_cycles;
use crate::dag::DagGraph;
use crate::exec::{PrefixingSink, Scheduler};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - task file loading
/// - dry-run reporting
/// - the scheduler writing to stdout
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.file;
    let cfg = load_from_path(&config_path)
        .with_context(|| format!("failed to load task file {}", config_path.display()))?;
    info!(path = %config_path.display(), tasks = cfg.len(), "task file loaded");

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let cancel = CancellationToken::new();

    // Ctrl-C → cancel the batch.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling tasks");
            cancel.cancel();
        });
    }

    let sink = PrefixingSink::new(tokio::io::stdout());
    Scheduler::new(args.max)
        .run(&cancel, &cfg, &sink)
        .await
        .context("error running tasks")?;

    println!("All tasks completed successfully.");
    Ok(())
}

/// Validate the graph and print tasks in execution order without running
/// anything.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    validate_no_cycles(cfg)?;
    let graph = DagGraph::from_config(cfg);
    let order = graph.execution_order()?;

    println!("taskdag dry-run");
    println!();
    println!("tasks ({}), in execution order:", cfg.len());
    let roots: Vec<&str> = graph.roots().collect();
    if !roots.is_empty() {
        println!("ready immediately: {}", roots.join(", "));
    }

    for name in order {
        let Some(task) = cfg.get(&name) else {
            continue;
        };
        println!("  - {name}");
        if !task.desc.is_empty() {
            println!("      desc: {}", task.desc);
        }
        println!("      cmd: {}", task.cmd);
        if let Some(dir) = task.working_dir() {
            println!("      cwd: {}", dir.display());
        }
        let deps = graph.dependencies_of(&name);
        if !deps.is_empty() {
            println!("      deps: {:?}", deps);
        }
        let dependents = graph.dependents_of(&name);
        if !dependents.is_empty() {
            println!("      needed by: {:?}", dependents);
        }
        let missing = graph.missing_dependencies_of(&name);
        if !missing.is_empty() {
            println!("      missing deps (will fail at run time): {:?}", missing);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
