// src/config/validate.rs

use std::collections::HashMap;

use crate::config::model::ConfigFile;
use crate::errors::{Result, TaskdagError};

/// Traversal colour of a task during cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current traversal path.
    Gray,
    /// Fully explored; proven acyclic from here.
    Black,
}

/// Reject task graphs whose dependency relation contains a cycle.
///
/// Depth-first search from every task in name order, using an explicit stack
/// so deep chains cannot overflow the call stack. Unvisited tasks are
/// "white" (absent from `marks`). Reaching a gray task closes a cycle.
///
/// Dependencies naming a task that does not exist are skipped here; they are
/// reported by the runner of the depending task when it tries to wait on
/// them.
pub fn validate_no_cycles(cfg: &ConfigFile) -> Result<()> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(cfg.len());

    for root in cfg.names() {
        if marks.contains_key(root) {
            continue;
        }

        marks.insert(root, Mark::Gray);
        // (task, index of the next dependency to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(&(node, next)) = stack.last() {
            let deps = cfg.get(node).map(|t| t.deps.as_slice()).unwrap_or(&[]);

            let Some(dep) = deps.get(next) else {
                marks.insert(node, Mark::Black);
                stack.pop();
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let dep = dep.as_str();
            if dep.trim().is_empty() || !cfg.contains(dep) {
                continue;
            }

            match marks.get(dep) {
                Some(Mark::Gray) => return Err(cycle_error(&stack, dep)),
                Some(Mark::Black) => {}
                None => {
                    marks.insert(dep, Mark::Gray);
                    stack.push((dep, 0));
                }
            }
        }
    }

    Ok(())
}

/// Build the error for a back edge `stack.last() -> dep`.
fn cycle_error(stack: &[(&str, usize)], dep: &str) -> TaskdagError {
    let start = stack.iter().position(|(name, _)| *name == dep).unwrap_or(0);

    let mut cycle: Vec<String> = stack[start..]
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    cycle.push(dep.to_string());

    TaskdagError::CyclicDependency {
        task: dep.to_string(),
        cycle,
    }
}

/// The concurrency limit must allow at least one running command.
pub fn validate_concurrency(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(TaskdagError::ConfigError(
            "concurrency limit must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
