// src/dag/graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, TaskName};
use crate::errors::{Result, TaskdagError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies that exist in the task file.
    deps: Vec<TaskName>,
    /// Direct dependencies that name no known task.
    missing: Vec<TaskName>,
    /// Direct dependents: tasks that list this one in `deps`.
    dependents: Vec<TaskName>,
}

/// Read-only adjacency view of a task file, keyed by task name.
///
/// Used for diagnostics (`--dry-run`) and tests; execution itself only
/// needs each task's own dependency list.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: BTreeMap<TaskName, DagNode>,
}

impl DagGraph {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut nodes: BTreeMap<TaskName, DagNode> = cfg
            .names()
            .map(|name| (name.to_string(), DagNode::default()))
            .collect();

        for (name, task) in cfg.iter() {
            for dep in task.dependencies() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(name.clone());
                }

                if let Some(node) = nodes.get_mut(name) {
                    if cfg.contains(dep) {
                        node.deps.push(dep.to_string());
                    } else {
                        node.missing.push(dep.to_string());
                    }
                }
            }
        }

        Self { nodes }
    }

    /// Immediate dependencies of a task that exist in the graph.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Dependency names of `name` that match no task.
    pub fn missing_dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.missing.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks without any dependencies (existing or missing).
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.deps.is_empty() && n.missing.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// One valid execution order: every task appears after all of its
    /// dependencies.
    pub fn execution_order(&self) -> Result<Vec<TaskName>> {
        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for (name, node) in self.nodes.iter() {
            for dep in node.deps.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => {
                let node = cycle.node_id();
                Err(TaskdagError::CyclicDependency {
                    task: node.to_string(),
                    cycle: vec![node.to_string()],
                })
            }
        }
    }
}
