// src/dag/mod.rs

//! Static view of the task dependency graph.
//!
//! - [`graph`] holds adjacency information (deps, dependents, missing deps)
//!   and a topological execution order.

pub mod graph;

pub use graph::DagGraph;
