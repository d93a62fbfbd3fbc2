// src/config/model.rs

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Top-level task file: a mapping from task name to [`TaskConfig`].
///
/// JSON form (the default `cli-tasks.json`):
///
/// ```json
/// {
///   "build": { "desc": "Compile", "cmd": "cargo build", "cwd": ".", "deps": ["fmt"] },
///   "fmt":   { "desc": "Format",  "cmd": "cargo fmt",   "cwd": ".", "deps": [] }
/// }
/// ```
///
/// The same shape is accepted as TOML, one table per task:
///
/// ```toml
/// [build]
/// cmd = "cargo build"
/// deps = ["fmt"]
///
/// [fmt]
/// cmd = "cargo fmt"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ConfigFile {
    /// Keys are the *task names*; iteration is in name order.
    pub tasks: BTreeMap<TaskName, TaskConfig>,
}

impl ConfigFile {
    pub fn new(tasks: BTreeMap<TaskName, TaskConfig>) -> Self {
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in name order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskName, &TaskConfig)> {
        self.tasks.iter()
    }
}

/// A single task entry.
///
/// Every field is optional in the file and `null` reads as the empty value;
/// unknown fields are rejected so that typos such as `"dep"` instead of
/// `"deps"` surface at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Human-readable description. Informational only.
    #[serde(default, deserialize_with = "null_as_default")]
    pub desc: String,

    /// Command line, split on whitespace into program and arguments.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd: String,

    /// Working directory for the command. Empty means the current directory.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cwd: String,

    /// Tasks that must finish successfully before this one runs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub deps: Vec<TaskName>,
}

impl TaskConfig {
    /// Dependency names with blank entries skipped.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.deps
            .iter()
            .map(|d| d.as_str())
            .filter(|d| !d.trim().is_empty())
    }

    /// Working directory to run in, or `None` to inherit ours.
    pub fn working_dir(&self) -> Option<&Path> {
        if self.cwd.trim().is_empty() {
            None
        } else {
            Some(Path::new(&self.cwd))
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
