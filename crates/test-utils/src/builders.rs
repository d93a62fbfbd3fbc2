#![allow(dead_code)]

use std::collections::BTreeMap;
use taskdag::config::{ConfigFile, TaskConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    tasks: BTreeMap<String, TaskConfig>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.tasks.insert(name.to_string(), task);
        self
    }

    /// Shorthand for a task with a command and dependencies.
    pub fn task(self, name: &str, cmd: &str, deps: &[&str]) -> Self {
        let mut builder = TaskConfigBuilder::new(cmd);
        for dep in deps {
            builder = builder.dep(dep);
        }
        self.with_task(name, builder.build())
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::new(self.tasks)
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                desc: String::new(),
                cmd: cmd.to_string(),
                cwd: String::new(),
                deps: vec![],
            },
        }
    }

    pub fn desc(mut self, desc: &str) -> Self {
        self.task.desc = desc.to_string();
        self
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.task.cwd = cwd.to_string();
        self
    }

    pub fn dep(mut self, dep: &str) -> Self {
        self.task.deps.push(dep.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
