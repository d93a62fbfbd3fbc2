// src/config/loader.rs

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::errors::Result;

/// On-disk representation of a task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Json,
    Toml,
}

impl ConfigFormat {
    /// Infer the format from a file extension: `.toml` is TOML, anything
    /// else is treated as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Parse a task file from any reader.
///
/// This only performs deserialization (unknown fields are rejected); it
/// does **not** check the dependency graph. Cycle detection happens right
/// before execution in [`crate::exec::run_tasks`].
pub fn load_config<R: Read>(mut reader: R, format: ConfigFormat) -> Result<ConfigFile> {
    match format {
        ConfigFormat::Json => Ok(serde_json::from_reader(reader)?),
        ConfigFormat::Toml => {
            let mut contents = String::new();
            reader.read_to_string(&mut contents)?;
            load_from_str(&contents, ConfigFormat::Toml)
        }
    }
}

/// Parse a task file already held in memory.
pub fn load_from_str(contents: &str, format: ConfigFormat) -> Result<ConfigFile> {
    let config = match format {
        ConfigFormat::Json => serde_json::from_str(contents)?,
        ConfigFormat::Toml => toml::from_str(contents)?,
    };
    Ok(config)
}

/// Load a task file from a path, choosing the format from its extension.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path);
    debug!(path = %path.display(), ?format, "loading task file");

    let contents = fs::read_to_string(path)?;
    load_from_str(&contents, format)
}

/// Default task file looked up in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("cli-tasks.json")
}
