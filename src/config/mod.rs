// src/config/mod.rs

//! Configuration loading and validation for taskdag.
//!
//! Responsibilities:
//! - Define the serde-backed task model (`model.rs`).
//! - Load a task file from disk or any reader, JSON or TOML (`loader.rs`).
//! - Validate graph invariants like acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{ConfigFormat, default_config_path, load_config, load_from_path, load_from_str};
pub use model::{ConfigFile, TaskConfig, TaskName};
pub use validate::{validate_concurrency, validate_no_cycles};
