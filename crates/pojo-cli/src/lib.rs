//! The `pojoize` command-line tool
//!
//! Reads component metadata, scans and manipulates class files, and turns a
//! plain bundle archive into one whose components can be managed.

pub mod archive;
pub mod commands;
pub mod manifest;
pub mod output;

use anyhow::Context;
use pojo_manipulator::ManipulatorConfig;
use std::path::Path;

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG: &str = "pojo.toml";

/// Load the configuration from `path`, else from `pojo.toml` when present,
/// else the defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ManipulatorConfig> {
    if let Some(path) = path {
        return ManipulatorConfig::from_file(path)
            .with_context(|| format!("cannot load {}", path.display()));
    }
    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return ManipulatorConfig::from_file(default)
            .with_context(|| format!("cannot load {}", DEFAULT_CONFIG));
    }
    Ok(ManipulatorConfig::default())
}
