// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a workflow file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let raw: RawConfigFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a workflow file and validate it.
///
/// - Reads TOML; defaults are applied by `serde`.
/// - Checks for: an empty task table, an invalid envelope, unparseable or
///   over-envelope task requests, unknown `after` references, and DAG cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_from_path(path)?;
    ConfigFile::try_from(raw)
}
