// src/config/mod.rs

//! Workflow configuration: TOML model, loading and validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, ResourcesSection, RunSection, TaskConfig};
