// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::resources::{Cores, Memory, TaskManagerResources};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [resources]
/// cores = 8.0
/// memory = "8g"
/// in_process_memory = "1g"
///
/// [run]
/// sleep_ms = 50
///
/// [task.index]
/// cmd = "make index"
///
/// [task.align]
/// cmd = "make align"
/// after = ["index"]
/// cores = 2.0
/// memory = "4g"
/// retries = 1
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// The global envelope from `[resources]`.
    #[serde(default)]
    pub resources: ResourcesSection,

    /// Loop pacing from `[run]`.
    #[serde(default)]
    pub run: RunSection,

    /// All tasks from `[task.<name>]`. Keys are the task names.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A configuration that passed validation (see [`crate::config::validate`]).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub resources: ResourcesSection,
    pub run: RunSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    /// Construct without validating. Only `TryFrom<RawConfigFile>` should
    /// call this.
    pub(crate) fn new_unchecked(
        resources: ResourcesSection,
        run: RunSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            resources,
            run,
            task,
        }
    }
}

/// `[resources]` section: the envelope the engine may allocate concurrently.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesSection {
    /// Total cores shared by all running tasks.
    #[serde(default = "default_envelope_cores")]
    pub cores: f64,

    /// Total system memory available to process tasks.
    #[serde(default = "default_envelope_memory")]
    pub memory: String,

    /// Memory budget for in-process tasks.
    #[serde(default = "default_in_process_memory")]
    pub in_process_memory: String,
}

fn default_envelope_cores() -> f64 {
    4.0
}

fn default_envelope_memory() -> String {
    "8g".to_string()
}

fn default_in_process_memory() -> String {
    "1g".to_string()
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            cores: default_envelope_cores(),
            memory: default_envelope_memory(),
            in_process_memory: default_in_process_memory(),
        }
    }
}

impl ResourcesSection {
    /// The parsed envelope. Only meaningful after validation.
    pub fn envelope(&self) -> TaskManagerResources {
        TaskManagerResources::new(
            Cores(self.cores),
            Memory::parse(&self.memory),
            Memory::parse(&self.in_process_memory),
        )
    }
}

/// `[run]` section: pacing of the scheduling loop.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    /// Milliseconds slept between scheduling ticks.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,

    /// Wall-clock limit in seconds; absent means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_sleep_ms() -> u64 {
    50
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            sleep_ms: default_sleep_ms(),
            timeout_secs: None,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// The command to execute (through the platform shell).
    pub cmd: String,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Cores this task occupies while running.
    #[serde(default = "default_task_cores")]
    pub cores: f64,

    /// Memory this task occupies while running; absent means none.
    #[serde(default)]
    pub memory: Option<String>,

    /// How many extra attempts a failed run gets.
    #[serde(default)]
    pub retries: u32,
}

fn default_task_cores() -> f64 {
    1.0
}
