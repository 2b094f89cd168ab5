// src/errors.rs

//! Error type for the engine and the workflow front-end.
//!
//! Graph mutations fail fast and leave no state behind: a duplicate insert or
//! a cycle is reported to the caller before anything is wired. Failures *of
//! tasks* are not errors at all; they are recorded on the task's execution
//! info and handled by the retry protocol.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RundagError {
    /// The task was inserted before and `ignore_exists` was not set.
    #[error("task '{0}' is already tracked")]
    DuplicateTask(String),

    /// Wiring the declared edges would close a dependency cycle. Raised on
    /// insertion and by workflow validation; the graph is left unchanged.
    #[error("dependency cycle: {0}")]
    DagCycle(String),

    /// An operation referenced a task the manager does not track, e.g. an
    /// untracked parent passed to `add_task_with_parent`.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The workflow file is well-formed TOML but fails validation (empty
    /// task table, bad envelope, unparseable or oversized requests, unknown
    /// `after` references).
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// The workflow file is not valid TOML.
    #[error("workflow parse error: {0}")]
    WorkflowToml(#[from] toml::de::Error),

    /// Anything else, usually IO wrapped with context at the call site.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RundagError>;
