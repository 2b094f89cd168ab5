// src/exec/mod.rs

//! Task execution layer.
//!
//! The manager talks to a [`RunnerBackend`] instead of spawning processes
//! directly. This makes it easy to swap in a manual backend in tests while
//! keeping the production runner implementation in [`task_runner`].
//!
//! - [`TokioRunner`] is the default backend: one Tokio task per admitted
//!   leaf, with a per-task cancel handle.
//! - Workers report back over a single completion mailbox (multi-producer,
//!   single-consumer); the manager drains it at the start of every tick.

pub mod task_runner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::graph::TaskId;
use crate::resources::ResourceSet;
use crate::task::Task;

/// How a leaf task's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited (or the callback returned) with this code.
    Exited(i32),
    /// The task died without an exit code (panic, spawn failure).
    Crashed,
    /// The task was cancelled by the engine.
    Killed,
}

/// Completion event sent by a worker to the manager.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: TaskId,
    /// Attempt this completion belongs to; stale completions are dropped.
    pub attempt: u32,
    pub outcome: RunOutcome,
    /// What the task's on-complete hook returned (true when absent).
    pub on_complete_ok: bool,
    pub end_time: SystemTime,
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// Create the completion mailbox shared by a backend and a manager.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// Everything a backend needs to start one admitted leaf.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub id: TaskId,
    pub attempt: u32,
    pub task: Task,
    pub resources: ResourceSet,
    /// Where to record the command line, if log capture is enabled.
    pub script_path: Option<PathBuf>,
    /// Where to redirect stdout/stderr, if log capture is enabled.
    pub log_path: Option<PathBuf>,
}

/// Trait abstracting how admitted tasks are executed.
///
/// Production code uses [`TokioRunner`]; tests can provide an implementation
/// that records launches and completes them on demand.
pub trait RunnerBackend: Send {
    /// Start executing the given leaf. Must not block on the task's work.
    fn launch(&mut self, request: LaunchRequest);

    /// Request termination of a running task. Best effort.
    fn cancel(&mut self, id: TaskId);

    /// Request termination of every running task. Best effort.
    fn cancel_all(&mut self);

    /// Drop any per-task state for a task the manager has harvested.
    fn forget(&mut self, id: TaskId);
}

/// Real backend: one Tokio task per launch, cancel via oneshot.
pub struct TokioRunner {
    completion_tx: CompletionSender,
    cancels: HashMap<TaskId, oneshot::Sender<()>>,
}

impl TokioRunner {
    pub fn new(completion_tx: CompletionSender) -> Self {
        Self {
            completion_tx,
            cancels: HashMap::new(),
        }
    }
}

impl RunnerBackend for TokioRunner {
    fn launch(&mut self, request: LaunchRequest) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.insert(request.id, cancel_tx);

        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            task_runner::run_task(request, tx, cancel_rx).await;
        });
    }

    fn cancel(&mut self, id: TaskId) {
        if let Some(cancel) = self.cancels.remove(&id) {
            // The worker may already have finished; a failed send is fine.
            let _ = cancel.send(());
        }
    }

    fn cancel_all(&mut self) {
        let count = self.cancels.len();
        if count > 0 {
            debug!(count, "cancelling all running tasks");
        }
        for (_, cancel) in self.cancels.drain() {
            let _ = cancel.send(());
        }
    }

    fn forget(&mut self, id: TaskId) {
        self.cancels.remove(&id);
    }
}
