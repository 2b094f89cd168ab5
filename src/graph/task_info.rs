// src/graph/task_info.rs

//! Per-task execution record: status, attempts, timestamps.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::graph::TaskId;
use crate::resources::ResourceSet;
use crate::task::Task;

/// Outcome-oriented status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Not yet started (or reset by a replacement).
    Unknown,
    /// Admitted and handed to the runner; for composites, expansion has begun.
    Started,
    Succeeded,
    /// The command exited non-zero (or was killed).
    FailedCommand,
    /// The command exited zero but the on-complete hook returned false.
    FailedOnComplete,
    /// A composite's `build` returned an error.
    FailedGetTasks,
    /// The task crashed without producing an exit code.
    FailedUnknown,
    /// Marked successful by an operator rather than by execution.
    ManuallySucceeded,
}

impl TaskStatus {
    /// Whether this status is terminal. Success statuses always are; the
    /// failure statuses count as done only when `failed_is_done` is set.
    pub fn is_done(&self, failed_is_done: bool) -> bool {
        match self {
            TaskStatus::Succeeded | TaskStatus::ManuallySucceeded => true,
            TaskStatus::FailedCommand
            | TaskStatus::FailedOnComplete
            | TaskStatus::FailedGetTasks
            | TaskStatus::FailedUnknown => failed_is_done,
            TaskStatus::Unknown | TaskStatus::Started => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            TaskStatus::FailedCommand
                | TaskStatus::FailedOnComplete
                | TaskStatus::FailedGetTasks
                | TaskStatus::FailedUnknown
        )
    }
}

/// Attempt-oriented record kept for every inserted task.
///
/// `status_history` records every status transition in order, so callers can
/// observe per-attempt outcomes (e.g. a failure that was later retried away)
/// after the fact.
#[derive(Debug, Clone)]
pub struct TaskExecutionInfo {
    pub id: TaskId,
    pub task: Task,
    pub name: String,
    pub status: TaskStatus,
    pub status_history: Vec<TaskStatus>,
    /// Attempts are numbered from 1.
    pub attempt_index: u32,
    pub submission_date: Option<SystemTime>,
    pub start_date: Option<SystemTime>,
    pub end_date: Option<SystemTime>,
    pub script_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    /// The resources actually admitted for the current attempt.
    pub resources: Option<ResourceSet>,
    /// The composite that produced this task, if any.
    pub parent: Option<TaskId>,
}

impl TaskExecutionInfo {
    pub fn new(id: TaskId, task: Task, parent: Option<TaskId>) -> Self {
        let name = task.name();
        Self {
            id,
            task,
            name,
            status: TaskStatus::Unknown,
            status_history: vec![TaskStatus::Unknown],
            attempt_index: 1,
            submission_date: Some(SystemTime::now()),
            start_date: None,
            end_date: None,
            script_path: None,
            log_path: None,
            resources: None,
            parent,
        }
    }

    /// Transition to `status`, appending to the history.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.status_history.push(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_always_done() {
        assert!(TaskStatus::Succeeded.is_done(false));
        assert!(TaskStatus::ManuallySucceeded.is_done(false));
    }

    #[test]
    fn failed_statuses_need_the_flag() {
        for status in [
            TaskStatus::FailedCommand,
            TaskStatus::FailedOnComplete,
            TaskStatus::FailedGetTasks,
            TaskStatus::FailedUnknown,
        ] {
            assert!(!status.is_done(false));
            assert!(status.is_done(true));
            assert!(status.is_failed());
        }
    }

    #[test]
    fn pending_statuses_are_never_done() {
        assert!(!TaskStatus::Unknown.is_done(true));
        assert!(!TaskStatus::Started.is_done(true));
    }

    #[test]
    fn history_records_every_transition() {
        let task = Task::in_process("t", || 0);
        let mut info = TaskExecutionInfo::new(0, task, None);

        info.set_status(TaskStatus::Started);
        info.set_status(TaskStatus::FailedOnComplete);
        info.set_status(TaskStatus::Started);
        info.set_status(TaskStatus::Succeeded);

        assert_eq!(
            info.status_history,
            vec![
                TaskStatus::Unknown,
                TaskStatus::Started,
                TaskStatus::FailedOnComplete,
                TaskStatus::Started,
                TaskStatus::Succeeded,
            ]
        );
    }
}
