use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rundag::exec::{Completion, CompletionSender, LaunchRequest, RunOutcome, RunnerBackend};
use rundag::TaskId;

/// A backend that never runs anything: it records launches and lets the test
/// decide when and how each attempt completes.
///
/// Clone it before handing it to the manager to keep a handle for assertions:
///
/// ```ignore
/// let (tx, rx) = rundag::exec::completion_channel();
/// let backend = ManualBackend::new(tx);
/// let driver = backend.clone();
/// let mut manager = TaskManager::with_backend(envelope, backend, rx);
/// ```
#[derive(Clone)]
pub struct ManualBackend {
    tx: CompletionSender,
    launched: Arc<Mutex<Vec<LaunchRequest>>>,
    cancelled: Arc<Mutex<Vec<TaskId>>>,
}

impl ManualBackend {
    pub fn new(tx: CompletionSender) -> Self {
        Self {
            tx,
            launched: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Launches recorded so far, oldest first.
    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    /// Drain the recorded launches.
    pub fn take_launched(&self) -> Vec<LaunchRequest> {
        std::mem::take(&mut *self.launched.lock().unwrap())
    }

    /// Tasks that were asked to cancel.
    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Complete a launched attempt the way the real runner would: invoke the
    /// task's on-complete hook and post the completion event.
    pub fn complete(&self, request: &LaunchRequest, exit_code: i32) {
        let on_complete_ok = request.task.invoke_on_complete(exit_code);
        let _ = self.tx.send(Completion {
            id: request.id,
            attempt: request.attempt,
            outcome: RunOutcome::Exited(exit_code),
            on_complete_ok,
            end_time: SystemTime::now(),
        });
    }

    /// Report a launched attempt as crashed (no exit code).
    pub fn crash(&self, request: &LaunchRequest) {
        let _ = self.tx.send(Completion {
            id: request.id,
            attempt: request.attempt,
            outcome: RunOutcome::Crashed,
            on_complete_ok: false,
            end_time: SystemTime::now(),
        });
    }
}

impl RunnerBackend for ManualBackend {
    fn launch(&mut self, request: LaunchRequest) {
        self.launched.lock().unwrap().push(request);
    }

    fn cancel(&mut self, id: TaskId) {
        self.cancelled.lock().unwrap().push(id);
    }

    fn cancel_all(&mut self) {
        let running: Vec<TaskId> = self.launched.lock().unwrap().iter().map(|r| r.id).collect();
        self.cancelled.lock().unwrap().extend(running);
    }

    fn forget(&mut self, _id: TaskId) {}
}
