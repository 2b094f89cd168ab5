// src/task/mod.rs

//! The task model.
//!
//! A [`Task`] is a cheap-to-clone handle around shared mutable state. The
//! handle is what user code declares dependencies on before insertion, and
//! what the engine's hooks hand back to request a retry; "the same task" means
//! the same underlying allocation ([`Task::ptr_eq`]).
//!
//! A task is one of three kinds ([`TaskPayload`]):
//! - `Process`: runs an external command built from an argv closure
//!   (recomputed each attempt, so retries may run different arguments);
//! - `InProcess`: runs a callback returning an exit code on a worker thread;
//! - `Composite`: produces more tasks via `build` instead of executing.
//!
//! Resource demand is either a fixed [`ResourceSet`] or a flexible picker
//! consulted with what is currently available ([`ResourcePolicy`]).

pub mod deps;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::graph::task_info::TaskExecutionInfo;
use crate::resources::{MemoryPool, ResourceSet};

pub use deps::TaskGroup;

pub type OnCompleteFn = Box<dyn FnMut(i32) -> bool + Send>;
pub type RetryFn = Box<dyn FnMut(&TaskExecutionInfo, bool) -> Option<Task> + Send>;
pub type ApplyResourcesFn = Box<dyn FnMut(&ResourceSet) + Send>;
pub type PickResourcesFn = Box<dyn FnMut(&ResourceSet) -> Option<ResourceSet> + Send>;
pub type ArgvFn = Box<dyn FnMut() -> Vec<String> + Send>;
pub type CallFn = Box<dyn FnMut() -> i32 + Send>;
pub type BuildFn = Box<dyn FnMut() -> anyhow::Result<Vec<Task>> + Send>;

/// What a task actually does when it runs.
pub enum TaskPayload {
    /// Spawn a subprocess from the computed argument vector.
    Process { argv: ArgvFn },
    /// Invoke a callback on a worker thread; its return value is the exit code.
    InProcess { call: CallFn },
    /// Produce more tasks. `build` is taken by the engine when the composite
    /// is expanded, so it runs at most once.
    Composite { build: Option<BuildFn> },
}

/// How a task's resource demand is decided at admission time.
pub enum ResourcePolicy {
    /// The task needs exactly this much or cannot run.
    Fixed(ResourceSet),
    /// The task picks a size from what is available, or declines this round.
    Flexible(PickResourcesFn),
}

struct TaskInner {
    name: String,
    payload: TaskPayload,
    resources: ResourcePolicy,
    /// Working directory for process tasks; inherited when absent.
    cwd: Option<PathBuf>,
    /// Extra environment variables for process tasks.
    env: Vec<(String, String)>,
    on_complete: Option<OnCompleteFn>,
    retry: Option<RetryFn>,
    apply_resources: Option<ApplyResourcesFn>,
    /// Declared predecessors, in declaration order. Duplicates allowed.
    depends_on: Vec<Task>,
    /// Declared successors, held weakly to avoid reference cycles between
    /// mutually-linked tasks.
    dependents: Vec<Weak<Mutex<TaskInner>>>,
    /// Set when the task is inserted into a manager; edges are frozen from
    /// then on.
    frozen: bool,
}

/// Key identifying a task handle's underlying allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey(usize);

/// A handle to a unit of work. Clones share identity.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Mutex<TaskInner>>,
}

impl Task {
    fn from_parts(name: String, payload: TaskPayload) -> Task {
        Task {
            inner: Arc::new(Mutex::new(TaskInner {
                name,
                payload,
                resources: ResourcePolicy::Fixed(ResourceSet::empty()),
                cwd: None,
                env: Vec::new(),
                on_complete: None,
                retry: None,
                apply_resources: None,
                depends_on: Vec::new(),
                dependents: Vec::new(),
                frozen: false,
            })),
        }
    }

    /// A process task with a fixed argument vector.
    pub fn process<N, I, S>(name: N, argv: I) -> Task
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        Self::process_with(name, move || argv.clone())
    }

    /// A process task whose argument vector is recomputed on every attempt.
    pub fn process_with<N, F>(name: N, argv: F) -> Task
    where
        N: Into<String>,
        F: FnMut() -> Vec<String> + Send + 'static,
    {
        Self::from_parts(
            name.into(),
            TaskPayload::Process {
                argv: Box::new(argv),
            },
        )
    }

    /// A process task that runs `command` through the platform shell.
    pub fn shell<N: Into<String>, C: Into<String>>(name: N, command: C) -> Task {
        let command = command.into();
        let argv = if cfg!(windows) {
            vec!["cmd".to_string(), "/C".to_string(), command]
        } else {
            vec!["sh".to_string(), "-c".to_string(), command]
        };
        Self::process(name, argv)
    }

    /// An in-process task running `call` on a worker thread.
    pub fn in_process<N, F>(name: N, call: F) -> Task
    where
        N: Into<String>,
        F: FnMut() -> i32 + Send + 'static,
    {
        Self::from_parts(
            name.into(),
            TaskPayload::InProcess {
                call: Box::new(call),
            },
        )
    }

    /// A composite task expanded by the engine once its predecessors complete.
    pub fn composite<N, F>(name: N, build: F) -> Task
    where
        N: Into<String>,
        F: FnMut() -> anyhow::Result<Vec<Task>> + Send + 'static,
    {
        Self::from_parts(
            name.into(),
            TaskPayload::Composite {
                build: Some(Box::new(build)),
            },
        )
    }

    pub fn with_resources(self, resources: ResourceSet) -> Self {
        self.inner.lock().unwrap().resources = ResourcePolicy::Fixed(resources);
        self
    }

    pub fn with_pick_resources<F>(self, pick: F) -> Self
    where
        F: FnMut(&ResourceSet) -> Option<ResourceSet> + Send + 'static,
    {
        self.inner.lock().unwrap().resources = ResourcePolicy::Flexible(Box::new(pick));
        self
    }

    /// Working directory for a process task's subprocess.
    pub fn with_current_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.inner.lock().unwrap().cwd = Some(dir.into());
        self
    }

    /// Add an environment variable to a process task's subprocess.
    pub fn with_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .env
            .push((key.into(), value.into()));
        self
    }

    /// Hook consulted with the exit code; returning `false` fails the attempt
    /// even when the exit code was zero.
    pub fn with_on_complete<F>(self, hook: F) -> Self
    where
        F: FnMut(i32) -> bool + Send + 'static,
    {
        self.inner.lock().unwrap().on_complete = Some(Box::new(hook));
        self
    }

    /// Hook consulted after a failed attempt. `None` accepts the failure;
    /// returning this task resubmits it; returning a different task replaces
    /// it in place (same graph node, inherited edges).
    pub fn with_retry<F>(self, hook: F) -> Self
    where
        F: FnMut(&TaskExecutionInfo, bool) -> Option<Task> + Send + 'static,
    {
        self.inner.lock().unwrap().retry = Some(Box::new(hook));
        self
    }

    /// Resubmit on failure up to `max_retries` extra attempts.
    pub fn with_retries(self, max_retries: u32) -> Self {
        let weak = Arc::downgrade(&self.inner);
        self.with_retry(move |info, _failed_on_complete| {
            if info.attempt_index <= max_retries {
                weak.upgrade().map(|inner| Task { inner })
            } else {
                None
            }
        })
    }

    /// Hook invoked with the admitted resources just before launch, so the
    /// task can size itself (e.g. thread count).
    pub fn with_apply_resources<F>(self, hook: F) -> Self
    where
        F: FnMut(&ResourceSet) + Send + 'static,
    {
        self.inner.lock().unwrap().apply_resources = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    /// Whether two handles refer to the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().payload,
            TaskPayload::Composite { .. }
        )
    }

    pub fn is_process(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().payload,
            TaskPayload::Process { .. }
        )
    }

    pub(crate) fn key(&self) -> TaskKey {
        TaskKey(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    pub(crate) fn memory_pool(&self) -> MemoryPool {
        match self.inner.lock().unwrap().payload {
            TaskPayload::InProcess { .. } => MemoryPool::InProcess,
            _ => MemoryPool::System,
        }
    }

    pub(crate) fn freeze(&self) {
        self.inner.lock().unwrap().frozen = true;
    }

    pub(crate) fn declared_predecessors(&self) -> Vec<Task> {
        self.inner.lock().unwrap().depends_on.clone()
    }

    pub(crate) fn declared_successors(&self) -> Vec<Task> {
        self.inner
            .lock()
            .unwrap()
            .dependents
            .iter()
            .filter_map(|weak| weak.upgrade().map(|inner| Task { inner }))
            .collect()
    }

    /// Record the edge `from -> to` on both endpoints. No-op with a warning
    /// once either endpoint has been inserted.
    pub(crate) fn link(from: &Task, to: &Task) {
        {
            let from_inner = from.inner.lock().unwrap();
            let frozen = from_inner.frozen;
            drop(from_inner);
            let to_frozen = to.inner.lock().unwrap().frozen;
            if frozen || to_frozen {
                warn!(
                    from = %from.name(),
                    to = %to.name(),
                    "dependency declared after insertion; ignoring"
                );
                return;
            }
        }
        to.inner.lock().unwrap().depends_on.push(from.clone());
        from.inner
            .lock()
            .unwrap()
            .dependents
            .push(Arc::downgrade(&to.inner));
    }

    /// Compute the argument vector for a process task. The closure is swapped
    /// out for the duration of the call so it runs without the task lock held.
    pub(crate) fn compute_argv(&self) -> Option<Vec<String>> {
        let mut argv_fn = {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.payload {
                TaskPayload::Process { argv } => {
                    std::mem::replace(argv, Box::new(Vec::new) as ArgvFn)
                }
                _ => return None,
            }
        };
        let argv = argv_fn();
        let mut inner = self.inner.lock().unwrap();
        if let TaskPayload::Process { argv: slot } = &mut inner.payload {
            *slot = argv_fn;
        }
        Some(argv)
    }

    /// Run an in-process task's callback. The closure is swapped out for the
    /// duration of the call so long callbacks do not hold the task lock.
    pub(crate) fn run_in_process(&self) -> Option<i32> {
        let mut call_fn = {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.payload {
                TaskPayload::InProcess { call } => {
                    std::mem::replace(call, Box::new(|| 0) as CallFn)
                }
                _ => return None,
            }
        };
        let code = call_fn();
        let mut inner = self.inner.lock().unwrap();
        if let TaskPayload::InProcess { call: slot } = &mut inner.payload {
            *slot = call_fn;
        }
        Some(code)
    }

    pub(crate) fn current_dir(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().cwd.clone()
    }

    pub(crate) fn env_vars(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().env.clone()
    }

    /// Take a composite's `build` closure; it is consumed by expansion.
    pub(crate) fn take_build(&self) -> Option<BuildFn> {
        match &mut self.inner.lock().unwrap().payload {
            TaskPayload::Composite { build } => build.take(),
            _ => None,
        }
    }

    /// Invoke the on-complete hook with the exit code. Defaults to `true`
    /// when no hook is installed.
    ///
    /// Public so that alternative [`crate::exec::RunnerBackend`]
    /// implementations can report completions the way the real runner does.
    pub fn invoke_on_complete(&self, exit_code: i32) -> bool {
        let hook = { self.inner.lock().unwrap().on_complete.take() };
        match hook {
            Some(mut f) => {
                let ok = f(exit_code);
                self.inner.lock().unwrap().on_complete = Some(f);
                ok
            }
            None => true,
        }
    }

    pub(crate) fn invoke_retry(
        &self,
        info: &TaskExecutionInfo,
        failed_on_complete: bool,
    ) -> Option<Task> {
        let hook = { self.inner.lock().unwrap().retry.take() };
        match hook {
            Some(mut f) => {
                let decision = f(info, failed_on_complete);
                self.inner.lock().unwrap().retry = Some(f);
                decision
            }
            None => None,
        }
    }

    pub(crate) fn invoke_apply_resources(&self, resources: &ResourceSet) {
        let hook = { self.inner.lock().unwrap().apply_resources.take() };
        if let Some(mut f) = hook {
            f(resources);
            self.inner.lock().unwrap().apply_resources = Some(f);
        }
    }

    /// The fixed resource request, if this task has one.
    pub(crate) fn fixed_request(&self) -> Option<ResourceSet> {
        match &self.inner.lock().unwrap().resources {
            ResourcePolicy::Fixed(rs) => Some(*rs),
            ResourcePolicy::Flexible(_) => None,
        }
    }

    /// Decide what this task would occupy given `available`. Fixed requests
    /// answer only when they fit; flexible ones consult their picker.
    pub(crate) fn choose_resources(&self, available: &ResourceSet) -> Option<ResourceSet> {
        if let Some(fixed) = self.fixed_request() {
            return available.checked_sub(&fixed).map(|_| fixed);
        }
        let picker = {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.resources {
                ResourcePolicy::Flexible(pick) => Some(std::mem::replace(
                    pick,
                    Box::new(|_: &ResourceSet| None) as PickResourcesFn,
                )),
                ResourcePolicy::Fixed(_) => None,
            }
        };
        let mut pick = picker?;
        let chosen = pick(available);
        let mut inner = self.inner.lock().unwrap();
        if let ResourcePolicy::Flexible(slot) = &mut inner.resources {
            *slot = pick;
        }
        chosen
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(inner) => {
                let kind = match inner.payload {
                    TaskPayload::Process { .. } => "process",
                    TaskPayload::InProcess { .. } => "in-process",
                    TaskPayload::Composite { .. } => "composite",
                };
                f.debug_struct("Task")
                    .field("name", &inner.name)
                    .field("kind", &kind)
                    .finish_non_exhaustive()
            }
            Err(_) => f.write_str("Task(<busy>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Memory;

    #[test]
    fn clones_share_identity() {
        let a = Task::in_process("a", || 0);
        let b = a.clone();
        let c = Task::in_process("a", || 0);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn link_records_both_sides_with_duplicates() {
        let a = Task::in_process("a", || 0);
        let b = Task::in_process("b", || 0);

        Task::link(&a, &b);
        Task::link(&a, &b);

        let preds = b.declared_predecessors();
        assert_eq!(preds.len(), 2);
        assert!(preds.iter().all(|p| p.ptr_eq(&a)));
        assert_eq!(a.declared_successors().len(), 2);
    }

    #[test]
    fn link_after_freeze_is_ignored() {
        let a = Task::in_process("a", || 0);
        let b = Task::in_process("b", || 0);
        a.freeze();

        Task::link(&a, &b);
        assert!(b.declared_predecessors().is_empty());
    }

    #[test]
    fn fixed_choose_resources_requires_fit() {
        let rs = ResourceSet::with(2.0, Memory::parse("1g"));
        let task = Task::in_process("t", || 0).with_resources(rs);

        let roomy = ResourceSet::with(4.0, Memory::parse("2g"));
        let tight = ResourceSet::with(1.0, Memory::parse("2g"));
        assert_eq!(task.choose_resources(&roomy), Some(rs));
        assert_eq!(task.choose_resources(&tight), None);
    }

    #[test]
    fn on_complete_defaults_to_true() {
        let plain = Task::in_process("t", || 0);
        assert!(plain.invoke_on_complete(0));

        let strict = Task::in_process("t", || 0).with_on_complete(|code| code == 0);
        assert!(strict.invoke_on_complete(0));
        assert!(!strict.invoke_on_complete(1));
    }
}
