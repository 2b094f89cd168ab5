// src/manager/mod.rs

//! The task manager: owns the graph and drives it to completion.
//!
//! The manager is a single-threaded control plane. All graph, node, info and
//! resource-counter mutation happens on the caller's thread inside
//! [`TaskManager::run_scheduler_once`]; the only cross-thread state is the
//! completion mailbox fed by the runner's workers.
//!
//! The per-tick procedure lives in [`tick`]; this module holds the state,
//! task insertion (with cycle detection), replacement/resubmission, queries
//! and the top-level [`TaskManager::run_all_tasks`] drive loop.

mod tick;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bimap::BiMap;
use crate::errors::{Result, RundagError};
use crate::exec::{
    completion_channel, CompletionReceiver, RunnerBackend, TokioRunner,
};
use crate::graph::{GraphNode, NodeState, TaskExecutionInfo, TaskId, TaskStatus};
use crate::resources::{Cores, Memory, MemoryPool, ResourceSet, TaskManagerResources};
use crate::task::Task;

/// How long termination waits for workers to confirm before force-marking.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Report of what a single scheduling tick did.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that were ready at the start of admission, insertion order.
    pub ready_tasks: Vec<TaskId>,
    /// Tasks admitted and handed to the runner this tick.
    pub tasks_to_schedule: Vec<TaskId>,
    /// Tasks running after this tick's admissions.
    pub running_tasks: Vec<TaskId>,
    /// Tasks that reached a terminal node state this tick.
    pub completed_tasks: Vec<TaskId>,
}

/// Final tally returned by [`TaskManager::run_all_tasks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks whose node never reached a terminal state (blocked or unrun).
    pub incomplete: usize,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.incomplete == 0
    }
}

/// Top-level driver: graph arena, admission, retries, timestamps.
pub struct TaskManager<B: RunnerBackend = TokioRunner> {
    envelope: TaskManagerResources,
    backend: B,
    completion_rx: CompletionReceiver,
    /// Node arena keyed by dense id; iteration order is insertion order.
    nodes: BTreeMap<TaskId, GraphNode>,
    infos: BTreeMap<TaskId, TaskExecutionInfo>,
    ids: BiMap<crate::task::TaskKey, TaskId>,
    next_id: TaskId,
    /// Resources held by RUNNING leaves.
    running: HashMap<TaskId, (ResourceSet, MemoryPool)>,
    log_dir: Option<PathBuf>,
}

impl TaskManager<TokioRunner> {
    /// A manager with the production runner backend.
    pub fn new(envelope: TaskManagerResources) -> Self {
        let (tx, rx) = completion_channel();
        Self::with_backend(envelope, TokioRunner::new(tx), rx)
    }
}

impl<B: RunnerBackend> TaskManager<B> {
    /// A manager with a caller-provided backend (tests drive completions by
    /// hand through the paired channel).
    pub fn with_backend(
        envelope: TaskManagerResources,
        backend: B,
        completion_rx: CompletionReceiver,
    ) -> Self {
        Self {
            envelope,
            backend,
            completion_rx,
            nodes: BTreeMap::new(),
            infos: BTreeMap::new(),
            ids: BiMap::new(),
            next_id: 0,
            running: HashMap::new(),
            log_dir: None,
        }
    }

    /// Capture process task output under this directory.
    pub fn set_log_dir(&mut self, dir: impl Into<PathBuf>) {
        self.log_dir = Some(dir.into());
    }

    pub fn envelope(&self) -> &TaskManagerResources {
        &self.envelope
    }

    /// Insert a task. With `ignore_exists`, re-inserting the same task hands
    /// back its existing id; otherwise it is an error.
    pub fn add_task(&mut self, task: &Task, ignore_exists: bool) -> Result<TaskId> {
        self.insert_task(task, None, ignore_exists)
    }

    /// Insert a sequence of tasks, in order.
    pub fn add_tasks(&mut self, tasks: &[Task], ignore_exists: bool) -> Result<Vec<TaskId>> {
        tasks
            .iter()
            .map(|t| self.insert_task(t, None, ignore_exists))
            .collect()
    }

    /// Insert a task produced under `parent` (a tracked composite). The task
    /// becomes a live predecessor of the parent, so the parent completes only
    /// after it does.
    pub fn add_task_with_parent(
        &mut self,
        task: &Task,
        parent: &Task,
        ignore_exists: bool,
    ) -> Result<TaskId> {
        let parent_id = self
            .get_task_id(parent)
            .ok_or_else(|| RundagError::UnknownTask(parent.name()))?;
        self.insert_task(task, Some(parent_id), ignore_exists)
    }

    pub(crate) fn insert_task(
        &mut self,
        task: &Task,
        parent: Option<TaskId>,
        ignore_exists: bool,
    ) -> Result<TaskId> {
        if let Some(&existing) = self.ids.get_by_left(&task.key()) {
            if ignore_exists {
                debug!(id = existing, task = %task.name(), "task already tracked");
                return Ok(existing);
            }
            return Err(RundagError::DuplicateTask(task.name()));
        }

        let declared_preds = task.declared_predecessors();
        let declared_succs = task.declared_successors();

        if declared_preds.iter().chain(declared_succs.iter()).any(|t| t.ptr_eq(task)) {
            return Err(RundagError::DagCycle(format!(
                "task '{}' depends on itself",
                task.name()
            )));
        }

        // Resolve the endpoints that are already tracked. A declared
        // predecessor that is not tracked makes the new node an orphan; its
        // edges are wired later, when the predecessor shows up.
        let resolved_preds: Vec<Option<TaskId>> = declared_preds
            .iter()
            .map(|p| self.ids.get_by_left(&p.key()).copied())
            .collect();
        let tracked_preds: Vec<TaskId> = resolved_preds.iter().flatten().copied().collect();
        let orphan = resolved_preds.iter().any(Option::is_none);

        let mut tracked_succs: Vec<TaskId> = declared_succs
            .iter()
            .filter_map(|s| self.ids.get_by_left(&s.key()).copied())
            .collect();
        if let Some(pid) = parent {
            tracked_succs.push(pid);
        }

        let id = self.next_id;
        self.check_acyclic(id, &tracked_preds, &tracked_succs)?;
        self.next_id += 1;

        task.freeze();
        let info = TaskExecutionInfo::new(id, task.clone(), parent);
        let mut node = GraphNode::new(id, task.clone(), NodeState::Orphan, parent);

        let mut wired_preds: Vec<TaskId> = Vec::new();
        if !orphan {
            for pid in resolved_preds.into_iter().flatten() {
                if self.predecessor_satisfied(pid) {
                    continue;
                }
                node.add_predecessor(pid);
                wired_preds.push(pid);
            }
        }

        node.state = if orphan {
            NodeState::Orphan
        } else if node.is_composite || node.has_live_predecessors() {
            NodeState::PredecessorsAndUnexpanded
        } else {
            NodeState::NoPredecessors
        };

        debug!(
            id,
            task = %node.name,
            state = ?node.state,
            composite = node.is_composite,
            "task inserted"
        );

        self.nodes.insert(id, node);
        self.infos.insert(id, info);
        self.ids.insert(task.key(), id);

        for pid in wired_preds {
            if let Some(pred) = self.nodes.get_mut(&pid) {
                pred.successors.push(id);
            }
        }

        if let Some(pid) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&pid) {
                parent_node.children.push(id);
                parent_node.add_predecessor(id);
            }
            if let Some(child) = self.nodes.get_mut(&id) {
                child.successors.push(pid);
            }
        }

        Ok(id)
    }

    /// Whether a tracked predecessor already counts as satisfied (completed
    /// with a success status). Failed-terminal predecessors are *not*
    /// satisfied; depending on them blocks forever.
    fn predecessor_satisfied(&self, id: TaskId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        node.state == NodeState::Completed
            && self
                .infos
                .get(&id)
                .map(|i| i.status.is_done(false))
                .unwrap_or(false)
    }

    /// Fail with `DagCycle` if inserting `new_id` with the given edges would
    /// close a cycle. Pending orphan edges are included since they will
    /// materialise once their endpoints are tracked.
    fn check_acyclic(
        &self,
        new_id: TaskId,
        new_preds: &[TaskId],
        new_succs: &[TaskId],
    ) -> Result<()> {
        let mut graph: DiGraphMap<TaskId, ()> = DiGraphMap::new();

        for (&id, node) in &self.nodes {
            graph.add_node(id);
            for &sid in &node.successors {
                graph.add_edge(id, sid, ());
            }
            if node.state == NodeState::Orphan {
                for pred in node.task.declared_predecessors() {
                    if let Some(&pid) = self.ids.get_by_left(&pred.key()) {
                        graph.add_edge(pid, id, ());
                    }
                }
            }
        }

        graph.add_node(new_id);
        for &pid in new_preds {
            graph.add_edge(pid, new_id, ());
        }
        for &sid in new_succs {
            graph.add_edge(new_id, sid, ());
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(RundagError::DagCycle(format!(
                "adding this task would close a cycle through task id {}",
                cycle.node_id()
            ))),
        }
    }

    /// Swap a tracked, non-running task's payload for `replacement`, keeping
    /// the node (id, edges) and resetting status and attempt tracking.
    pub fn replace_task(&mut self, original: &Task, replacement: &Task) -> bool {
        let Some(&id) = self.ids.get_by_left(&original.key()) else {
            return false;
        };
        if self.nodes.get(&id).map(|n| n.state) == Some(NodeState::Running) {
            warn!(id, "cannot replace a running task");
            return false;
        }
        if self
            .ids
            .get_by_left(&replacement.key())
            .is_some_and(|&other| other != id)
        {
            warn!(id, replacement = %replacement.name(), "replacement is already tracked elsewhere");
            return false;
        }
        info!(
            id,
            from = %original.name(),
            to = %replacement.name(),
            "replacing task"
        );
        self.install_payload(id, replacement, 1, true);
        true
    }

    /// Reset a tracked, non-running task for a fresh run with the same task
    /// object. Intended for tasks whose retry hooks mutate internal fields.
    pub fn resubmit_task(&mut self, task: &Task) -> bool {
        let Some(&id) = self.ids.get_by_left(&task.key()) else {
            return false;
        };
        if self.nodes.get(&id).map(|n| n.state) == Some(NodeState::Running) {
            warn!(id, "cannot resubmit a running task");
            return false;
        }
        info!(id, task = %task.name(), "resubmitting task");
        let info = self.infos.get_mut(&id).expect("tracked task has info");
        info.attempt_index = 1;
        info.set_status(TaskStatus::Unknown);
        info.resources = None;
        info.start_date = None;
        info.end_date = None;
        let state = self.waiting_state(id);
        self.set_node_state(id, state);
        true
    }

    /// Record a task as successful without running it. Refused for running
    /// or already-completed tasks.
    pub fn mark_manually_succeeded(&mut self, id: TaskId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if matches!(node.state, NodeState::Running | NodeState::Completed) {
            return false;
        }
        info!(id, task = %node.name, "manually marking task succeeded");
        let info = self.infos.get_mut(&id).expect("tracked task has info");
        info.set_status(TaskStatus::ManuallySucceeded);
        info.end_date = Some(SystemTime::now());
        let mut completed = Vec::new();
        self.accept_terminal(id, true, &mut completed);
        true
    }

    /// Install `replacement` as the payload of node `id`.
    ///
    /// `reset_status` distinguishes the public replace operation (fresh
    /// status, attempt 1) from a retry-driven replacement (attempt counting
    /// continues and the failed status stays observable).
    pub(crate) fn install_payload(
        &mut self,
        id: TaskId,
        replacement: &Task,
        attempt_index: u32,
        reset_status: bool,
    ) {
        replacement.freeze();
        self.ids.insert(replacement.key(), id);

        let prior_state = self.nodes.get(&id).map(|n| n.state);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.task = replacement.clone();
            node.name = replacement.name();
            node.is_composite = replacement.is_composite();
        }
        if let Some(info) = self.infos.get_mut(&id) {
            info.task = replacement.clone();
            info.name = replacement.name();
            info.attempt_index = attempt_index;
            info.resources = None;
            if reset_status {
                info.set_status(TaskStatus::Unknown);
                info.start_date = None;
                info.end_date = None;
            }
        }

        // An orphan stays an orphan; reclassification will pick up the
        // replacement's declared predecessors.
        let state = if prior_state == Some(NodeState::Orphan) {
            NodeState::Orphan
        } else {
            self.waiting_state(id)
        };
        self.set_node_state(id, state);
    }

    /// The non-running state a node belongs in given its payload and live
    /// predecessors.
    fn waiting_state(&self, id: TaskId) -> NodeState {
        let node = &self.nodes[&id];
        if node.is_composite || node.has_live_predecessors() {
            NodeState::PredecessorsAndUnexpanded
        } else {
            NodeState::NoPredecessors
        }
    }

    fn set_node_state(&mut self, id: TaskId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.state = state;
        }
    }

    /// Mark a node terminal. Successors' live-predecessor multisets are
    /// decremented only on success; failed tasks leave their successors
    /// blocked.
    pub(crate) fn accept_terminal(
        &mut self,
        id: TaskId,
        success: bool,
        completed: &mut Vec<TaskId>,
    ) {
        let successors = match self.nodes.get_mut(&id) {
            Some(node) => {
                node.state = NodeState::Completed;
                node.successors.clone()
            }
            None => return,
        };
        completed.push(id);

        if success {
            for sid in successors {
                if let Some(succ) = self.nodes.get_mut(&sid) {
                    succ.remove_predecessor(id);
                }
            }
        } else {
            debug!(id, "task finished failed; successors remain blocked");
        }
    }

    // --- queries ------------------------------------------------------

    pub fn get_task_id(&self, task: &Task) -> Option<TaskId> {
        self.ids.get_by_left(&task.key()).copied()
    }

    pub fn get_task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.infos.get(&id).map(|i| i.status)
    }

    pub fn get_task_status_of(&self, task: &Task) -> Option<TaskStatus> {
        self.get_task_status(self.get_task_id(task)?)
    }

    pub fn get_graph_node_state(&self, id: TaskId) -> Option<NodeState> {
        self.nodes.get(&id).map(|n| n.state)
    }

    pub fn get_graph_node_state_of(&self, task: &Task) -> Option<NodeState> {
        self.get_graph_node_state(self.get_task_id(task)?)
    }

    pub fn get_task_execution_info(&self, id: TaskId) -> Option<&TaskExecutionInfo> {
        self.infos.get(&id)
    }

    pub fn get_task_execution_info_of(&self, task: &Task) -> Option<&TaskExecutionInfo> {
        self.get_task_execution_info(self.get_task_id(task)?)
    }

    pub fn get_graph_node(&self, id: TaskId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn get_graph_node_of(&self, task: &Task) -> Option<&GraphNode> {
        self.get_graph_node(self.get_task_id(task)?)
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.nodes.keys().copied().collect()
    }

    pub fn task_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn running_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.running.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Tasks whose status counts as done under the given failure policy.
    pub fn completed_tasks(&self, failed_is_done: bool) -> Vec<TaskId> {
        self.infos
            .iter()
            .filter(|(_, info)| info.status.is_done(failed_is_done))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn is_all_completed(&self) -> bool {
        self.nodes.values().all(|n| n.state == NodeState::Completed)
    }

    /// What is left of the envelope after subtracting everything running.
    pub fn available_resources(&self) -> TaskManagerResources {
        let mut available = self.envelope;
        for (rs, pool) in self.running.values() {
            match available.checked_sub(rs, *pool) {
                Some(remaining) => available = remaining,
                None => {
                    warn!("running tasks exceed the envelope; treating it as exhausted");
                    return TaskManagerResources::new(Cores::none(), Memory::none(), Memory::none());
                }
            }
        }
        available
    }

    // --- drive loop ---------------------------------------------------

    /// Run ticks until every task is terminal, progress stalls, or the
    /// timeout expires. On return no leaf is still running: anything left is
    /// terminated and recorded as failed.
    pub async fn run_all_tasks(
        &mut self,
        sleep: Duration,
        timeout: Option<Duration>,
    ) -> RunSummary {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let (step, changed) = self.tick();

            if self.is_all_completed() {
                info!("all tasks reached a terminal state");
                break;
            }
            if !changed && step.running_tasks.is_empty() {
                warn!(
                    incomplete = self.nodes.len() - step.completed_tasks.len(),
                    "nothing running and no further progress possible; stopping"
                );
                break;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    warn!("run timed out; terminating remaining tasks");
                    break;
                }
            }

            tokio::time::sleep(sleep).await;
        }

        self.terminate_running_tasks().await;

        let summary = self.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            incomplete = summary.incomplete,
            "run finished"
        );
        summary
    }

    /// Terminate every RUNNING leaf: signal cancellation, give workers a
    /// short grace period to confirm, then force-record the rest as failed.
    pub async fn terminate_running_tasks(&mut self) {
        if self.running.is_empty() {
            return;
        }
        warn!(count = self.running.len(), "terminating running tasks");
        self.backend.cancel_all();

        let deadline = Instant::now() + TERMINATION_GRACE;
        let mut completed = Vec::new();
        while !self.running.is_empty() && Instant::now() < deadline {
            while let Ok(c) = self.completion_rx.try_recv() {
                self.process_completion(c, &mut completed);
            }
            if self.running.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let leftovers: Vec<TaskId> = self.running.keys().copied().collect();
        for id in leftovers {
            warn!(id, "task did not confirm termination; recording as failed");
            self.running.remove(&id);
            self.backend.forget(id);
            if let Some(info) = self.infos.get_mut(&id) {
                info.set_status(TaskStatus::FailedCommand);
                info.end_date = Some(SystemTime::now());
            }
            self.accept_terminal(id, false, &mut completed);
        }
    }

    /// Tally final states.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.infos.len(),
            succeeded: 0,
            failed: 0,
            incomplete: 0,
        };
        for (id, info) in &self.infos {
            let terminal = self.nodes.get(id).map(|n| n.state) == Some(NodeState::Completed);
            if !terminal {
                summary.incomplete += 1;
            } else if info.status.is_failed() {
                summary.failed += 1;
            } else {
                summary.succeeded += 1;
            }
        }
        summary
    }
}
