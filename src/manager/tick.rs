// src/manager/tick.rs

//! One scheduling tick.
//!
//! Tick order is load-bearing:
//!
//! 1. promote leaves whose last live predecessor completed in an earlier tick
//! 2. harvest worker completions (status, on-complete, retry/replace)
//! 3. complete expanded composites whose produced tasks are all terminal
//! 4. expand composites whose predecessors are satisfied
//! 5. re-wire orphans whose missing predecessors have been inserted
//! 6. compute the ready set and admit what fits the envelope
//!
//! Promotion in step 1 (rather than at harvest time) means a successor is
//! never admitted in the same tick its last predecessor completed; callers
//! stepping the scheduler by hand observe the transition one tick later.

use std::time::SystemTime;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::exec::{Completion, LaunchRequest, RunOutcome, RunnerBackend};
use crate::graph::{NodeState, TaskId, TaskStatus};
use crate::scheduler::{select_tasks_to_schedule, Candidate};

use super::{SchedulerStep, TaskManager};

impl<B: RunnerBackend> TaskManager<B> {
    /// Run exactly one scheduling tick and report what happened.
    pub fn run_scheduler_once(&mut self) -> SchedulerStep {
        self.tick().0
    }

    /// The tick itself; also reports whether any state changed, which the
    /// drive loop uses for stall detection.
    pub(crate) fn tick(&mut self) -> (SchedulerStep, bool) {
        let mut changed = false;
        let mut completed = Vec::new();

        changed |= self.promote_unblocked();
        changed |= self.harvest_completions(&mut completed);
        changed |= self.complete_finished_composites(&mut completed);
        changed |= self.expand_ready_composites(&mut completed);
        changed |= self.reclassify_orphans();

        let ready = self.collect_ready();
        let admitted = self.admit(&ready);
        changed |= !admitted.is_empty();

        let step = SchedulerStep {
            ready_tasks: ready,
            tasks_to_schedule: admitted,
            running_tasks: self.running_task_ids(),
            completed_tasks: completed,
        };
        (step, changed)
    }

    /// Step 1: leaves whose live predecessors have all been cleared become
    /// ready.
    fn promote_unblocked(&mut self) -> bool {
        let mut changed = false;
        for node in self.nodes.values_mut() {
            if node.state == NodeState::PredecessorsAndUnexpanded
                && !node.is_composite
                && !node.has_live_predecessors()
            {
                debug!(id = node.task_id, task = %node.name, "no remaining predecessors; ready");
                node.state = NodeState::NoPredecessors;
                changed = true;
            }
        }
        changed
    }

    /// Step 2: drain the completion mailbox.
    fn harvest_completions(&mut self, completed: &mut Vec<TaskId>) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.completion_rx.try_recv() {
            changed |= self.process_completion(completion, completed);
        }
        changed
    }

    /// Apply one completion: derive the status, consult the retry hook, and
    /// either accept the terminal state, resubmit, or replace.
    pub(crate) fn process_completion(
        &mut self,
        completion: Completion,
        completed: &mut Vec<TaskId>,
    ) -> bool {
        let id = completion.id;
        let Some(node) = self.nodes.get(&id) else {
            debug!(id, "completion for unknown task; ignoring");
            return false;
        };
        if node.state != NodeState::Running {
            debug!(id, state = ?node.state, "completion for non-running task; ignoring");
            return false;
        }
        let task = node.task.clone();
        let name = node.name.clone();

        {
            let info = &self.infos[&id];
            if info.attempt_index != completion.attempt {
                debug!(
                    id,
                    attempt = completion.attempt,
                    current = info.attempt_index,
                    "stale completion; ignoring"
                );
                return false;
            }
        }

        self.running.remove(&id);
        self.backend.forget(id);

        let (status, consult_retry) = match completion.outcome {
            RunOutcome::Killed => (TaskStatus::FailedCommand, false),
            RunOutcome::Crashed => (TaskStatus::FailedUnknown, true),
            RunOutcome::Exited(0) if completion.on_complete_ok => (TaskStatus::Succeeded, false),
            RunOutcome::Exited(0) => (TaskStatus::FailedOnComplete, true),
            RunOutcome::Exited(_) => (TaskStatus::FailedCommand, true),
        };

        {
            let info = self.infos.get_mut(&id).expect("tracked task has info");
            info.end_date = Some(completion.end_time);
            info.set_status(status);
        }

        if status == TaskStatus::Succeeded {
            info!(id, task = %name, "task succeeded");
            self.accept_terminal(id, true, completed);
            return true;
        }
        if !consult_retry {
            info!(id, task = %name, "task was terminated");
            self.accept_terminal(id, false, completed);
            return true;
        }

        let failed_on_complete = status == TaskStatus::FailedOnComplete;
        let info_snapshot = self.infos[&id].clone();
        match task.invoke_retry(&info_snapshot, failed_on_complete) {
            None => {
                warn!(id, task = %name, status = ?status, "task failed terminally");
                self.accept_terminal(id, false, completed);
            }
            Some(next) if next.ptr_eq(&task) => {
                let next_attempt = {
                    let info = self.infos.get_mut(&id).expect("tracked task has info");
                    info.attempt_index += 1;
                    info.resources = None;
                    info.attempt_index
                };
                info!(id, task = %name, attempt = next_attempt, "resubmitting failed task");
                self.set_waiting_after_attempt(id);
            }
            Some(replacement) => {
                if self
                    .get_task_id(&replacement)
                    .is_some_and(|other| other != id)
                {
                    warn!(
                        id,
                        task = %name,
                        replacement = %replacement.name(),
                        "retry returned a task tracked elsewhere; accepting the failure"
                    );
                    self.accept_terminal(id, false, completed);
                    return true;
                }
                let next_attempt = self.infos[&id].attempt_index + 1;
                info!(
                    id,
                    task = %name,
                    replacement = %replacement.name(),
                    attempt = next_attempt,
                    "replacing failed task for the next attempt"
                );
                self.install_payload(id, &replacement, next_attempt, false);
            }
        }
        true
    }

    /// After a failed attempt, a retried node goes straight back to ready so
    /// the same tick can re-admit it.
    fn set_waiting_after_attempt(&mut self, id: TaskId) {
        let state = if self.nodes[&id].has_live_predecessors() {
            NodeState::PredecessorsAndUnexpanded
        } else {
            NodeState::NoPredecessors
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.state = state;
        }
    }

    /// Step 3: an expanded composite completes once its produced tasks (its
    /// live predecessors) are all terminal. Repeats until settled so nested
    /// composites fold up within one tick.
    fn complete_finished_composites(&mut self, completed: &mut Vec<TaskId>) -> bool {
        let mut changed = false;
        loop {
            let finished: Vec<TaskId> = self
                .nodes
                .values()
                .filter(|n| n.state == NodeState::OnlyPredecessors && !n.has_live_predecessors())
                .map(|n| n.task_id)
                .collect();
            if finished.is_empty() {
                break;
            }
            changed = true;

            for id in finished {
                let children = self.nodes[&id].children.clone();
                let mut start = None;
                let mut end = None;
                for child in &children {
                    if let Some(child_info) = self.infos.get(child) {
                        start = min_opt(start, child_info.start_date);
                        end = max_opt(end, child_info.end_date);
                    }
                }

                let info = self.infos.get_mut(&id).expect("tracked task has info");
                info.set_status(TaskStatus::Succeeded);
                info.start_date = start;
                info.end_date = end.or_else(|| Some(SystemTime::now()));
                info!(id, task = %self.nodes[&id].name, "composite completed");
                self.accept_terminal(id, true, completed);
            }
        }
        changed
    }

    /// Step 4: expand composites whose declared predecessors are satisfied.
    fn expand_ready_composites(&mut self, completed: &mut Vec<TaskId>) -> bool {
        let expandable: Vec<TaskId> = self
            .nodes
            .values()
            .filter(|n| {
                n.state == NodeState::PredecessorsAndUnexpanded
                    && n.is_composite
                    && !n.has_live_predecessors()
            })
            .map(|n| n.task_id)
            .collect();
        if expandable.is_empty() {
            return false;
        }

        for id in expandable {
            let task = self.nodes[&id].task.clone();
            let name = self.nodes[&id].name.clone();
            info!(id, task = %name, "expanding composite");
            self.infos
                .get_mut(&id)
                .expect("tracked task has info")
                .set_status(TaskStatus::Started);

            let built = match task.take_build() {
                Some(mut build) => build(),
                None => Err(anyhow!("composite '{name}' has no build step left")),
            };

            match built {
                Ok(produced) => {
                    debug!(id, task = %name, count = produced.len(), "composite produced tasks");
                    let mut failed = None;
                    for child in &produced {
                        if let Err(err) = self.insert_task(child, Some(id), true) {
                            failed = Some(err);
                            break;
                        }
                    }
                    match failed {
                        None => {
                            if let Some(node) = self.nodes.get_mut(&id) {
                                node.state = NodeState::OnlyPredecessors;
                            }
                        }
                        Some(err) => {
                            warn!(id, task = %name, error = %err, "inserting produced tasks failed");
                            self.fail_expansion(id, completed);
                        }
                    }
                }
                Err(err) => {
                    warn!(id, task = %name, error = %err, "composite build failed");
                    self.fail_expansion(id, completed);
                }
            }
        }
        true
    }

    /// A failed expansion completes the composite with `FailedGetTasks`; its
    /// successors stay blocked on it forever.
    fn fail_expansion(&mut self, id: TaskId, completed: &mut Vec<TaskId>) {
        let info = self.infos.get_mut(&id).expect("tracked task has info");
        info.set_status(TaskStatus::FailedGetTasks);
        info.end_date = Some(SystemTime::now());
        self.accept_terminal(id, false, completed);
    }

    /// Step 5: orphans whose declared predecessors are now all tracked get
    /// wired and reclassified.
    fn reclassify_orphans(&mut self) -> bool {
        let orphans: Vec<TaskId> = self
            .nodes
            .values()
            .filter(|n| n.state == NodeState::Orphan)
            .map(|n| n.task_id)
            .collect();

        let mut changed = false;
        for id in orphans {
            let declared = self.nodes[&id].task.declared_predecessors();
            let resolved: Option<Vec<TaskId>> = declared
                .iter()
                .map(|p| self.ids.get_by_left(&p.key()).copied())
                .collect();
            let Some(pred_ids) = resolved else {
                continue;
            };
            changed = true;

            let mut wired = Vec::new();
            for pid in pred_ids {
                if self.predecessor_satisfied(pid) {
                    continue;
                }
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.add_predecessor(pid);
                }
                wired.push(pid);
            }
            for pid in wired {
                if let Some(pred) = self.nodes.get_mut(&pid) {
                    pred.successors.push(id);
                }
            }

            let state = if self.nodes[&id].is_composite || self.nodes[&id].has_live_predecessors()
            {
                NodeState::PredecessorsAndUnexpanded
            } else {
                NodeState::NoPredecessors
            };
            debug!(id, task = %self.nodes[&id].name, state = ?state, "orphan resolved");
            self.set_node_state(id, state);
        }
        changed
    }

    /// Step 6a: the ready set, in insertion order.
    fn collect_ready(&self) -> Vec<TaskId> {
        self.nodes
            .values()
            .filter(|n| n.state == NodeState::NoPredecessors && !n.is_composite)
            .map(|n| n.task_id)
            .collect()
    }

    /// Step 6b: admit what fits and hand it to the runner.
    fn admit(&mut self, ready: &[TaskId]) -> Vec<TaskId> {
        if ready.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<Candidate> = ready
            .iter()
            .map(|&id| Candidate {
                id,
                task: self.nodes[&id].task.clone(),
            })
            .collect();
        let available = self.available_resources();
        let admissions = select_tasks_to_schedule(&candidates, available, &self.envelope);

        let now = SystemTime::now();
        let mut admitted = Vec::new();
        for admission in admissions {
            let id = admission.id;
            let task = self.nodes[&id].task.clone();
            let name = self.nodes[&id].name.clone();

            let (script_path, log_path) = self.attempt_paths(id, &name, &task);
            let attempt = {
                let info = self.infos.get_mut(&id).expect("tracked task has info");
                info.set_status(TaskStatus::Started);
                info.start_date = Some(now);
                info.end_date = None;
                info.resources = Some(admission.resources);
                info.script_path = script_path.clone();
                info.log_path = log_path.clone();
                info.attempt_index
            };

            task.invoke_apply_resources(&admission.resources);

            if let Some(node) = self.nodes.get_mut(&id) {
                node.state = NodeState::Running;
            }
            self.running.insert(id, (admission.resources, admission.pool));

            info!(
                id,
                task = %name,
                attempt,
                resources = %admission.resources,
                "task admitted"
            );
            self.backend.launch(LaunchRequest {
                id,
                attempt,
                task,
                resources: admission.resources,
                script_path,
                log_path,
            });
            admitted.push(id);
        }
        admitted
    }

    /// Per-attempt script/log paths under the log directory, if enabled.
    fn attempt_paths(
        &self,
        id: TaskId,
        name: &str,
        task: &crate::task::Task,
    ) -> (Option<std::path::PathBuf>, Option<std::path::PathBuf>) {
        let Some(dir) = &self.log_dir else {
            return (None, None);
        };
        if !task.is_process() {
            return (None, None);
        }
        let attempt = self.infos[&id].attempt_index;
        let safe_name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let base = format!("{safe_name}.{id}.{attempt}");
        (
            Some(dir.join(format!("{base}.sh"))),
            Some(dir.join(format!("{base}.log"))),
        )
    }
}

fn min_opt(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn max_opt(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}
