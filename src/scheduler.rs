// src/scheduler.rs

//! Resource-constrained admission.
//!
//! Each tick the manager hands the scheduler the ready tasks (insertion
//! order) and what is left of the envelope; the scheduler greedily admits the
//! prefix-fitting subset. There is no priority and no reordering: a task that
//! does not fit right now is simply deferred to a later tick.

use tracing::{debug, warn};

use crate::graph::TaskId;
use crate::resources::{MemoryPool, ResourceSet, TaskManagerResources};
use crate::task::Task;

/// A ready task offered for admission.
pub struct Candidate {
    pub id: TaskId,
    pub task: Task,
}

/// An admission decision: run this task with exactly these resources.
#[derive(Debug, Clone)]
pub struct Admission {
    pub id: TaskId,
    pub resources: ResourceSet,
    pub pool: MemoryPool,
}

/// Pick the tasks to admit this tick.
///
/// Greedy in insertion order: fixed requests are admitted whenever they fit
/// in what remains; flexible tasks are asked to pick a size from what remains
/// and may decline. Admitted resources are deducted before considering the
/// next candidate.
///
/// A fixed request that does not fit the *whole* envelope can never be
/// admitted; it is logged and left ready so that a replacement with a smaller
/// request can rescue it.
pub fn select_tasks_to_schedule(
    ready: &[Candidate],
    mut available: TaskManagerResources,
    envelope: &TaskManagerResources,
) -> Vec<Admission> {
    let mut admissions = Vec::new();

    for candidate in ready {
        let pool = candidate.task.memory_pool();

        if let Some(fixed) = candidate.task.fixed_request() {
            if envelope.checked_sub(&fixed, pool).is_none() {
                warn!(
                    id = candidate.id,
                    task = %candidate.task.name(),
                    request = %fixed,
                    "task requests more than the total envelope; it will never be admitted"
                );
                continue;
            }
        }

        let view = available.view(pool);
        let chosen = match candidate.task.choose_resources(&view) {
            Some(rs) => rs,
            None => continue,
        };

        match available.checked_sub(&chosen, pool) {
            Some(remaining) => {
                debug!(
                    id = candidate.id,
                    task = %candidate.task.name(),
                    resources = %chosen,
                    "admitting task"
                );
                available = remaining;
                admissions.push(Admission {
                    id: candidate.id,
                    resources: chosen,
                    pool,
                });
            }
            None => {
                // A flexible picker chose more than what it was shown.
                warn!(
                    id = candidate.id,
                    task = %candidate.task.name(),
                    chosen = %chosen,
                    "picked resources exceed what is available; deferring"
                );
            }
        }
    }

    admissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Cores, Memory};

    fn envelope(cores: f64, memory: &str) -> TaskManagerResources {
        TaskManagerResources::new(Cores(cores), Memory::parse(memory), Memory::parse(memory))
    }

    fn fixed(id: TaskId, cores: f64, memory: &str) -> Candidate {
        Candidate {
            id,
            task: Task::in_process("t", || 0)
                .with_resources(ResourceSet::with(cores, Memory::parse(memory))),
        }
    }

    #[test]
    fn admits_in_insertion_order_until_full() {
        let env = envelope(4.0, "4g");
        let ready = vec![
            fixed(0, 2.0, "1g"),
            fixed(1, 2.0, "1g"),
            fixed(2, 2.0, "1g"),
        ];

        let admitted = select_tasks_to_schedule(&ready, env, &env);
        let ids: Vec<TaskId> = admitted.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn later_smaller_task_fills_the_gap() {
        let env = envelope(4.0, "4g");
        let ready = vec![
            fixed(0, 3.0, "1g"),
            fixed(1, 3.0, "1g"),
            fixed(2, 1.0, "1g"),
        ];

        let admitted = select_tasks_to_schedule(&ready, env, &env);
        let ids: Vec<TaskId> = admitted.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn over_envelope_requests_are_never_admitted() {
        let env = envelope(1.0, "1g");
        let ready = vec![fixed(0, 1.0, "2g"), fixed(1, 1.0, "1g")];

        let admitted = select_tasks_to_schedule(&ready, env, &env);
        let ids: Vec<TaskId> = admitted.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn request_equal_to_envelope_is_admissible_when_idle() {
        let env = envelope(2.0, "2g");
        let ready = vec![fixed(0, 2.0, "2g")];
        let admitted = select_tasks_to_schedule(&ready, env, &env);
        assert_eq!(admitted.len(), 1);

        // But not when anything else already holds part of the envelope.
        let partly_used = env
            .checked_sub(
                &ResourceSet::with(1.0, Memory::parse("1g")),
                MemoryPool::InProcess,
            )
            .unwrap();
        let admitted = select_tasks_to_schedule(&ready, partly_used, &env);
        assert!(admitted.is_empty());
    }

    #[test]
    fn flexible_tasks_pick_from_what_remains() {
        let env = envelope(4.0, "4g");
        let pick_widest = |available: &ResourceSet| {
            (1..=8)
                .rev()
                .map(|c| ResourceSet::with(c as f64, Memory::none()))
                .find(|rs| available.checked_sub(rs).is_some())
        };
        let ready = vec![
            Candidate {
                id: 0,
                task: Task::in_process("w0", || 0).with_pick_resources(pick_widest),
            },
            Candidate {
                id: 1,
                task: Task::in_process("w1", || 0).with_pick_resources(pick_widest),
            },
        ];

        let admitted = select_tasks_to_schedule(&ready, env, &env);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].id, 0);
        assert_eq!(admitted[0].resources.cores, Cores(4.0));
    }
}
