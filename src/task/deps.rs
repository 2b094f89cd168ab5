// src/task/deps.rs

//! Dependency declaration between tasks, before insertion.
//!
//! Edges live on the task handles themselves and are read by the manager when
//! a task is inserted:
//!
//! ```
//! use rundag::task::Task;
//!
//! let a = Task::shell("a", "true");
//! let b = Task::shell("b", "true");
//! let c = Task::shell("c", "true");
//! let d = Task::shell("d", "true");
//!
//! a.then(&b);                      // b waits for a
//! a.and(&b).then(&c);              // fan-in: c waits for a and b
//! a.then_all(&[&c, &d]);           // fan-out: c and d wait for a
//! ```

use super::Task;

impl Task {
    /// Declare that `next` depends on this task. Returns `next` so chains
    /// read left to right: `a.then(&b).then(&c)`.
    pub fn then(&self, next: &Task) -> Task {
        Task::link(self, next);
        next.clone()
    }

    /// Group this task with another for a fan-in declaration.
    pub fn and(&self, other: &Task) -> TaskGroup {
        TaskGroup {
            members: vec![self.clone(), other.clone()],
        }
    }

    /// Declare that every task in `nexts` depends on this task.
    pub fn then_all(&self, nexts: &[&Task]) -> TaskGroup {
        let mut members = Vec::with_capacity(nexts.len());
        for next in nexts {
            Task::link(self, next);
            members.push((*next).clone());
        }
        TaskGroup { members }
    }
}

/// A set of tasks treated as one endpoint of a dependency declaration.
#[derive(Clone)]
pub struct TaskGroup {
    members: Vec<Task>,
}

impl TaskGroup {
    pub fn of(tasks: &[&Task]) -> Self {
        Self {
            members: tasks.iter().map(|t| (*t).clone()).collect(),
        }
    }

    pub fn and(mut self, task: &Task) -> Self {
        self.members.push(task.clone());
        self
    }

    /// Declare that `next` depends on every member of the group.
    pub fn then(&self, next: &Task) -> Task {
        for member in &self.members {
            Task::link(member, next);
        }
        next.clone()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Task {
        Task::in_process(name, || 0)
    }

    #[test]
    fn then_chains_left_to_right() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");

        a.then(&b).then(&c);

        assert!(b.declared_predecessors()[0].ptr_eq(&a));
        assert!(c.declared_predecessors()[0].ptr_eq(&b));
        assert!(a.declared_predecessors().is_empty());
    }

    #[test]
    fn fan_in_declares_one_edge_per_member() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");

        a.and(&b).then(&c);

        let preds = c.declared_predecessors();
        assert_eq!(preds.len(), 2);
        assert!(preds[0].ptr_eq(&a));
        assert!(preds[1].ptr_eq(&b));
    }

    #[test]
    fn fan_out_declares_one_edge_per_target() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");

        a.then_all(&[&b, &c]);

        assert!(b.declared_predecessors()[0].ptr_eq(&a));
        assert!(c.declared_predecessors()[0].ptr_eq(&a));
        assert_eq!(a.declared_successors().len(), 2);
    }
}
