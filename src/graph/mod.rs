// src/graph/mod.rs

//! The task graph's per-node scheduling records.
//!
//! - [`GraphNode`] wraps a task with its state and predecessor bookkeeping.
//! - [`task_info`] holds the per-task execution record.
//!
//! Nodes reference each other only by [`TaskId`]; the arena of nodes lives in
//! the manager, and tasks themselves hold no references into the graph. This
//! keeps the payload swappable (replacement keeps the node, changes the task).

pub mod node;
pub mod task_info;

pub use node::{GraphNode, NodeState};
pub use task_info::{TaskExecutionInfo, TaskStatus};

/// Dense, strictly increasing identifier assigned to tasks on insertion.
pub type TaskId = u64;
