#![allow(dead_code)]

use rundag::{Cores, Memory, ResourceSet, Task, TaskManagerResources};

/// An in-process task that immediately returns the given exit code.
pub fn exit_task(name: &str, code: i32) -> Task {
    Task::in_process(name, move || code)
}

/// An envelope with the same memory amount in both pools.
pub fn envelope(cores: f64, memory: &str) -> TaskManagerResources {
    TaskManagerResources::new(Cores(cores), Memory::parse(memory), Memory::parse(memory))
}

/// A fixed resource request.
pub fn fixed(cores: f64, memory: &str) -> ResourceSet {
    ResourceSet::with(cores, Memory::parse(memory))
}
