// src/lib.rs

pub mod bimap;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod manager;
pub mod resources;
pub mod scheduler;
pub mod task;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::errors::Result;

pub use crate::graph::{NodeState, TaskExecutionInfo, TaskId, TaskStatus};
pub use crate::manager::{RunSummary, SchedulerStep, TaskManager};
pub use crate::resources::{Cores, Memory, MemoryPool, ResourceSet, TaskManagerResources};
pub use crate::task::{Task, TaskGroup};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - task construction and dependency wiring
/// - the task manager and its runner
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let cfg = config::load_and_validate(Path::new(&args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(RunSummary {
            total: cfg.task.len(),
            succeeded: 0,
            failed: 0,
            incomplete: cfg.task.len(),
        });
    }

    let tasks = build_workflow(&cfg);
    let mut manager = TaskManager::new(cfg.resources.envelope());
    if let Some(dir) = &args.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {dir}"))?;
        manager.set_log_dir(dir);
    }
    manager.add_tasks(&tasks, true)?;

    let sleep = Duration::from_millis(args.sleep_ms.unwrap_or(cfg.run.sleep_ms));
    let timeout = args
        .timeout_secs
        .or(cfg.run.timeout_secs)
        .map(Duration::from_secs);

    info!(
        tasks = manager.task_count(),
        envelope = ?manager.envelope(),
        "starting workflow"
    );

    // Ctrl-C wins the race; the unfinished run loop is dropped and running
    // tasks are terminated explicitly below.
    let finished = tokio::select! {
        summary = manager.run_all_tasks(sleep, timeout) => Some(summary),
        _ = tokio::signal::ctrl_c() => None,
    };

    let summary = match finished {
        Some(summary) => summary,
        None => {
            info!("stop signal received; terminating running tasks");
            manager.terminate_running_tasks().await;
            manager.summary()
        }
    };
    Ok(summary)
}

/// Build the task handles and dependency edges declared by the config.
fn build_workflow(cfg: &ConfigFile) -> Vec<Task> {
    let mut by_name: BTreeMap<&str, Task> = BTreeMap::new();

    for (name, tc) in cfg.task.iter() {
        let memory = tc
            .memory
            .as_deref()
            .map(Memory::parse)
            .unwrap_or_else(Memory::none);
        let mut task = Task::shell(name.clone(), tc.cmd.clone())
            .with_resources(ResourceSet::with(tc.cores, memory));
        if tc.retries > 0 {
            task = task.with_retries(tc.retries);
        }
        by_name.insert(name.as_str(), task);
    }

    for (name, tc) in cfg.task.iter() {
        for dep in &tc.after {
            if let (Some(pred), Some(succ)) = (by_name.get(dep.as_str()), by_name.get(name.as_str()))
            {
                pred.then(succ);
            }
        }
    }

    by_name.into_values().collect()
}

/// Simple dry-run output: print the envelope, tasks, deps and commands.
fn print_dry_run(cfg: &ConfigFile) {
    println!("rundag dry-run");
    println!(
        "  resources: cores={} memory={} in_process_memory={}",
        cfg.resources.cores, cfg.resources.memory, cfg.resources.in_process_memory
    );
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        println!("      cores: {}", task.cores);
        if let Some(memory) = &task.memory {
            println!("      memory: {memory}");
        }
        if task.retries > 0 {
            println!("      retries: {}", task.retries);
        }
    }
}
