// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RundagError};
use crate::resources::Memory;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RundagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.resources, raw.run, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_envelope(cfg)?;
    validate_task_requests(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(RundagError::InvalidWorkflow(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_envelope(cfg: &RawConfigFile) -> Result<()> {
    if cfg.resources.cores <= 0.0 {
        return Err(RundagError::InvalidWorkflow(format!(
            "[resources].cores must be > 0 (got {})",
            cfg.resources.cores
        )));
    }
    for (field, value) in [
        ("memory", &cfg.resources.memory),
        ("in_process_memory", &cfg.resources.in_process_memory),
    ] {
        if !Memory::parse(value).is_valid() {
            return Err(RundagError::InvalidWorkflow(format!(
                "[resources].{field} is not a valid memory amount: '{value}'"
            )));
        }
    }
    Ok(())
}

fn validate_task_requests(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.cores < 0.0 {
            return Err(RundagError::InvalidWorkflow(format!(
                "task '{}' has negative cores ({})",
                name, task.cores
            )));
        }
        if task.cores > cfg.resources.cores {
            return Err(RundagError::InvalidWorkflow(format!(
                "task '{}' requests {} cores but the envelope only has {}",
                name, task.cores, cfg.resources.cores
            )));
        }
        if let Some(memory) = &task.memory {
            if !Memory::parse(memory).is_valid() {
                return Err(RundagError::InvalidWorkflow(format!(
                    "task '{}' has an invalid memory amount: '{}'",
                    name, memory
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(RundagError::InvalidWorkflow(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(RundagError::InvalidWorkflow(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task. A topological sort fails iff there is a
    // cycle.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RundagError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}
