// tests/log_capture.rs

mod common;
use common::init_tracing;

use std::time::Duration;

use rundag::{Task, TaskManager, TaskManagerResources};

#[tokio::test]
async fn process_output_is_captured_under_the_log_dir() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    manager.set_log_dir(dir.path());

    let task = Task::shell("greet", "echo hello from rundag");
    let id = manager.add_task(&task, false).unwrap();

    let summary = manager
        .run_all_tasks(Duration::from_millis(10), Some(Duration::from_secs(10)))
        .await;
    assert!(summary.all_succeeded());

    let info = manager.get_task_execution_info(id).unwrap();
    let log_path = info.log_path.clone().expect("log path recorded");
    let script_path = info.script_path.clone().expect("script path recorded");

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("hello from rundag"));

    let script = std::fs::read_to_string(&script_path).unwrap();
    assert!(script.contains("echo hello from rundag"));
}

#[tokio::test]
async fn in_process_tasks_record_no_log_paths() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    manager.set_log_dir(dir.path());

    let task = Task::in_process("calc", || 0);
    let id = manager.add_task(&task, false).unwrap();

    let summary = manager
        .run_all_tasks(Duration::from_millis(10), Some(Duration::from_secs(10)))
        .await;
    assert!(summary.all_succeeded());

    let info = manager.get_task_execution_info(id).unwrap();
    assert!(info.log_path.is_none());
    assert!(info.script_path.is_none());
}
