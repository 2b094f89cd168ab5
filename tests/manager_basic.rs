// tests/manager_basic.rs

mod common;
use common::{init_tracing, manual_manager};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rundag::errors::RundagError;
use rundag::{
    NodeState, ResourceSet, Task, TaskManager, TaskManagerResources, TaskStatus,
};

#[tokio::test]
async fn shell_exit_zero_runs_to_success() {
    init_tracing();

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let task = Task::shell("exit-zero", "exit 0").with_resources(ResourceSet::empty());
    let id = manager.add_task(&task, false).unwrap();

    let summary = manager
        .run_all_tasks(Duration::from_millis(10), Some(Duration::from_secs(10)))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(manager.get_task_status(id), Some(TaskStatus::Succeeded));
    assert_eq!(manager.get_graph_node_state(id), Some(NodeState::Completed));

    let info = manager.get_task_execution_info(id).unwrap();
    assert_eq!(info.attempt_index, 1);
    assert!(info.submission_date.unwrap() <= info.start_date.unwrap());
    assert!(info.start_date.unwrap() <= info.end_date.unwrap());
}

#[tokio::test]
async fn chain_runs_in_dependency_order() {
    init_tracing();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let o = order.clone();
    let a = Task::in_process("a", move || {
        o.lock().unwrap().push("a");
        0
    });
    let o = order.clone();
    let b = Task::in_process("b", move || {
        o.lock().unwrap().push("b");
        0
    });
    a.then(&b);

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let ids = manager.add_tasks(&[a.clone(), b.clone()], false).unwrap();

    let summary = manager
        .run_all_tasks(Duration::from_millis(5), Some(Duration::from_secs(10)))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);

    let start_a = manager
        .get_task_execution_info(ids[0])
        .unwrap()
        .start_date
        .unwrap();
    let start_b = manager
        .get_task_execution_info(ids[1])
        .unwrap()
        .start_date
        .unwrap();
    assert!(start_b >= start_a);
}

#[test]
fn ids_are_dense_and_increasing() {
    init_tracing();

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let ids: Vec<_> = (0..4)
        .map(|i| {
            let task = Task::in_process(format!("t{i}"), || 0);
            manager.add_task(&task, false).unwrap()
        })
        .collect();

    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[test]
fn adding_twice_with_ignore_exists_returns_the_same_id() {
    init_tracing();

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let task = Task::in_process("once", || 0);

    let first = manager.add_task(&task, true).unwrap();
    let state_before = manager.get_graph_node_state(first);
    let second = manager.add_task(&task, true).unwrap();

    assert_eq!(first, second);
    assert_eq!(manager.task_count(), 1);
    assert_eq!(manager.get_graph_node_state(first), state_before);
}

#[test]
fn adding_twice_without_ignore_exists_is_an_error() {
    init_tracing();

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let task = Task::in_process("once", || 0);
    manager.add_task(&task, false).unwrap();

    match manager.add_task(&task, false) {
        Err(RundagError::DuplicateTask(name)) => assert_eq!(name, "once"),
        other => panic!("expected DuplicateTask, got {other:?}"),
    }
    assert_eq!(manager.task_count(), 1);
}

#[test]
fn inserting_a_cycle_is_rejected() {
    init_tracing();

    let a = Task::in_process("a", || 0);
    let b = Task::in_process("b", || 0);
    a.then(&b);
    b.then(&a);

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    // `a` can be inserted; its missing predecessor just leaves it an orphan.
    let a_id = manager.add_task(&a, false).unwrap();
    assert_eq!(manager.get_graph_node_state(a_id), Some(NodeState::Orphan));

    // Inserting `b` would close the cycle; nothing changes.
    match manager.add_task(&b, false) {
        Err(RundagError::DagCycle(_)) => {}
        other => panic!("expected DagCycle, got {other:?}"),
    }
    assert_eq!(manager.get_task_id(&b), None);
    assert_eq!(manager.task_count(), 1);
}

#[test]
fn self_dependency_is_rejected() {
    init_tracing();

    let a = Task::in_process("selfish", || 0);
    a.then(&a);

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    assert!(matches!(
        manager.add_task(&a, false),
        Err(RundagError::DagCycle(_))
    ));
}

#[tokio::test]
async fn manually_succeeded_task_unblocks_successors() {
    init_tracing();

    // `a` would fail if it ever ran; mark it successful by hand instead.
    let a = Task::in_process("skipped", || 1);
    let b = Task::in_process("after", || 0);
    a.then(&b);

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let ids = manager.add_tasks(&[a.clone(), b.clone()], false).unwrap();
    assert!(manager.mark_manually_succeeded(ids[0]));

    let summary = manager
        .run_all_tasks(Duration::from_millis(5), Some(Duration::from_secs(10)))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(
        manager.get_task_status(ids[0]),
        Some(TaskStatus::ManuallySucceeded)
    );
    assert_eq!(manager.get_task_status(ids[1]), Some(TaskStatus::Succeeded));
}

#[tokio::test]
async fn terminate_force_marks_unconfirmed_tasks() {
    init_tracing();
    let (mut manager, driver) = manual_manager(4.0, "4g");

    let task = Task::in_process("stuck", || 0);
    let id = manager.add_task(&task, false).unwrap();
    manager.run_scheduler_once();
    assert_eq!(manager.running_task_ids(), vec![id]);

    // The backend is asked to cancel but never confirms; after the grace
    // period the manager records the attempt as failed on its own.
    manager.terminate_running_tasks().await;

    assert!(driver.cancelled().contains(&id));
    assert!(manager.running_task_ids().is_empty());
    assert_eq!(manager.get_task_status(id), Some(TaskStatus::FailedCommand));
    assert_eq!(manager.get_graph_node_state(id), Some(NodeState::Completed));
}

#[tokio::test]
async fn timeout_terminates_running_tasks() {
    init_tracing();

    let mut manager = TaskManager::new(TaskManagerResources::infinite());
    let task = Task::shell("sleeper", "sleep 30");
    let id = manager.add_task(&task, false).unwrap();

    let summary = manager
        .run_all_tasks(Duration::from_millis(10), Some(Duration::from_millis(300)))
        .await;

    // On return nothing is left running; the killed attempt reads as a
    // command failure.
    assert_eq!(manager.running_task_ids(), Vec::<rundag::TaskId>::new());
    assert_eq!(
        manager.get_task_status(id),
        Some(TaskStatus::FailedCommand)
    );
    assert_eq!(manager.get_graph_node_state(id), Some(NodeState::Completed));
    assert_eq!(summary.failed, 1);
}
