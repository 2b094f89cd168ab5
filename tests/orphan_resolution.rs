// tests/orphan_resolution.rs

mod common;
use common::{init_tracing, manual_manager};

use rundag::{NodeState, TaskStatus};
use rundag_test_utils::exit_task;

#[test]
fn orphan_successor_waits_for_predecessor_insertion() {
    init_tracing();
    let (mut manager, driver) = manual_manager(4.0, "4g");

    let pred = exit_task("pred", 0);
    let succ = exit_task("succ", 0);
    pred.then(&succ);

    // Insert the successor first: its declared predecessor is unknown.
    let succ_id = manager.add_task(&succ, false).unwrap();
    assert_eq!(
        manager.get_graph_node_state(succ_id),
        Some(NodeState::Orphan)
    );

    // Ticking does not change that; there is nothing to run.
    let step = manager.run_scheduler_once();
    assert!(step.ready_tasks.is_empty());
    assert_eq!(
        manager.get_graph_node_state(succ_id),
        Some(NodeState::Orphan)
    );

    // Inserting the predecessor resolves the orphan on the next tick.
    let pred_id = manager.add_task(&pred, false).unwrap();
    let step = manager.run_scheduler_once();
    assert_eq!(
        manager.get_graph_node_state(succ_id),
        Some(NodeState::PredecessorsAndUnexpanded)
    );
    assert!(manager
        .get_graph_node(succ_id)
        .unwrap()
        .has_predecessor(pred_id));
    assert_eq!(step.tasks_to_schedule, vec![pred_id]);

    let req = driver.take_launched().pop().unwrap();
    driver.complete(&req, 0);

    // Harvest tick: the predecessor completes; the successor is not yet
    // admitted in the same tick.
    let step = manager.run_scheduler_once();
    assert_eq!(step.completed_tasks, vec![pred_id]);
    assert!(step.tasks_to_schedule.is_empty());
    assert_eq!(manager.get_task_status(pred_id), Some(TaskStatus::Succeeded));

    // Next tick the successor is ready and admitted.
    let step = manager.run_scheduler_once();
    assert_eq!(step.tasks_to_schedule, vec![succ_id]);
    let req = driver.take_launched().pop().unwrap();
    driver.complete(&req, 0);

    manager.run_scheduler_once();
    assert!(manager.is_all_completed());

    // The original-predecessor record survives the completed edge.
    assert_eq!(
        manager.get_graph_node(succ_id).unwrap().original_predecessors(),
        vec![pred_id]
    );
    assert!(!manager
        .get_graph_node(succ_id)
        .unwrap()
        .has_predecessor(pred_id));
}

#[test]
fn successor_of_an_already_completed_predecessor_is_immediately_ready() {
    init_tracing();
    let (mut manager, driver) = manual_manager(4.0, "4g");

    let pred = exit_task("pred", 0);
    let succ = exit_task("succ", 0);
    pred.then(&succ);

    manager.add_task(&pred, false).unwrap();
    manager.run_scheduler_once();
    let req = driver.take_launched().pop().unwrap();
    driver.complete(&req, 0);
    manager.run_scheduler_once();

    // The predecessor has already succeeded; the successor starts ready.
    let succ_id = manager.add_task(&succ, false).unwrap();
    assert_eq!(
        manager.get_graph_node_state(succ_id),
        Some(NodeState::NoPredecessors)
    );

    let step = manager.run_scheduler_once();
    assert_eq!(step.tasks_to_schedule, vec![succ_id]);
}
