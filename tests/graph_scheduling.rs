// tests/graph_scheduling.rs

//! Scheduling kernel behaviour: dispatch order, version-based invalidation,
//! parallelism caps, cycle rejection.
//!
//! The graph is driven directly with a recording run callback; completions
//! are applied between `run()` passes, the way the workspace loop applies
//! them between turns.

mod common;
use crate::common::init_tracing;

use tokio::sync::mpsc;

use rundag::graph::{GraphEvent, JobLimit, TaskGraph, TaskStatus, TreeStatus};
use rundag_test_utils::{adjacency, EventLog, RunRecorder};

fn new_graph(jobs: JobLimit) -> (TaskGraph, RunRecorder, EventLog) {
    init_tracing();
    let recorder = RunRecorder::new();
    let (tx, rx) = mpsc::unbounded_channel::<GraphEvent>();
    let graph = TaskGraph::new(jobs, tx, recorder.callback());
    (graph, recorder, EventLog::new(rx))
}

/// Complete every pending dispatch successfully, scheduling follow-up passes
/// the way the event loop would.
fn drive_to_completion(graph: &mut TaskGraph, recorder: &RunRecorder) {
    while let Some(req) = recorder.pop() {
        graph.on_complete(&req.task, req.version, true);
        graph.run();
    }
}

#[test]
fn linear_chain_runs_bottom_up_and_reruns_from_change() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph
        .set_tasks(adjacency(&[
            ("root", &["middle"]),
            ("middle", &["leaf"]),
            ("leaf", &[]),
        ]))
        .unwrap();

    graph.run();
    drive_to_completion(&mut graph, &recorder);

    assert_eq!(
        events.drain(),
        [
            "started:leaf",
            "finished:leaf",
            "started:middle",
            "finished:middle",
            "started:root",
            "finished:root",
        ]
    );
    assert_eq!(graph.tree_status(), TreeStatus::Ok);

    graph.mark_changed("middle");
    graph.run();
    drive_to_completion(&mut graph, &recorder);

    assert_eq!(
        events.drain(),
        [
            "reset:middle",
            "reset:root",
            "started:middle",
            "finished:middle",
            "started:root",
            "finished:root",
        ]
    );
    assert_eq!(graph.tree_status(), TreeStatus::Ok);
}

#[test]
fn diamond_prune_reruns_only_the_root() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph
        .set_tasks(adjacency(&[
            ("root", &["dep-1", "dep-2"]),
            ("dep-1", &[]),
            ("dep-2", &[]),
        ]))
        .unwrap();
    graph.run();
    drive_to_completion(&mut graph, &recorder);
    events.clear();

    graph
        .set_tasks(adjacency(&[("root", &["dep-1"]), ("dep-1", &[])]))
        .unwrap();
    graph.run();
    drive_to_completion(&mut graph, &recorder);

    // dep-1 stays current; only the removed task and the reshaped root move.
    assert_eq!(
        events.drain(),
        ["reset:dep-2", "reset:root", "started:root", "finished:root"]
    );
}

#[test]
fn mid_flight_dependency_swap_cancels_and_redispatches() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph
        .set_tasks(adjacency(&[("root", &["dep-1"]), ("dep-1", &[])]))
        .unwrap();
    graph.run();

    let dep1 = recorder.pop_task("dep-1").expect("dep-1 dispatched");
    graph.on_complete(&dep1.task, dep1.version, true);
    graph.run();

    // root is now in flight; hold its request without completing it.
    let mut hung_root = recorder.pop_task("root").expect("root dispatched");
    events.clear();

    graph
        .set_tasks(adjacency(&[("root", &["dep-2"]), ("dep-2", &[])]))
        .unwrap();
    graph.run();

    let dep2 = recorder.pop_task("dep-2").expect("dep-2 dispatched");
    graph.on_complete(&dep2.task, dep2.version, true);
    graph.run();

    // root was redispatched and hangs again; leave it in flight.
    assert_eq!(recorder.pending(), ["root"]);

    assert_eq!(
        events.drain(),
        [
            "reset:root",
            "reset:dep-1",
            "started:dep-2",
            "finished:dep-2",
            "started:root",
        ]
    );

    // The superseded dispatch was cancelled, and its late completion is
    // ignored by the version check.
    assert!(matches!(hung_root.cancel.try_recv(), Ok(())));
    assert!(!graph.on_complete(&hung_root.task, hung_root.version, true));
    assert_eq!(graph.task_status("root"), TaskStatus::Running);
}

#[test]
fn parallel_cap_limits_in_flight_dispatches() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Limit(2));
    graph
        .set_tasks(adjacency(&[
            ("leaf-1", &[]),
            ("leaf-2", &[]),
            ("leaf-3", &[]),
        ]))
        .unwrap();

    graph.run();
    assert_eq!(recorder.pending(), ["leaf-1", "leaf-2"]);

    let first = recorder.pop().unwrap();
    let second = recorder.pop().unwrap();
    graph.on_complete(&first.task, first.version, true);
    graph.on_complete(&second.task, second.version, true);
    graph.run();

    let third = recorder.pop().expect("third leaf dispatched");
    assert_eq!(third.task, "leaf-3");
    graph.on_complete(&third.task, third.version, true);
    graph.run();

    assert_eq!(
        events.drain(),
        [
            "started:leaf-1",
            "started:leaf-2",
            "finished:leaf-1",
            "finished:leaf-2",
            "started:leaf-3",
            "finished:leaf-3",
        ]
    );
}

#[test]
fn single_job_runs_strictly_sequentially() {
    let (mut graph, recorder, _events) = new_graph(JobLimit::Limit(1));
    graph
        .set_tasks(adjacency(&[("a", &[]), ("b", &[]), ("c", &[])]))
        .unwrap();

    graph.run();
    assert_eq!(recorder.pending(), ["a"]);
    let req = recorder.pop().unwrap();
    graph.on_complete(&req.task, req.version, true);
    graph.run();
    assert_eq!(recorder.pending(), ["b"]);
}

#[test]
fn cycle_error_reports_the_cycle_slice() {
    let (mut graph, _recorder, _events) = new_graph(JobLimit::Unlimited);
    let err = graph
        .set_tasks(adjacency(&[
            ("n0", &["n1"]),
            ("n1", &["n2"]),
            ("n2", &["n3"]),
            ("n3", &["n1"]),
        ]))
        .unwrap_err();

    let mut cycle = err.cycle.clone();
    cycle.sort();
    assert_eq!(cycle, ["n1", "n2", "n3"]);
    assert!(graph.is_empty());
}

#[test]
fn rootless_cycle_is_rejected() {
    let (mut graph, _recorder, _events) = new_graph(JobLimit::Unlimited);
    let err = graph
        .set_tasks(adjacency(&[("a", &["b"]), ("b", &["a"])]))
        .unwrap_err();
    assert_eq!(err.cycle.len(), 2);
}

#[test]
fn empty_graph_settles_ok_and_run_is_a_noop() {
    let (mut graph, recorder, _events) = new_graph(JobLimit::Unlimited);
    graph.set_tasks(adjacency(&[])).unwrap();
    graph.run();
    assert!(recorder.is_empty());
    assert_eq!(graph.tree_status(), TreeStatus::Ok);
}

#[test]
fn identical_set_tasks_resets_nothing() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    let adj = adjacency(&[("root", &["leaf"]), ("leaf", &[])]);
    graph.set_tasks(adj.clone()).unwrap();
    graph.run();
    drive_to_completion(&mut graph, &recorder);
    events.clear();

    graph.set_tasks(adj).unwrap();
    graph.run();

    assert_eq!(events.drain(), Vec::<String>::new());
    assert!(recorder.is_empty());
}

#[test]
fn reset_all_tasks_is_idempotent() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph
        .set_tasks(adjacency(&[("root", &["leaf"]), ("leaf", &[])]))
        .unwrap();
    graph.run();
    drive_to_completion(&mut graph, &recorder);
    events.clear();

    graph.reset_all_tasks();
    let first = events.drain();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|entry| entry.starts_with("reset:")));

    graph.reset_all_tasks();
    assert_eq!(events.drain(), Vec::<String>::new());
}

#[test]
fn completion_is_effective_at_most_once() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph.set_tasks(adjacency(&[("solo", &[])])).unwrap();
    graph.run();

    let req = recorder.pop().unwrap();
    assert!(graph.on_complete(&req.task, req.version, true));
    assert!(!graph.on_complete(&req.task, req.version, false));
    assert_eq!(graph.task_status("solo"), TaskStatus::Ok);

    let entries = events.drain();
    assert_eq!(
        entries
            .iter()
            .filter(|entry| entry.starts_with("finished:"))
            .count(),
        1
    );
}

#[test]
fn failed_task_sticks_and_blocks_parents() {
    let (mut graph, recorder, _events) = new_graph(JobLimit::Unlimited);
    graph
        .set_tasks(adjacency(&[("root", &["leaf"]), ("leaf", &[])]))
        .unwrap();
    graph.run();

    let leaf = recorder.pop_task("leaf").unwrap();
    graph.on_complete(&leaf.task, leaf.version, false);
    graph.run();

    // No retry, no dispatch of the parent.
    assert!(recorder.is_empty());
    assert_eq!(graph.tree_status(), TreeStatus::Fail);
    assert_eq!(graph.task_status("leaf"), TaskStatus::Fail);
    assert_eq!(graph.task_status("root"), TaskStatus::NotApplicable);

    // Declaring the inputs dirty re-enables the whole chain.
    graph.mark_changed("leaf");
    graph.run();
    drive_to_completion(&mut graph, &recorder);
    assert_eq!(graph.tree_status(), TreeStatus::Ok);
    assert_eq!(graph.task_status("root"), TaskStatus::Ok);
}

#[test]
fn stale_completion_after_mark_changed_is_ignored() {
    let (mut graph, recorder, _events) = new_graph(JobLimit::Unlimited);
    graph.set_tasks(adjacency(&[("solo", &[])])).unwrap();
    graph.run();

    let mut req = recorder.pop().unwrap();
    graph.mark_changed("solo");
    assert!(matches!(req.cancel.try_recv(), Ok(())));
    assert!(!graph.on_complete(&req.task, req.version, true));
    assert_eq!(graph.task_status("solo"), TaskStatus::Pending);
}

#[test]
fn tree_status_transitions_are_emitted_once() {
    let (mut graph, recorder, mut events) = new_graph(JobLimit::Unlimited);
    graph.set_tasks(adjacency(&[("solo", &[])])).unwrap();
    events.clear();

    graph.run();
    let req = recorder.pop().unwrap();
    graph.on_complete(&req.task, req.version, true);
    graph.run();

    assert_eq!(graph.tree_status(), TreeStatus::Ok);
    assert_eq!(events.drain_statuses(), ["tree:running", "tree:ok"]);
}
