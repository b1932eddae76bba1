// tests/graph_properties.rs

//! Quantified invariants over generated DAGs.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use tokio::sync::mpsc;

use rundag::graph::{GraphEvent, JobLimit, TaskGraph, TaskId};
use rundag::multimap::Multimap;
use rundag_test_utils::RunRecorder;

/// Generate an adjacency that is acyclic by construction: task `i` may only
/// depend on tasks with a smaller index.
fn arb_dag() -> impl Strategy<Value = Vec<(TaskId, Vec<TaskId>)>> {
    (2usize..8).prop_flat_map(|n| {
        let edges = proptest::collection::vec(proptest::bool::ANY, n * (n - 1) / 2);
        edges.prop_map(move |edges| {
            let name = |i: usize| format!("task-{i}");
            let mut entries = Vec::new();
            let mut flat = edges.into_iter();
            for i in 0..n {
                let mut deps = Vec::new();
                for j in 0..i {
                    if flat.next().unwrap_or(false) {
                        deps.push(name(j));
                    }
                }
                entries.push((name(i), deps));
            }
            entries
        })
    })
}

fn to_multimap(entries: &[(TaskId, Vec<TaskId>)]) -> Multimap<TaskId, TaskId> {
    entries
        .iter()
        .map(|(task, deps)| (task.clone(), deps.clone()))
        .collect()
}

fn build(entries: &[(TaskId, Vec<TaskId>)]) -> (TaskGraph, RunRecorder, mpsc::UnboundedReceiver<GraphEvent>) {
    let recorder = RunRecorder::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut graph = TaskGraph::new(JobLimit::Unlimited, tx, recorder.callback());
    graph
        .set_tasks(to_multimap(entries))
        .expect("generated adjacency is acyclic");
    (graph, recorder, rx)
}

proptest! {
    #[test]
    fn topological_order_respects_edges(entries in arb_dag()) {
        let (graph, _recorder, _rx) = build(&entries);

        let order = graph.topological_order();
        prop_assert_eq!(order.len(), entries.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        for (task, deps) in &entries {
            for dep in deps {
                prop_assert!(position[dep.as_str()] < position[task.as_str()]);
            }
        }
    }

    #[test]
    fn mark_changed_bumps_exactly_ancestors(entries in arb_dag(), target in 0usize..8) {
        let (mut graph, _recorder, _rx) = build(&entries);
        let target = format!("task-{}", target % entries.len());

        // Expected affected set: the target plus everything that can reach it.
        let mut ancestors: HashSet<TaskId> = HashSet::new();
        let mut stack = vec![target.clone()];
        while let Some(id) = stack.pop() {
            if !ancestors.insert(id.clone()) {
                continue;
            }
            for (task, deps) in &entries {
                if deps.contains(&id) {
                    stack.push(task.clone());
                }
            }
        }

        let before: HashMap<TaskId, _> = entries
            .iter()
            .map(|(task, _)| (task.clone(), graph.task_version(task).unwrap()))
            .collect();

        graph.mark_changed(&target);

        for (task, _) in &entries {
            let after = graph.task_version(task).unwrap();
            if ancestors.contains(task) {
                prop_assert_ne!(before[task], after, "ancestor {} must move", task);
            } else {
                prop_assert_eq!(before[task], after, "non-ancestor {} must not move", task);
            }
        }
    }

    /// Every dispatched execution terminates in exactly one `finished` or
    /// exactly one `reset`, never both.
    #[test]
    fn executions_finish_or_reset_exactly_once(
        entries in arb_dag(),
        failures in proptest::collection::vec(proptest::bool::ANY, 32),
        reset_at in 0usize..32,
    ) {
        let (mut graph, recorder, mut rx) = build(&entries);
        graph.run();

        let mut flips = failures.into_iter();
        let mut step = 0usize;
        while let Some(req) = recorder.pop() {
            if step == reset_at {
                graph.reset_all_tasks();
                // The popped request's execution was reset; its completion
                // must be ignored.
                graph.on_complete(&req.task, req.version, true);
            } else {
                let success = flips.next().unwrap_or(true);
                graph.on_complete(&req.task, req.version, success);
            }
            graph.run();
            step += 1;
        }

        // Per task: every `finished` and every `reset` belongs to some
        // dispatch, and one dispatch yields at most one of each.
        let mut started: HashMap<TaskId, usize> = HashMap::new();
        let mut finished: HashMap<TaskId, usize> = HashMap::new();
        let mut reset: HashMap<TaskId, usize> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                GraphEvent::TaskStarted(task) => {
                    *started.entry(task).or_default() += 1;
                }
                GraphEvent::TaskFinished { task, .. } => {
                    *finished.entry(task).or_default() += 1;
                }
                GraphEvent::TaskReset(task) => {
                    *reset.entry(task).or_default() += 1;
                }
                GraphEvent::TreeStatusChanged(_) => {}
            }
        }
        for (task, dispatches) in &started {
            let finishes = finished.get(task).copied().unwrap_or(0);
            let resets = reset.get(task).copied().unwrap_or(0);
            prop_assert!(
                finishes <= *dispatches,
                "task {} finished {} times over {} dispatches",
                task,
                finishes,
                dispatches
            );
            prop_assert!(
                resets <= *dispatches,
                "task {} reset {} times over {} dispatches",
                task,
                resets,
                dispatches
            );
        }
    }
}
