// src/graph/task_graph.rs

//! The scheduling kernel.
//!
//! Owns all task records, decides which tasks are runnable, dispatches up to
//! the parallelism budget, and tracks per-task versions so that completions
//! from invalidated dispatches are ignored.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::graph::cycle::find_cycle;
use crate::graph::node::{Execution, TaskNode};
use crate::graph::version::{subtree_digest, version_digest, Digest};
use crate::graph::{
    CycleError, GraphEvent, JobLimit, RunCallback, RunRequest, TaskId, TaskStatus, TreeStatus,
};
use crate::multimap::Multimap;

pub struct TaskGraph {
    jobs: JobLimit,
    tasks: HashMap<TaskId, TaskNode>,
    tree_status: TreeStatus,
    events: mpsc::UnboundedSender<GraphEvent>,
    run_callback: RunCallback,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("jobs", &self.jobs)
            .field("tasks", &self.tasks.len())
            .field("tree_status", &self.tree_status)
            .finish_non_exhaustive()
    }
}

impl TaskGraph {
    pub fn new(
        jobs: JobLimit,
        events: mpsc::UnboundedSender<GraphEvent>,
        run_callback: RunCallback,
    ) -> Self {
        Self {
            jobs,
            tasks: HashMap::new(),
            tree_status: TreeStatus::Pending,
            events,
            run_callback,
        }
    }

    /// Replace the task set with the given adjacency (task -> direct deps).
    ///
    /// Rejects cyclic adjacencies without touching any state. Otherwise,
    /// atomically: adds missing tasks, removes absent ones (cancelling their
    /// executions), rebuilds parent/child links, and recomputes subtree
    /// digests; any task whose subtree digest changes loses its execution.
    ///
    /// Does not start runs; scheduling is requested via [`TaskGraph::run`].
    pub fn set_tasks(&mut self, adjacency: Multimap<TaskId, TaskId>) -> Result<(), CycleError> {
        if let Some(cycle) = find_cycle(&adjacency) {
            return Err(CycleError { cycle });
        }

        // Desired shape: every mentioned id becomes a node; children are
        // deduplicated and sorted so declaration order never leaks into the
        // digests.
        let mut desired: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();
        for id in adjacency.keys().chain(adjacency.values()) {
            desired.entry(id.clone()).or_default();
        }
        for (id, children) in adjacency.iter() {
            let mut list: Vec<TaskId> = children.iter().cloned().collect();
            list.sort();
            desired.insert(id.clone(), list);
        }

        let digests = compute_subtree_digests(&desired);

        let mut current_ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        current_ids.sort();

        // Live executions are cancelled before any record is touched.
        for id in &current_ids {
            let invalidated = match digests.get(id) {
                None => true,
                Some(digest) => self.tasks[id].subtree_sha != *digest,
            };
            if !invalidated {
                continue;
            }
            if let Some(node) = self.tasks.get_mut(id) {
                let in_flight = node
                    .execution
                    .as_ref()
                    .map(Execution::is_in_flight)
                    .unwrap_or(false);
                if in_flight {
                    if let Some(exec) = node.execution.as_mut() {
                        exec.cancel();
                    }
                    node.execution = None;
                    self.emit(GraphEvent::TaskReset(id.clone()));
                }
            }
        }

        // Drop removed tasks; a finished execution still counts as reset.
        for id in &current_ids {
            if desired.contains_key(id) {
                continue;
            }
            if let Some(mut node) = self.tasks.remove(id) {
                if let Some(exec) = node.execution.as_mut() {
                    exec.cancel();
                    self.emit(GraphEvent::TaskReset(id.clone()));
                }
                debug!(task = %id, "task removed from graph");
            }
        }

        // Apply the new structure; surviving tasks keep their generation.
        for (id, children) in &desired {
            let digest = digests[id];
            match self.tasks.get_mut(id) {
                Some(node) => {
                    let mut reset = false;
                    if node.subtree_sha != digest {
                        if let Some(exec) = node.execution.as_mut() {
                            exec.cancel();
                        }
                        reset = node.execution.take().is_some();
                        node.subtree_sha = digest;
                    }
                    node.children = children.clone();
                    node.parents.clear();
                    if reset {
                        self.emit(GraphEvent::TaskReset(id.clone()));
                    }
                }
                None => {
                    let mut node = TaskNode::new(id.clone(), digest);
                    node.children = children.clone();
                    self.tasks.insert(id.clone(), node);
                    debug!(task = %id, "task added to graph");
                }
            }
        }

        for (id, children) in &desired {
            for child in children {
                if let Some(node) = self.tasks.get_mut(child) {
                    node.parents.push(id.clone());
                }
            }
        }
        for node in self.tasks.values_mut() {
            node.parents.sort();
        }

        self.refresh_tree_status();
        Ok(())
    }

    /// Declare the task's own inputs dirty: bump the generation of the task
    /// and every ancestor, resetting any execution each of them holds.
    pub fn mark_changed(&mut self, task: &str) {
        if !self.tasks.contains_key(task) {
            warn!(task = %task, "mark_changed for unknown task; ignoring");
            return;
        }

        // Breadth-first from the task through its parents; descendants are
        // untouched.
        let mut affected: Vec<TaskId> = Vec::new();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = VecDeque::new();
        visited.insert(task.to_string());
        queue.push_back(task.to_string());

        while let Some(id) = queue.pop_front() {
            if let Some(node) = self.tasks.get(&id) {
                for parent in &node.parents {
                    if visited.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
            affected.push(id);
        }

        for id in &affected {
            if let Some(node) = self.tasks.get_mut(id) {
                node.generation += 1;
                if let Some(exec) = node.execution.as_mut() {
                    exec.cancel();
                }
                if node.execution.take().is_some() {
                    self.emit(GraphEvent::TaskReset(id.clone()));
                }
            }
        }

        debug!(task = %task, affected = affected.len(), "inputs marked dirty");
        self.refresh_tree_status();
    }

    /// Schedule as many executions as capacity allows.
    ///
    /// Never re-enters its callback: the callback only initiates work, and
    /// completions come back through [`TaskGraph::on_complete`] on a later
    /// turn of the owning event loop.
    pub fn run(&mut self) {
        let in_flight = self.in_flight_count();
        let capacity = self.jobs.capacity(in_flight);

        let runnable: Vec<TaskId> = self
            .topological_order()
            .into_iter()
            .filter(|id| self.is_runnable(id))
            .collect();

        if capacity == 0 || runnable.is_empty() {
            self.refresh_tree_status();
            return;
        }

        self.set_tree_status(TreeStatus::Running);

        for id in runnable.into_iter().take(capacity) {
            let Some(node) = self.tasks.get_mut(&id) else {
                continue;
            };
            let version = version_digest(node.generation, &node.subtree_sha);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            node.execution = Some(Execution::new(cancel_tx, version));

            debug!(task = %id, in_flight, "dispatching task");
            self.emit(GraphEvent::TaskStarted(id.clone()));
            (self.run_callback)(RunRequest {
                task: id,
                version,
                cancel: cancel_rx,
            });
        }
    }

    /// Report the outcome of a dispatched execution.
    ///
    /// Effective at most once per dispatch: calls with a stale version
    /// handle, for a cleared execution, or after an outcome was already
    /// recorded are ignored. Returns whether the completion was accepted;
    /// the owner should follow an accepted completion with [`TaskGraph::run`]
    /// on its next turn.
    pub fn on_complete(&mut self, task: &str, version_at_dispatch: Digest, success: bool) -> bool {
        let Some(node) = self.tasks.get_mut(task) else {
            debug!(task = %task, "completion for unknown task; ignoring");
            return false;
        };
        let current = version_digest(node.generation, &node.subtree_sha);
        let Some(exec) = node.execution.as_mut() else {
            debug!(task = %task, "completion for task with no execution; ignoring");
            return false;
        };
        if exec.version_at_dispatch != version_at_dispatch || exec.version_at_dispatch != current {
            debug!(task = %task, "stale completion; ignoring");
            return false;
        }
        if exec.outcome.is_some() {
            debug!(task = %task, "duplicate completion; ignoring");
            return false;
        }

        exec.outcome = Some(success);
        debug!(task = %task, success, "task finished");
        self.emit(GraphEvent::TaskFinished {
            task: task.to_string(),
            success,
        });
        true
    }

    /// Clear all executions, firing their cancel tokens. Idempotent.
    pub fn reset_all_tasks(&mut self) {
        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            if let Some(node) = self.tasks.get_mut(id) {
                if let Some(exec) = node.execution.as_mut() {
                    exec.cancel();
                }
                if node.execution.take().is_some() {
                    self.emit(GraphEvent::TaskReset(id.clone()));
                }
            }
        }
        self.refresh_tree_status();
    }

    /// Equivalent to `set_tasks` with an empty adjacency.
    pub fn clear(&mut self) {
        let result = self.set_tasks(Multimap::new());
        debug_assert!(result.is_ok(), "empty adjacency is trivially acyclic");
    }

    pub fn task_status(&self, task: &str) -> TaskStatus {
        let Some(node) = self.tasks.get(task) else {
            return TaskStatus::NotApplicable;
        };
        match &node.execution {
            Some(exec) => match exec.outcome {
                None => TaskStatus::Running,
                Some(true) => TaskStatus::Ok,
                Some(false) => TaskStatus::Fail,
            },
            None => match self.tree_status {
                TreeStatus::Ok | TreeStatus::Fail => TaskStatus::NotApplicable,
                TreeStatus::Pending | TreeStatus::Running => TaskStatus::Pending,
            },
        }
    }

    pub fn tree_status(&self) -> TreeStatus {
        self.tree_status
    }

    /// Current version digest of a task.
    pub fn task_version(&self, task: &str) -> Option<Digest> {
        self.tasks
            .get(task)
            .map(|node| version_digest(node.generation, &node.subtree_sha))
    }

    /// Direct dependencies of a task.
    pub fn children_of(&self, task: &str) -> &[TaskId] {
        self.tasks
            .get(task)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that directly depend on this one.
    pub fn parents_of(&self, task: &str) -> &[TaskId] {
        self.tasks
            .get(task)
            .map(|node| node.parents.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, task: &str) -> bool {
        self.tasks.contains_key(task)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Depth-first post-order over sorted roots, children sorted by id.
    /// Dependencies always precede their dependants.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut visited: HashSet<&str> = HashSet::new();

        for root in self.sorted_roots() {
            // (node, children emitted yet?)
            let mut stack: Vec<(&str, bool)> = vec![(root, false)];
            while let Some((id, children_done)) = stack.pop() {
                if children_done {
                    order.push(id.to_string());
                    continue;
                }
                if !visited.insert(id) {
                    continue;
                }
                stack.push((id, true));
                if let Some(node) = self.tasks.get(id) {
                    for child in node.children.iter().rev() {
                        if !visited.contains(child.as_str()) {
                            stack.push((child.as_str(), false));
                        }
                    }
                }
            }
        }

        order
    }

    /// Breadth-first order from sorted roots. Used by presentation layers
    /// that want dependants listed before their dependencies.
    pub fn bfs_order(&self) -> Vec<TaskId> {
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for root in self.sorted_roots() {
            if visited.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(node) = self.tasks.get(id) {
                for child in &node.children {
                    if visited.insert(child.as_str()) {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }

        order
    }

    fn sorted_roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .tasks
            .values()
            .filter(|node| node.parents.is_empty())
            .map(|node| node.id.as_str())
            .collect();
        roots.sort();
        roots
    }

    fn in_flight_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|node| {
                node.execution
                    .as_ref()
                    .map(Execution::is_in_flight)
                    .unwrap_or(false)
            })
            .count()
    }

    /// A task is runnable when it has no execution and every dependency has
    /// a current successful one.
    fn is_runnable(&self, task: &str) -> bool {
        let Some(node) = self.tasks.get(task) else {
            return false;
        };
        if node.execution.is_some() {
            return false;
        }
        node.children.iter().all(|child_id| {
            self.tasks.get(child_id).is_some_and(|child| {
                child.execution.as_ref().is_some_and(|exec| {
                    exec.outcome == Some(true)
                        && exec.version_at_dispatch
                            == version_digest(child.generation, &child.subtree_sha)
                })
            })
        })
    }

    fn compute_tree_status(&self) -> TreeStatus {
        if self.in_flight_count() > 0 {
            return TreeStatus::Running;
        }
        let any_runnable = self.tasks.keys().any(|id| self.is_runnable(id));
        if any_runnable {
            return TreeStatus::Pending;
        }
        let any_failed = self.tasks.values().any(|node| {
            node.execution
                .as_ref()
                .is_some_and(|exec| exec.outcome == Some(false))
        });
        if any_failed {
            TreeStatus::Fail
        } else {
            TreeStatus::Ok
        }
    }

    fn refresh_tree_status(&mut self) {
        let status = self.compute_tree_status();
        self.set_tree_status(status);
    }

    fn set_tree_status(&mut self, status: TreeStatus) {
        if status != self.tree_status {
            debug!(from = %self.tree_status, to = %status, "tree status changed");
            self.tree_status = status;
            self.emit(GraphEvent::TreeStatusChanged(status));
        }
    }

    fn emit(&self, event: GraphEvent) {
        // The receiver side may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

/// Post-order digest computation over the desired shape. Children lists must
/// already be sorted.
fn compute_subtree_digests(shape: &BTreeMap<TaskId, Vec<TaskId>>) -> HashMap<TaskId, Digest> {
    let mut digests: HashMap<TaskId, Digest> = HashMap::new();

    for start in shape.keys() {
        if digests.contains_key(start) {
            continue;
        }
        let mut stack: Vec<(&str, bool)> = vec![(start.as_str(), false)];
        while let Some((id, children_done)) = stack.pop() {
            if digests.contains_key(id) {
                continue;
            }
            let children = shape.get(id).map(Vec::as_slice).unwrap_or(&[]);
            if children_done {
                let child_digests: Vec<Digest> = children
                    .iter()
                    .map(|child| digests[child.as_str()])
                    .collect();
                digests.insert(id.to_string(), subtree_digest(id, &child_digests));
            } else {
                stack.push((id, true));
                for child in children.iter().rev() {
                    if !digests.contains_key(child.as_str()) {
                        stack.push((child.as_str(), false));
                    }
                }
            }
        }
    }

    digests
}
