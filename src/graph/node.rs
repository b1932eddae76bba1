// src/graph/node.rs

//! Task arena records.
//!
//! Parent/child cross-links would form reference cycles, so all task records
//! live in an arena keyed by task id and link to each other by id only.

use tokio::sync::oneshot;

use crate::graph::version::Digest;
use crate::graph::TaskId;

/// An in-flight (or finished, not yet invalidated) attempt to run a task.
///
/// Bound to the task version at dispatch time; a later version change clears
/// the execution and fires the cancel token.
#[derive(Debug)]
pub struct Execution {
    /// Fired when the execution is cancelled. Taken on use, so repeated
    /// cancellation is a no-op.
    pub cancel: Option<oneshot::Sender<()>>,
    pub version_at_dispatch: Digest,
    /// `None` while running, then `Some(success)`.
    pub outcome: Option<bool>,
}

impl Execution {
    pub fn new(cancel: oneshot::Sender<()>, version_at_dispatch: Digest) -> Self {
        Self {
            cancel: Some(cancel),
            version_at_dispatch,
            outcome: None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.outcome.is_none()
    }

    /// Fire the cancel token. Idempotent; sending to a dropped receiver is
    /// also fine (the runner side already went away).
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// One task in the arena.
#[derive(Debug)]
pub struct TaskNode {
    pub id: TaskId,
    /// Tasks that depend on this one.
    pub parents: Vec<TaskId>,
    /// Direct dependencies of this task.
    pub children: Vec<TaskId>,
    /// Bumped each time this task's own inputs are declared dirty.
    pub generation: u64,
    pub subtree_sha: Digest,
    pub execution: Option<Execution>,
}

impl TaskNode {
    pub fn new(id: TaskId, subtree_sha: Digest) -> Self {
        Self {
            id,
            parents: Vec::new(),
            children: Vec::new(),
            generation: 0,
            subtree_sha,
            execution: None,
        }
    }
}
