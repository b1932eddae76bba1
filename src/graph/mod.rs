// src/graph/mod.rs

//! Task graph and scheduling kernel.
//!
//! - [`task_graph`] holds the arena of tasks, dependency edges, per-task
//!   versions and in-flight executions, and makes all dispatch decisions.
//! - [`cycle`] detects cycles and reports the offending slice.
//! - [`version`] computes the structural and version digests.
//! - [`node`] defines the arena records.

use std::fmt;
use std::str::FromStr;

use tokio::sync::oneshot;

pub mod cycle;
pub mod node;
pub mod task_graph;
pub mod version;

pub use cycle::CycleError;
pub use task_graph::TaskGraph;
pub use version::Digest;

/// Canonical task identifier. In practice the absolute configuration path.
pub type TaskId = String;

/// Maximum number of concurrently running executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLimit {
    Unlimited,
    Limit(usize),
}

impl JobLimit {
    /// Remaining dispatch slots given the current number of in-flight runs.
    pub fn capacity(&self, in_flight: usize) -> usize {
        match self {
            JobLimit::Unlimited => usize::MAX,
            JobLimit::Limit(n) => n.saturating_sub(in_flight),
        }
    }
}

impl Default for JobLimit {
    fn default() -> Self {
        JobLimit::Unlimited
    }
}

impl FromStr for JobLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(JobLimit::Unlimited);
        }
        match s.parse::<usize>() {
            // 0 gets make-style semantics: no cap.
            Ok(0) => Ok(JobLimit::Unlimited),
            Ok(n) => Ok(JobLimit::Limit(n)),
            Err(_) => Err(format!(
                "invalid jobs value: {s} (expected a non-negative integer or \"unlimited\")"
            )),
        }
    }
}

impl fmt::Display for JobLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobLimit::Unlimited => write!(f, "unlimited"),
            JobLimit::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Status of a single task as derived from its execution and the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// No execution and the tree has settled; this task is not going to run.
    NotApplicable,
    Pending,
    Running,
    Ok,
    Fail,
}

/// Status of the graph as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStatus {
    Pending,
    Running,
    Ok,
    Fail,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::NotApplicable => "n/a",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Ok => "ok",
            TaskStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

impl fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeStatus::Pending => "pending",
            TreeStatus::Running => "running",
            TreeStatus::Ok => "ok",
            TreeStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Lifecycle events emitted by the [`TaskGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// A task was dispatched; emitted before the run callback is invoked.
    TaskStarted(TaskId),
    /// A dispatched execution completed.
    TaskFinished { task: TaskId, success: bool },
    /// A dispatched execution was cleared (cancellation or invalidation).
    TaskReset(TaskId),
    /// The tree status changed; emitted on transitions only.
    TreeStatusChanged(TreeStatus),
}

/// A request to run one task, handed to the graph's run callback.
///
/// The callback side reports the result back through
/// [`TaskGraph::on_complete`] using the `version` captured here; stale
/// handles are ignored by the version check. `cancel` fires when the
/// execution is reset before completing.
#[derive(Debug)]
pub struct RunRequest {
    pub task: TaskId,
    pub version: Digest,
    pub cancel: oneshot::Receiver<()>,
}

/// Callback invoked by the graph to request execution of one task.
///
/// Knowing *how* to run a task is the caller's responsibility, not the
/// graph's. The callback must only initiate work: completions are reported
/// via [`TaskGraph::on_complete`] on a later event-loop turn, which is what
/// keeps `run()` from re-entering itself.
pub type RunCallback = Box<dyn FnMut(RunRequest) + Send>;
