// src/workspace/mod.rs

//! Top-level orchestrator.
//!
//! The [`Workspace`] owns a [`crate::graph::TaskGraph`] and one [`Project`]
//! per configuration. It drives configuration (re)loads, filesystem
//! watching, coalesced updates, and child-process execution, and forwards
//! task lifecycle events and process output.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::{JobLimit, TaskId, TreeStatus};

pub mod core;
pub mod exec;
pub mod project;
pub mod watch;

pub use self::core::{Workspace, WorkspaceHandle};
pub use project::Project;

/// Environment marker set on task children spawned by the workspace; a task
/// started without it is running standalone.
pub const RUNNER_ENV: &str = "RUNDAG_RUNNER";

/// Environment marker set on task children while the workspace watches.
pub const WATCH_ENV: &str = "RUNDAG_WATCH";

/// Environment variable carrying the env-file path from [`ExecOptions`].
pub const ENV_FILE_ENV: &str = "RUNDAG_ENV_FILE";

/// Environment variable requesting colored child output.
pub const FORCE_COLOR_ENV: &str = "FORCE_COLOR";

/// Exact stdout line a long-running task prints to declare itself ready.
pub const READY_SENTINEL: &str = "task-done";

/// How long change notifications coalesce before an update pass runs.
pub const UPDATE_DEBOUNCE: Duration = Duration::from_millis(150);

/// Manifest files watched next to every configuration.
pub const MANIFEST_SIBLINGS: &[&str] = &["tsconfig.json", "package.json", "package-lock.json"];

/// Pass-through options for spawned task children.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub env_file: Option<PathBuf>,
    pub force_colors: bool,
}

/// Options the workspace is constructed with.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Root configuration paths; their `deps` closure forms the task set.
    pub roots: Vec<PathBuf>,
    pub jobs: JobLimit,
    pub watch_mode: bool,
    pub exec: ExecOptions,
}

/// Workspace-level status: the graph's tree status, or `Error` while the
/// last configuration read produced a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceStatus {
    Pending,
    Running,
    Ok,
    Fail,
    Error,
}

impl From<TreeStatus> for WorkspaceStatus {
    fn from(status: TreeStatus) -> Self {
        match status {
            TreeStatus::Pending => WorkspaceStatus::Pending,
            TreeStatus::Running => WorkspaceStatus::Running,
            TreeStatus::Ok => WorkspaceStatus::Ok,
            TreeStatus::Fail => WorkspaceStatus::Fail,
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Pending => "pending",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Ok => "ok",
            WorkspaceStatus::Fail => "fail",
            WorkspaceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Events the workspace forwards to its consumer (a UI, the CLI, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    ProjectAdded(TaskId),
    ProjectRemoved(TaskId),
    ProjectsChanged,
    WorkspaceStatusChanged(WorkspaceStatus),
    BuildStatusChanged(TaskId),
    BuildStdout { task: TaskId, chunk: String },
    BuildStderr { task: TaskId, chunk: String },
    PidChanged { task: TaskId, pid: Option<u32> },
}

/// Stable task id for a configuration path.
pub fn path_id(path: &Path) -> TaskId {
    path.to_string_lossy().into_owned()
}
