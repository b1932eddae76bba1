// src/workspace/project.rs

//! Per-configuration state owned by the workspace.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{LoadedConfig, TaskOptions};
use crate::graph::{Digest, TaskId};
use crate::workspace::watch::ProjectWatcher;

/// Bookkeeping for the child process of the current dispatch.
#[derive(Debug)]
pub(crate) struct ActiveRun {
    /// Monotonic per-project sequence; messages from superseded children
    /// carry an older value and are dropped.
    pub seq: u64,
    /// Task version the dispatch was bound to.
    pub version: Digest,
    /// The readiness sentinel arrived; the process may keep running.
    pub ready: bool,
}

/// Workspace-side wrapper over a task: configuration, output buffer, child
/// process identity and filesystem watcher.
#[derive(Debug)]
pub struct Project {
    id: TaskId,
    config_path: PathBuf,
    name: Option<String>,
    config_error: Option<String>,
    options: Option<TaskOptions>,
    /// Merged stdout+stderr in arrival order. Reset at the start of each
    /// run, not on status changes.
    output: String,
    start_time_ms: Option<u64>,
    stop_time_ms: Option<u64>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    pub(crate) run: Option<ActiveRun>,
    next_seq: u64,
    pub(crate) watcher: Option<ProjectWatcher>,
}

impl Project {
    pub(crate) fn new(id: TaskId, config_path: PathBuf) -> Self {
        Self {
            id,
            config_path,
            name: None,
            config_error: None,
            options: None,
            output: String::new(),
            start_time_ms: None,
            stop_time_ms: None,
            pid: None,
            exit_code: None,
            run: None,
            next_seq: 0,
            watcher: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Human-readable name, falling back to the configuration file name.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn configuration_error(&self) -> Option<&str> {
        self.config_error.as_deref()
    }

    pub fn options(&self) -> Option<&TaskOptions> {
        self.options.as_ref()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn start_time_ms(&self) -> Option<u64> {
        self.start_time_ms
    }

    pub fn stop_time_ms(&self) -> Option<u64> {
        self.stop_time_ms
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Absorb a fresh load result for this configuration.
    pub(crate) fn apply_config(&mut self, loaded: &LoadedConfig) {
        self.config_error = loaded.error.clone();
        self.name = loaded
            .options
            .as_ref()
            .and_then(|options| options.name.clone());
        self.options = loaded.options.clone();
    }

    /// Start bookkeeping for a new run: fresh output, fresh timer.
    pub(crate) fn begin_run(&mut self, version: Digest) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.output.clear();
        self.start_time_ms = Some(now_ms());
        self.stop_time_ms = None;
        self.exit_code = None;
        self.run = Some(ActiveRun {
            seq,
            version,
            ready: false,
        });
        seq
    }

    pub(crate) fn append_output(&mut self, chunk: &str) {
        self.output.push_str(chunk);
    }

    pub(crate) fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub(crate) fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    pub(crate) fn stop_timer(&mut self) {
        if self.stop_time_ms.is_none() {
            self.stop_time_ms = Some(now_ms());
        }
    }

    /// Whether a message from child `seq` belongs to the current run.
    pub(crate) fn is_current_run(&self, seq: u64) -> bool {
        self.run.as_ref().map(|run| run.seq) == Some(seq)
    }

    /// Drop the watcher and any active-run bookkeeping. The caller kills the
    /// child process itself via its pid.
    pub(crate) fn dispose(&mut self) {
        self.watcher = None;
        self.run = None;
        self.pid = None;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
