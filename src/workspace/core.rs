// src/workspace/core.rs

//! The workspace event loop.
//!
//! All graph and project mutation happens here, one message at a time. The
//! graph's run callback, the filesystem watchers, the child-process readers
//! and supervisors only *send* messages; completions therefore reach the
//! graph on a later turn than the dispatch that caused them, which is what
//! keeps scheduling from re-entering itself.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::loader::{absolutize, load_configs, LoadedConfig};
use crate::graph::cycle::render_cycle;
use crate::graph::{GraphEvent, RunRequest, TaskGraph, TaskId, TaskStatus};
use crate::multimap::Multimap;
use crate::proc::{kill_process_tree, KillSignal};
use crate::workspace::exec::spawn_task_child;
use crate::workspace::project::Project;
use crate::workspace::watch::spawn_project_watcher;
use crate::workspace::{
    path_id, WorkspaceEvent, WorkspaceOptions, WorkspaceStatus, UPDATE_DEBOUNCE,
};

/// Which child pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Messages consumed by the workspace loop.
#[derive(Debug)]
pub(crate) enum WorkspaceMsg {
    /// A watched input of `task` changed; `config_changed` requests a
    /// configuration re-read as well.
    Changed { task: TaskId, config_changed: bool },
    /// The coalescing debounce fired.
    UpdateTimer,
    /// The graph requested a run (forwarded from its callback).
    RunTask(RunRequest),
    /// Output line from the current child of `task`.
    Line {
        task: TaskId,
        seq: u64,
        stream: OutputStream,
        text: String,
    },
    /// The readiness sentinel arrived on the child's stdout.
    Ready { task: TaskId, seq: u64 },
    /// The child process closed.
    Exited { task: TaskId, seq: u64, code: i32 },
    /// The dispatch's cancel token fired and the child tree was killed.
    Cancelled { task: TaskId, seq: u64 },
    /// Stop the workspace (Ctrl-C or embedding application).
    Stop,
}

/// At-most-one pending coalesced update.
#[derive(Debug, Default)]
struct PendingUpdate {
    changed: HashSet<TaskId>,
    reread_configs: bool,
    timer: Option<JoinHandle<()>>,
    updating: bool,
}

impl PendingUpdate {
    fn is_dirty(&self) -> bool {
        self.reread_configs || !self.changed.is_empty()
    }
}

/// Cloneable handle for poking a running workspace from outside its loop.
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    msg_tx: mpsc::UnboundedSender<WorkspaceMsg>,
}

impl WorkspaceHandle {
    pub fn stop(&self) {
        let _ = self.msg_tx.send(WorkspaceMsg::Stop);
    }

    /// Request a re-run of one project, as if its inputs had changed.
    pub fn schedule_update(&self, task: TaskId) {
        let _ = self.msg_tx.send(WorkspaceMsg::Changed {
            task,
            config_changed: false,
        });
    }
}

/// Top-level orchestrator. See the module docs for the threading model.
pub struct Workspace {
    options: WorkspaceOptions,
    graph: TaskGraph,
    graph_events: mpsc::UnboundedReceiver<GraphEvent>,
    projects: HashMap<TaskId, Project>,
    pending: PendingUpdate,
    msg_tx: mpsc::UnboundedSender<WorkspaceMsg>,
    msg_rx: mpsc::UnboundedReceiver<WorkspaceMsg>,
    events: mpsc::UnboundedSender<WorkspaceEvent>,
    cycle_error: Option<String>,
    last_status: WorkspaceStatus,
    stopped: bool,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("projects", &self.projects.len())
            .field("status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Build a workspace and schedule the initial configuration read.
    ///
    /// The returned receiver carries [`WorkspaceEvent`]s; drive the loop
    /// with [`Workspace::run`], [`Workspace::run_to_settled`] or
    /// [`Workspace::tick`].
    pub fn new(options: WorkspaceOptions) -> (Self, mpsc::UnboundedReceiver<WorkspaceEvent>) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (graph_tx, graph_rx) = mpsc::unbounded_channel();

        let callback_tx = msg_tx.clone();
        let graph = TaskGraph::new(
            options.jobs,
            graph_tx,
            Box::new(move |req| {
                let _ = callback_tx.send(WorkspaceMsg::RunTask(req));
            }),
        );

        let mut workspace = Self {
            options,
            graph,
            graph_events: graph_rx,
            projects: HashMap::new(),
            pending: PendingUpdate::default(),
            msg_tx,
            msg_rx,
            events: event_tx,
            cycle_error: None,
            last_status: WorkspaceStatus::Pending,
            stopped: false,
        };
        workspace.request_update(None, true);
        (workspace, event_rx)
    }

    pub fn handle(&self) -> WorkspaceHandle {
        WorkspaceHandle {
            msg_tx: self.msg_tx.clone(),
        }
    }

    pub fn watch_mode(&self) -> bool {
        self.options.watch_mode
    }

    /// `error` while the last configuration read produced a cycle, otherwise
    /// the graph's tree status.
    pub fn workspace_status(&self) -> WorkspaceStatus {
        if self.cycle_error.is_some() {
            WorkspaceStatus::Error
        } else {
            self.graph.tree_status().into()
        }
    }

    /// Human-readable description of the error state, if any.
    pub fn workspace_error(&self) -> Option<&str> {
        self.cycle_error.as_deref()
    }

    /// Projects in breadth-first graph order (dependants before their
    /// dependencies); projects without a graph task (error state) follow,
    /// sorted by id.
    pub fn bfs_projects(&self) -> Vec<&Project> {
        let mut ordered: Vec<&Project> = self
            .graph
            .bfs_order()
            .into_iter()
            .filter_map(|id| self.projects.get(&id))
            .collect();

        let mut rest: Vec<&Project> = self
            .projects
            .values()
            .filter(|project| !self.graph.contains(project.id()))
            .collect();
        rest.sort_by(|a, b| a.id().cmp(b.id()));
        ordered.extend(rest);
        ordered
    }

    pub fn direct_dependencies(&self, project: &Project) -> Vec<&Project> {
        self.graph
            .children_of(project.id())
            .iter()
            .filter_map(|id| self.projects.get(id))
            .collect()
    }

    pub fn direct_dependants(&self, project: &Project) -> Vec<&Project> {
        self.graph
            .parents_of(project.id())
            .iter()
            .filter_map(|id| self.projects.get(id))
            .collect()
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn project_status(&self, id: &str) -> TaskStatus {
        self.graph.task_status(id)
    }

    /// Force an update pass that marks this project's task as changed.
    pub fn schedule_update(&mut self, task: &str) {
        self.request_update(Some(task.to_string()), false);
    }

    /// Cancel pending updates, reset all tasks, dispose all projects.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        info!("stopping workspace");
        self.stopped = true;

        if let Some(timer) = self.pending.timer.take() {
            timer.abort();
        }
        self.pending.changed.clear();
        self.pending.reread_configs = false;

        self.graph.reset_all_tasks();
        self.drain_graph_events();

        let mut ids: Vec<TaskId> = self.projects.keys().cloned().collect();
        ids.sort();
        for id in ids {
            self.dispose_project(&id);
        }
        self.emit(WorkspaceEvent::ProjectsChanged);
        self.refresh_status();
    }

    /// Drive the loop until stopped.
    pub async fn run(&mut self) {
        while !self.stopped {
            let Some(msg) = self.msg_rx.recv().await else {
                break;
            };
            self.process(msg).await;
        }
    }

    /// Drive the loop until the workspace settles (`ok`, `fail` or `error`
    /// with nothing pending) or is stopped. Returns the settled status.
    pub async fn run_to_settled(&mut self) -> WorkspaceStatus {
        while !self.stopped && !self.is_settled() {
            let Some(msg) = self.msg_rx.recv().await else {
                break;
            };
            self.process(msg).await;
        }
        self.workspace_status()
    }

    /// Process a single queued message, waiting at most `timeout` for one to
    /// arrive. Returns whether a message was processed.
    pub async fn tick(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.msg_rx.recv()).await {
            Ok(Some(msg)) => {
                self.process(msg).await;
                true
            }
            _ => false,
        }
    }

    fn is_settled(&self) -> bool {
        !self.pending.is_dirty()
            && self.pending.timer.is_none()
            && !self.pending.updating
            && matches!(
                self.workspace_status(),
                WorkspaceStatus::Ok | WorkspaceStatus::Fail | WorkspaceStatus::Error
            )
    }

    async fn process(&mut self, msg: WorkspaceMsg) {
        match msg {
            WorkspaceMsg::Changed {
                task,
                config_changed,
            } => {
                self.request_update(Some(task), config_changed);
            }
            WorkspaceMsg::UpdateTimer => {
                self.run_update().await;
            }
            WorkspaceMsg::RunTask(req) => {
                self.handle_run_task(req);
            }
            WorkspaceMsg::Line {
                task,
                seq,
                stream,
                text,
            } => {
                self.handle_line(&task, seq, stream, text);
            }
            WorkspaceMsg::Ready { task, seq } => {
                self.handle_ready(&task, seq);
            }
            WorkspaceMsg::Exited { task, seq, code } => {
                self.handle_exited(&task, seq, code);
            }
            WorkspaceMsg::Cancelled { task, seq } => {
                self.handle_cancelled(&task, seq);
            }
            WorkspaceMsg::Stop => {
                self.stop();
            }
        }
    }

    /// Merge a change notification into the pending update and make sure a
    /// debounce timer is armed. During an in-flight update the merge alone
    /// is enough: the update's tail re-arms the timer.
    fn request_update(&mut self, changed: Option<TaskId>, reread_configs: bool) {
        if self.stopped {
            return;
        }
        if let Some(task) = changed {
            self.pending.changed.insert(task);
        }
        self.pending.reread_configs |= reread_configs;

        if self.pending.updating {
            return;
        }
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        if self.pending.timer.is_some() {
            return;
        }
        let msg_tx = self.msg_tx.clone();
        self.pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(UPDATE_DEBOUNCE).await;
            let _ = msg_tx.send(WorkspaceMsg::UpdateTimer);
        }));
    }

    /// One coalesced update pass.
    async fn run_update(&mut self) {
        if self.stopped {
            return;
        }
        self.pending.timer = None;
        self.pending.updating = true;

        let changed: Vec<TaskId> = self.pending.changed.drain().collect();
        let reread = std::mem::take(&mut self.pending.reread_configs);

        debug!(changed = changed.len(), reread, "running coalesced update");

        let mut sorted_changed = changed;
        sorted_changed.sort();
        for task in &sorted_changed {
            self.graph.mark_changed(task);
        }

        if reread {
            self.reread_configs().await;
        }
        self.drain_graph_events();

        self.pending.updating = false;
        if self.pending.is_dirty() {
            // More notifications arrived while this pass ran; go again
            // instead of running a soon-to-be-stale graph.
            self.arm_timer();
        } else {
            self.graph.run();
            self.drain_graph_events();
        }
        self.refresh_status();
    }

    async fn reread_configs(&mut self) {
        let loaded = load_configs(&self.options.roots).await;

        let mut adjacency: Multimap<TaskId, TaskId> = Multimap::new();
        for (path, config) in &loaded {
            let deps: Vec<TaskId> = config
                .options
                .iter()
                .flat_map(|options| options.deps.iter())
                .map(|dep| path_id(&absolutize(dep)))
                .collect();
            adjacency.insert_all(path_id(path), deps);
        }

        match self.graph.set_tasks(adjacency) {
            Ok(()) => {
                if self.cycle_error.take().is_some() {
                    info!("configuration cycle resolved");
                }
            }
            Err(err) => {
                warn!(cycle = %render_cycle(&err.cycle), "configuration cycle detected");
                self.graph.clear();
                self.cycle_error = Some(format!(
                    "dependency cycle between configurations: {}",
                    render_cycle(&err.cycle)
                ));
            }
        }

        self.reconcile_projects(loaded);
    }

    /// Bring the project set in line with the loaded configuration set.
    fn reconcile_projects(&mut self, loaded: HashMap<PathBuf, LoadedConfig>) {
        let loaded: HashMap<TaskId, LoadedConfig> = loaded
            .into_iter()
            .map(|(path, config)| (path_id(&path), config))
            .collect();

        let mut changed = false;

        let mut existing: Vec<TaskId> = self.projects.keys().cloned().collect();
        existing.sort();
        for id in existing {
            if !loaded.contains_key(&id) {
                self.dispose_project(&id);
                changed = true;
            }
        }

        let mut incoming: Vec<&TaskId> = loaded.keys().collect();
        incoming.sort();
        for id in incoming {
            let config = &loaded[id];
            if !self.projects.contains_key(id) {
                let project = Project::new(id.clone(), config.config_path.clone());
                self.projects.insert(id.clone(), project);
                self.emit(WorkspaceEvent::ProjectAdded(id.clone()));
                changed = true;
                debug!(project = %id, "project added");
            }
            if let Some(project) = self.projects.get_mut(id) {
                project.apply_config(config);
            }

            if self.options.watch_mode {
                self.arm_watcher(id);
            }
        }

        if changed {
            self.emit(WorkspaceEvent::ProjectsChanged);
        }
    }

    fn arm_watcher(&mut self, id: &TaskId) {
        let Some(project) = self.projects.get_mut(id) else {
            return;
        };
        let watcher = spawn_project_watcher(
            id.clone(),
            project.config_path(),
            project.options(),
            self.msg_tx.clone(),
        );
        match watcher {
            Ok(watcher) => project.watcher = Some(watcher),
            Err(err) => {
                warn!(project = %id, error = %err, "failed to arm filesystem watcher");
            }
        }
    }

    /// Dispatch request from the graph: run this project's task.
    fn handle_run_task(&mut self, req: RunRequest) {
        let id = req.task.clone();

        let Some(project) = self.projects.get_mut(&id) else {
            warn!(task = %id, "dispatch for unknown project; completing as failure");
            self.complete_and_reschedule(&id, req.version, false);
            return;
        };

        // Configuration never loaded: fail immediately with the error as the
        // run's whole output.
        if let Some(error) = project.configuration_error().map(str::to_string) {
            project.begin_run(req.version);
            project.append_output(&error);
            project.append_output("\n");
            project.stop_timer();
            let chunk = format!("{error}\n");
            self.emit(WorkspaceEvent::BuildStderr { task: id.clone(), chunk });
            self.complete_and_reschedule(&id, req.version, false);
            return;
        }

        // At most one child per project: terminate any prior tree first.
        if let Some(prior_pid) = project.pid() {
            debug!(task = %id, pid = prior_pid, "terminating prior child tree");
            kill_process_tree(prior_pid, KillSignal::Kill);
        }

        let seq = project.begin_run(req.version);
        let config_path = project.config_path().clone();

        let spawned = spawn_task_child(
            &id,
            &config_path,
            seq,
            self.options.watch_mode,
            &self.options.exec,
            req.cancel,
            self.msg_tx.clone(),
        );

        match spawned {
            Ok(pid) => {
                if let Some(project) = self.projects.get_mut(&id) {
                    project.set_pid(Some(pid));
                }
                self.emit(WorkspaceEvent::PidChanged {
                    task: id,
                    pid: Some(pid),
                });
            }
            Err(err) => {
                warn!(task = %id, error = %err, "failed to spawn task process");
                let chunk = format!("{err:#}\n");
                if let Some(project) = self.projects.get_mut(&id) {
                    project.append_output(&chunk);
                    project.stop_timer();
                    project.run = None;
                }
                self.emit(WorkspaceEvent::BuildStderr {
                    task: id.clone(),
                    chunk,
                });
                self.complete_and_reschedule(&id, req.version, false);
            }
        }
    }

    fn handle_line(&mut self, task: &TaskId, seq: u64, stream: OutputStream, text: String) {
        let Some(project) = self.projects.get_mut(task) else {
            return;
        };
        if !project.is_current_run(seq) {
            return;
        }
        let chunk = format!("{text}\n");
        project.append_output(&chunk);
        let event = match stream {
            OutputStream::Stdout => WorkspaceEvent::BuildStdout {
                task: task.clone(),
                chunk,
            },
            OutputStream::Stderr => WorkspaceEvent::BuildStderr {
                task: task.clone(),
                chunk,
            },
        };
        self.emit(event);
    }

    /// Readiness sentinel: the task is successful even though the process
    /// keeps running.
    fn handle_ready(&mut self, task: &TaskId, seq: u64) {
        let Some(project) = self.projects.get_mut(task) else {
            return;
        };
        if !project.is_current_run(seq) {
            return;
        }
        let Some(run) = project.run.as_mut() else {
            return;
        };
        if run.ready {
            return;
        }
        run.ready = true;
        let version = run.version;
        project.stop_timer();

        debug!(task = %task, "readiness sentinel received");
        self.complete_and_reschedule(task, version, true);
    }

    fn handle_exited(&mut self, task: &TaskId, seq: u64, code: i32) {
        let Some(project) = self.projects.get_mut(task) else {
            return;
        };
        if !project.is_current_run(seq) {
            return;
        }

        project.set_exit_code(code);
        project.stop_timer();
        project.set_pid(None);

        // The run record stays in place so that output lines still draining
        // from the closed pipes keep landing in this run's buffer.
        let (ready, version) = match project.run.as_ref() {
            Some(run) => (run.ready, run.version),
            None => return,
        };

        self.emit(WorkspaceEvent::PidChanged {
            task: task.clone(),
            pid: None,
        });

        if ready {
            // Already successful via the sentinel; the exit is informational.
            let chunk = format!("process exited with code={code}\n");
            if let Some(project) = self.projects.get_mut(task) {
                project.append_output(&chunk);
            }
            self.emit(WorkspaceEvent::BuildStdout {
                task: task.clone(),
                chunk,
            });
            self.refresh_status();
        } else {
            self.complete_and_reschedule(task, version, code == 0);
        }
    }

    fn handle_cancelled(&mut self, task: &TaskId, seq: u64) {
        let Some(project) = self.projects.get_mut(task) else {
            return;
        };
        if !project.is_current_run(seq) {
            return;
        }

        let chunk = "terminated\n".to_string();
        project.append_output(&chunk);
        project.stop_timer();
        project.set_pid(None);
        project.run = None;

        self.emit(WorkspaceEvent::BuildStderr {
            task: task.clone(),
            chunk,
        });
        self.emit(WorkspaceEvent::PidChanged {
            task: task.clone(),
            pid: None,
        });
        self.refresh_status();
    }

    /// Report a completion to the graph and, when accepted, let it schedule
    /// the next pass. This always happens while no `run()` is on the stack:
    /// every caller sits in a message handler.
    fn complete_and_reschedule(&mut self, task: &str, version: crate::graph::Digest, success: bool) {
        self.graph.on_complete(task, version, success);
        self.drain_graph_events();
        self.graph.run();
        self.drain_graph_events();
        self.refresh_status();
    }

    fn dispose_project(&mut self, id: &TaskId) {
        let Some(mut project) = self.projects.remove(id) else {
            return;
        };
        if let Some(pid) = project.pid() {
            kill_process_tree(pid, KillSignal::Kill);
        }
        project.dispose();
        self.emit(WorkspaceEvent::ProjectRemoved(id.clone()));
        debug!(project = %id, "project disposed");
    }

    /// Forward graph events to workspace consumers.
    fn drain_graph_events(&mut self) {
        let mut drained = Vec::new();
        while let Ok(event) = self.graph_events.try_recv() {
            drained.push(event);
        }
        for event in drained {
            match event {
                GraphEvent::TaskStarted(id)
                | GraphEvent::TaskReset(id)
                | GraphEvent::TaskFinished { task: id, .. } => {
                    self.emit(WorkspaceEvent::BuildStatusChanged(id));
                }
                GraphEvent::TreeStatusChanged(_) => {
                    self.refresh_status();
                }
            }
        }
    }

    fn refresh_status(&mut self) {
        let status = self.workspace_status();
        if status != self.last_status {
            self.last_status = status;
            self.emit(WorkspaceEvent::WorkspaceStatusChanged(status));
        }
    }

    fn emit(&self, event: WorkspaceEvent) {
        let _ = self.events.send(event);
    }
}

/// Convenience: make a workspace options value for a set of roots with
/// everything else defaulted.
pub fn options_for_roots<P: AsRef<Path>>(roots: &[P]) -> WorkspaceOptions {
    WorkspaceOptions {
        roots: roots.iter().map(|p| p.as_ref().to_path_buf()).collect(),
        jobs: Default::default(),
        watch_mode: false,
        exec: Default::default(),
    }
}
