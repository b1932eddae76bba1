//! A recording run callback and an event-log drain for graph tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use rundag::graph::{GraphEvent, RunCallback, RunRequest};

/// Records every [`RunRequest`] the graph dispatches so tests can complete
/// them explicitly, in the order they choose.
#[derive(Clone, Default)]
pub struct RunRecorder {
    requests: Arc<Mutex<VecDeque<RunRequest>>>,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback to hand to `TaskGraph::new`.
    pub fn callback(&self) -> RunCallback {
        let requests = Arc::clone(&self.requests);
        Box::new(move |req| {
            requests
                .lock()
                .expect("run recorder poisoned")
                .push_back(req);
        })
    }

    /// Pop the oldest pending request, if any.
    pub fn pop(&self) -> Option<RunRequest> {
        self.requests
            .lock()
            .expect("run recorder poisoned")
            .pop_front()
    }

    /// Pop the pending request for a specific task.
    pub fn pop_task(&self, task: &str) -> Option<RunRequest> {
        let mut guard = self.requests.lock().expect("run recorder poisoned");
        let index = guard.iter().position(|req| req.task == task)?;
        guard.remove(index)
    }

    /// Task names of all pending requests, in dispatch order.
    pub fn pending(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("run recorder poisoned")
            .iter()
            .map(|req| req.task.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requests
            .lock()
            .expect("run recorder poisoned")
            .is_empty()
    }
}

/// Drains a graph event receiver into compact `started:x` / `finished:x` /
/// `reset:x` entries, the shape scheduling assertions are written against.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<GraphEvent>,
}

impl EventLog {
    pub fn new(rx: mpsc::UnboundedReceiver<GraphEvent>) -> Self {
        Self { rx }
    }

    /// All task lifecycle events queued so far; tree status transitions are
    /// filtered out.
    pub fn drain(&mut self) -> Vec<String> {
        let mut entries = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                GraphEvent::TaskStarted(task) => entries.push(format!("started:{task}")),
                GraphEvent::TaskFinished { task, .. } => entries.push(format!("finished:{task}")),
                GraphEvent::TaskReset(task) => entries.push(format!("reset:{task}")),
                GraphEvent::TreeStatusChanged(_) => {}
            }
        }
        entries
    }

    /// Tree status transitions queued so far, as `tree:<status>` entries;
    /// task lifecycle events are discarded.
    pub fn drain_statuses(&mut self) -> Vec<String> {
        let mut entries = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if let GraphEvent::TreeStatusChanged(status) = event {
                entries.push(format!("tree:{status}"));
            }
        }
        entries
    }

    /// Discard everything queued so far.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
