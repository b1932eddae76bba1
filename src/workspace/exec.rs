// src/workspace/exec.rs

//! Spawning and supervising task children.
//!
//! Each dispatch spawns the configuration script through the platform shell
//! in its own directory and its own process group. Line readers feed output
//! back into the workspace loop; the supervisor waits on either process exit
//! or the dispatch's cancel token.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::loader::parent_dir;
use crate::graph::TaskId;
use crate::proc::{kill_process_tree, shell_command, KillSignal};
use crate::workspace::core::{OutputStream, WorkspaceMsg};
use crate::workspace::{
    ExecOptions, ENV_FILE_ENV, FORCE_COLOR_ENV, READY_SENTINEL, RUNNER_ENV, WATCH_ENV,
};

/// Spawn the child process for one dispatch and wire its lifecycle into the
/// workspace loop. Returns the child pid.
pub(crate) fn spawn_task_child(
    task: &TaskId,
    config_path: &std::path::Path,
    seq: u64,
    watch_mode: bool,
    exec: &ExecOptions,
    cancel: oneshot::Receiver<()>,
    msg_tx: mpsc::UnboundedSender<WorkspaceMsg>,
) -> Result<u32> {
    let dir = parent_dir(config_path);

    let mut cmd = shell_command(config_path);
    cmd.current_dir(&dir)
        .env(RUNNER_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if watch_mode {
        cmd.env(WATCH_ENV, "1");
    }
    if let Some(env_file) = &exec.env_file {
        cmd.env(ENV_FILE_ENV, env_file);
    }
    if exec.force_colors {
        cmd.env(FORCE_COLOR_ENV, "1");
    }

    // Own process group, so the whole subtree can be signalled at once.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;
    let pid = child.id().context("child pid unavailable after spawn")?;

    info!(task = %task, pid, seq, "task process started");

    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(
            stdout,
            OutputStream::Stdout,
            task.clone(),
            seq,
            msg_tx.clone(),
        );
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(
            stderr,
            OutputStream::Stderr,
            task.clone(),
            seq,
            msg_tx.clone(),
        );
    }

    let task = task.clone();
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(err) => {
                        debug!(task = %task, error = %err, "waiting for task process failed");
                        -1
                    }
                };
                let _ = msg_tx.send(WorkspaceMsg::Exited { task, seq, code });
            }
            fired = cancel => {
                match fired {
                    Ok(()) => {
                        info!(task = %task, pid, seq, "dispatch cancelled; killing process tree");
                        kill_process_tree(pid, KillSignal::Kill);
                        let _ = child.wait().await;
                        let _ = msg_tx.send(WorkspaceMsg::Cancelled { task, seq });
                    }
                    Err(_) => {
                        // Cancel sender dropped without firing (engine went
                        // away); the child dies via kill_on_drop.
                        debug!(task = %task, seq, "cancel channel closed without cancellation");
                    }
                }
            }
        }
    });

    Ok(pid)
}

/// Forward lines from one child pipe into the loop. The readiness sentinel
/// is a control message, not output.
fn spawn_line_reader<R>(
    pipe: R,
    stream: OutputStream,
    task: TaskId,
    seq: u64,
    msg_tx: mpsc::UnboundedSender<WorkspaceMsg>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reader = BufReader::new(pipe);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let msg = if stream == OutputStream::Stdout && line == READY_SENTINEL {
                WorkspaceMsg::Ready {
                    task: task.clone(),
                    seq,
                }
            } else {
                WorkspaceMsg::Line {
                    task: task.clone(),
                    seq,
                    stream,
                    text: line,
                }
            };
            if msg_tx.send(msg).is_err() {
                return;
            }
        }
    });
}
