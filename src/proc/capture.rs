// src/proc/capture.rs

//! Spawn a subprocess and collect its output.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Everything a finished probe produced.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Both streams merged in arrival order.
    pub combined: String,
}

/// Spawn `cmd` with piped stdio and resolve once it closes.
///
/// Both pipes are drained concurrently so neither can fill up and stall the
/// child; each line also lands in the shared combined transcript.
pub async fn run_captured(mut cmd: Command) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawning capture subprocess")?;

    let combined = Arc::new(Mutex::new(String::new()));

    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(drain_lines(pipe, Arc::clone(&combined))));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(drain_lines(pipe, Arc::clone(&combined))));

    let status = child
        .wait()
        .await
        .context("waiting for capture subprocess")?;

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let combined = combined
        .lock()
        .map(|guard| guard.clone())
        .unwrap_or_default();

    Ok(CapturedOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        combined,
    })
}

async fn drain_lines<R>(pipe: R, combined: Arc<Mutex<String>>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut own = String::new();
    let reader = BufReader::new(pipe);
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        own.push_str(&line);
        own.push('\n');
        if let Ok(mut guard) = combined.lock() {
            guard.push_str(&line);
            guard.push('\n');
        }
    }

    own
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use tokio::process::Command;

    use super::run_captured;

    #[tokio::test]
    async fn captures_streams_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");

        let captured = run_captured(cmd).await.expect("capture");
        assert_eq!(captured.exit_code, 3);
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
        assert!(captured.combined.contains("out"));
        assert!(captured.combined.contains("err"));
    }
}
