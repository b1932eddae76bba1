// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod multimap;
pub mod proc;
pub mod workspace;

use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::errors::{Result, RundagError};
use crate::workspace::{ExecOptions, Workspace, WorkspaceOptions, WorkspaceStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workspace construction (which schedules the initial configuration read)
/// - Ctrl-C handling
/// - the event loop, either until settled (one-shot) or until stopped
///   (watch mode)
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    if args.roots.is_empty() {
        return Err(RundagError::ConfigError(
            "at least one root configuration is required".to_string(),
        ));
    }

    let options = WorkspaceOptions {
        roots: args.roots,
        jobs: args.jobs,
        watch_mode: args.watch,
        exec: ExecOptions {
            env_file: args.env_file,
            force_colors: args.force_colors,
        },
    };

    info!(jobs = %options.jobs, watch = options.watch_mode, "starting workspace");

    let (mut workspace, mut events) = Workspace::new(options);

    // Ctrl-C -> graceful stop.
    {
        let handle = workspace.handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            handle.stop();
        });
    }

    // Mirror child output onto our own stdio; a richer front end would
    // subscribe to the same events.
    tokio::spawn(async move {
        use crate::workspace::WorkspaceEvent;
        while let Some(event) = events.recv().await {
            match event {
                WorkspaceEvent::BuildStdout { chunk, .. } => print!("{chunk}"),
                WorkspaceEvent::BuildStderr { chunk, .. } => eprint!("{chunk}"),
                WorkspaceEvent::WorkspaceStatusChanged(status) => {
                    debug!(%status, "workspace status changed");
                }
                _ => {}
            }
        }
    });

    let status = if workspace.watch_mode() {
        workspace.run().await;
        workspace.workspace_status()
    } else {
        let status = workspace.run_to_settled().await;
        workspace.stop();
        status
    };

    if let Some(error) = workspace.workspace_error() {
        eprintln!("{error}");
    }

    Ok(match status {
        WorkspaceStatus::Fail | WorkspaceStatus::Error => 1,
        _ => 0,
    })
}
