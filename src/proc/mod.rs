// src/proc/mod.rs

//! Child-process helpers shared by the config loader and the workspace:
//! capture-and-wait spawning and whole-tree termination.

pub mod capture;
pub mod kill;

pub use capture::{run_captured, CapturedOutput};
pub use kill::{kill_process_tree, KillSignal};

use std::path::Path;

use tokio::process::Command;

/// Build a command that runs a configuration script through the platform
/// shell. Tasks are plain executables from the runner's point of view; going
/// through the shell keeps scripts portable without an exec bit.
pub fn shell_command(script: &Path) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg(script);
        c
    };
    cmd.kill_on_drop(true);
    cmd
}
