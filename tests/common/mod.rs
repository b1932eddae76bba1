// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise tracing once for the whole test binary, at debug level.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Write a task configuration script.
///
/// When probed (dump marker set) it prints `declared` and exits 0; when run
/// as a task it executes `body`.
#[cfg(unix)]
pub fn write_config(dir: &Path, name: &str, declared: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "if [ -n \"${}\" ]; then\n  echo '{}'\n  exit 0\nfi\n{}\n",
        rundag::config::DUMP_CONFIG_ENV,
        declared,
        body
    );
    std::fs::write(&path, script).expect("write config script");
    path
}
