// src/config/loader.rs

//! Transitive configuration discovery.
//!
//! Each configuration script is probed by running it with the dump marker
//! set; the script answers with one JSON line and exits 0. Probes within a
//! wave run in parallel; newly discovered `deps` form the next wave until
//! the closure is complete.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::model::{DeclaredOptions, TaskOptions};
use crate::config::DUMP_CONFIG_ENV;
use crate::proc::{run_captured, shell_command};

/// Result of loading one configuration path.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_path: PathBuf,
    /// Present when the configuration could not be loaded; `options` is then
    /// `None`.
    pub error: Option<String>,
    pub options: Option<TaskOptions>,
}

impl LoadedConfig {
    fn failed(config_path: PathBuf, error: String) -> Self {
        Self {
            config_path,
            error: Some(error),
            options: None,
        }
    }

    fn ok(config_path: PathBuf, options: TaskOptions) -> Self {
        Self {
            config_path,
            error: None,
            options: Some(options),
        }
    }
}

/// Make a path absolute and stable enough to serve as a task id.
pub fn absolutize(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        }
    }
}

/// Load the given root configurations and the transitive closure of their
/// `deps`. Returns one entry per discovered absolute configuration path;
/// load failures are recorded per entry, never propagated as a hard error.
pub async fn load_configs(roots: &[PathBuf]) -> HashMap<PathBuf, LoadedConfig> {
    let mut results: HashMap<PathBuf, LoadedConfig> = HashMap::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut pending: Vec<PathBuf> = roots.iter().map(|p| absolutize(p)).collect();

    while !pending.is_empty() {
        let wave: Vec<PathBuf> = pending
            .drain(..)
            .filter(|path| seen.insert(path.clone()))
            .collect();
        if wave.is_empty() {
            break;
        }

        let mut probes = JoinSet::new();
        for path in wave {
            probes.spawn(probe_config(path));
        }

        while let Some(joined) = probes.join_next().await {
            let loaded = match joined {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(error = %err, "configuration probe task failed");
                    continue;
                }
            };

            if let Some(options) = &loaded.options {
                for dep in &options.deps {
                    let dep = absolutize(dep);
                    if !seen.contains(&dep) {
                        pending.push(dep);
                    }
                }
            }
            results.insert(loaded.config_path.clone(), loaded);
        }
    }

    results
}

/// Probe one configuration script for its declared options.
async fn probe_config(config_path: PathBuf) -> LoadedConfig {
    if !config_path.exists() {
        return LoadedConfig::failed(
            config_path.clone(),
            format!(
                "cannot find configuration file {}",
                config_path.display()
            ),
        );
    }

    let config_dir = parent_dir(&config_path);

    let mut cmd = shell_command(&config_path);
    cmd.current_dir(&config_dir).env(DUMP_CONFIG_ENV, "1");

    debug!(config = %config_path.display(), "probing configuration");

    let captured = match run_captured(cmd).await {
        Ok(captured) => captured,
        Err(err) => {
            return LoadedConfig::failed(
                config_path,
                format!("failed to run configuration probe: {err:#}"),
            );
        }
    };

    if captured.exit_code != 0 {
        return LoadedConfig::failed(
            config_path,
            format!(
                "configuration probe exited with code {}:\n{}",
                captured.exit_code,
                captured.combined.trim_end()
            ),
        );
    }

    // The record may arrive on either stream; scan both in arrival order.
    let declared = captured
        .combined
        .lines()
        .find_map(DeclaredOptions::parse_line);

    match declared {
        Some(declared) => {
            let options = declared.resolve(&config_dir);
            LoadedConfig::ok(config_path, options)
        }
        None => LoadedConfig::failed(
            config_path,
            format!(
                "configuration probe printed no declared options:\n{}",
                captured.combined.trim_end()
            ),
        ),
    }
}

/// Directory a configuration lives in; paths and child processes resolve
/// against it.
pub fn parent_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
