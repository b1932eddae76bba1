// src/workspace/watch.rs

//! Per-project filesystem watching.
//!
//! Each project watches its declared watch list, its own configuration file,
//! and the conventional manifest siblings in its directory. Events filtered
//! through the ignore set become change messages into the workspace loop; a
//! change to the configuration file itself also requests a config re-read.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TaskOptions;
use crate::graph::TaskId;
use crate::workspace::core::WorkspaceMsg;
use crate::workspace::MANIFEST_SIBLINGS;

/// Keeps the underlying watcher alive; dropping it stops file watching.
pub(crate) struct ProjectWatcher {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for ProjectWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWatcher").finish()
    }
}

/// Ignore entries: glob-looking ones compile to a [`GlobSet`], the rest
/// match as path prefixes (covering whole ignored directories).
#[derive(Debug, Default)]
pub(crate) struct IgnoreSet {
    globs: GlobSet,
    prefixes: Vec<PathBuf>,
}

impl IgnoreSet {
    pub(crate) fn new(entries: &[PathBuf]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut prefixes = Vec::new();

        for entry in entries {
            let text = entry.to_string_lossy();
            if text.contains(['*', '?', '[', '{']) {
                match Glob::new(&text) {
                    Ok(glob) => {
                        builder.add(glob);
                    }
                    Err(err) => {
                        warn!(pattern = %text, error = %err, "invalid ignore pattern; skipping");
                    }
                }
            } else {
                prefixes.push(entry.clone());
            }
        }

        let globs = builder.build().unwrap_or_else(|err| {
            warn!(error = %err, "failed to build ignore globs; ignoring none");
            GlobSet::empty()
        });

        Self { globs, prefixes }
    }

    pub(crate) fn is_ignored(&self, path: &Path) -> bool {
        if self.prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
        self.globs.is_match(path)
    }
}

/// Start watching for one project. Missing watch paths are skipped with a
/// debug log; watcher errors are never fatal.
pub(crate) fn spawn_project_watcher(
    project: TaskId,
    config_path: &Path,
    options: Option<&TaskOptions>,
    msg_tx: mpsc::UnboundedSender<WorkspaceMsg>,
) -> Result<ProjectWatcher> {
    let ignore = IgnoreSet::new(
        options
            .map(|opts| opts.ignore.as_slice())
            .unwrap_or_default(),
    );
    let config_path_owned = config_path.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in &event.paths {
                    if ignore.is_ignored(path) {
                        continue;
                    }
                    let config_changed = path == &config_path_owned;
                    if msg_tx
                        .send(WorkspaceMsg::Changed {
                            task: project.clone(),
                            config_changed,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(err) => {
                // Transient watcher trouble is logged, never escalated.
                eprintln!("rundag: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    for path in watch_targets(config_path, options) {
        if !path.exists() {
            debug!(path = %path.display(), "watch target missing; skipping");
            continue;
        }
        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        if let Err(err) = watcher.watch(&path, mode) {
            warn!(path = %path.display(), error = %err, "failed to watch path");
        }
    }

    debug!(config = %config_path.display(), "project watcher armed");
    Ok(ProjectWatcher { _inner: watcher })
}

/// The union of declared watch paths, the configuration file itself, and the
/// manifest siblings next to it.
fn watch_targets(config_path: &Path, options: Option<&TaskOptions>) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = options
        .map(|opts| opts.watch.clone())
        .unwrap_or_default();
    targets.push(config_path.to_path_buf());
    if let Some(dir) = config_path.parent() {
        for sibling in MANIFEST_SIBLINGS {
            targets.push(dir.join(sibling));
        }
    }
    targets.sort();
    targets.dedup();
    targets
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{watch_targets, IgnoreSet};
    use crate::config::TaskOptions;

    #[test]
    fn prefix_entries_cover_subtrees() {
        let ignore = IgnoreSet::new(&[PathBuf::from("/repo/target")]);
        assert!(ignore.is_ignored(Path::new("/repo/target/debug/app")));
        assert!(!ignore.is_ignored(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn glob_entries_match_patterns() {
        let ignore = IgnoreSet::new(&[PathBuf::from("/repo/**/*.tmp")]);
        assert!(ignore.is_ignored(Path::new("/repo/a/b/scratch.tmp")));
        assert!(!ignore.is_ignored(Path::new("/repo/a/b/scratch.rs")));
    }

    #[test]
    fn targets_include_config_and_manifests() {
        let options = TaskOptions {
            name: None,
            watch: vec![PathBuf::from("/repo/src")],
            ignore: Vec::new(),
            deps: Vec::new(),
        };
        let targets = watch_targets(Path::new("/repo/task.sh"), Some(&options));
        assert!(targets.contains(&PathBuf::from("/repo/src")));
        assert!(targets.contains(&PathBuf::from("/repo/task.sh")));
        assert!(targets.contains(&PathBuf::from("/repo/package.json")));
    }
}
