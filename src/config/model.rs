// src/config/model.rs

//! The declared-options record printed by a configuration script.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// A field that accepts either one string or a list of strings.
///
/// Scripts commonly declare `"watch": "src"`; the single-string form
/// normalizes to a one-element list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Raw record as printed by the script. Unknown keys are tolerated so that
/// configurations can carry extra metadata for other tools.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeclaredOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub watch: OneOrMany,
    #[serde(default)]
    pub ignore: OneOrMany,
    #[serde(default)]
    pub deps: OneOrMany,
}

impl DeclaredOptions {
    /// Parse one line of output as a declared-options record.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Resolve all declared paths against the configuration's own directory.
    pub fn resolve(self, config_dir: &Path) -> TaskOptions {
        TaskOptions {
            name: self.name,
            watch: resolve_paths(config_dir, self.watch.into_vec()),
            ignore: resolve_paths(config_dir, self.ignore.into_vec()),
            deps: resolve_paths(config_dir, self.deps.into_vec()),
        }
    }
}

/// Declared options with every path made absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub watch: Vec<PathBuf>,
    pub ignore: Vec<PathBuf>,
    pub deps: Vec<PathBuf>,
}

fn resolve_paths(base: &Path, entries: Vec<String>) -> Vec<PathBuf> {
    entries
        .into_iter()
        .map(|entry| {
            let path = Path::new(&entry);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::DeclaredOptions;

    #[test]
    fn single_string_fields_become_lists() {
        let line = r#"{"name":"build","watch":"src","deps":["../lib/task.sh"]}"#;
        let declared = DeclaredOptions::parse_line(line).expect("parse");
        let options = declared.resolve(Path::new("/repo/app"));

        assert_eq!(options.name.as_deref(), Some("build"));
        assert_eq!(options.watch, vec![PathBuf::from("/repo/app/src")]);
        assert_eq!(options.deps, vec![PathBuf::from("/repo/app/../lib/task.sh")]);
        assert!(options.ignore.is_empty());
    }

    #[test]
    fn absolute_paths_pass_through() {
        let line = r#"{"ignore":["/tmp/cache"]}"#;
        let options = DeclaredOptions::parse_line(line)
            .expect("parse")
            .resolve(Path::new("/repo"));
        assert_eq!(options.ignore, vec![PathBuf::from("/tmp/cache")]);
    }

    #[test]
    fn non_json_lines_are_skipped() {
        assert!(DeclaredOptions::parse_line("starting up...").is_none());
        assert!(DeclaredOptions::parse_line("").is_none());
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let line = r#"{"name":"x","extra":{"a":1}}"#;
        assert!(DeclaredOptions::parse_line(line).is_some());
    }
}
