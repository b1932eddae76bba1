//! Adjacency construction helpers.

use rundag::graph::TaskId;
use rundag::multimap::Multimap;

/// Build a task adjacency from `(task, [deps])` entries.
///
/// ```
/// use rundag_test_utils::adjacency;
///
/// let adj = adjacency(&[("root", &["leaf"]), ("leaf", &[])]);
/// assert!(adj.contains(&"root".to_string(), &"leaf".to_string()));
/// ```
pub fn adjacency(entries: &[(&str, &[&str])]) -> Multimap<TaskId, TaskId> {
    entries
        .iter()
        .map(|(task, deps)| {
            (
                task.to_string(),
                deps.iter().map(|dep| dep.to_string()).collect::<Vec<_>>(),
            )
        })
        .collect()
}
