// src/proc/kill.rs

//! Whole-tree termination of detached child processes.
//!
//! Task children are spawned in their own process group, but a task may have
//! spawned further children in groups of their own. Interrupts go to the
//! child's own group; a hard kill walks the process table, follows `ppid`
//! links to find every descendant, and signals each distinct process group.
//! Errors for processes that already exited are swallowed.

use tracing::debug;

/// Which signal to deliver to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Polite stop (SIGINT on POSIX).
    Interrupt,
    /// Non-ignorable kill (SIGKILL on POSIX; forced `taskkill` on Windows).
    Kill,
}

/// One row of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub pgid: u32,
}

/// Terminate `pid` and every process below it.
#[cfg(windows)]
pub fn kill_process_tree(pid: u32, _signal: KillSignal) {
    // taskkill handles tree enumeration itself.
    let result = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .output();
    if let Err(err) = result {
        debug!(pid, error = %err, "taskkill failed; process likely already exited");
    }
}

/// Terminate `pid` and every process below it.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32, signal: KillSignal) {
    match signal {
        KillSignal::Interrupt => {
            // The child was spawned as a process group leader; signalling the
            // negated pid reaches the whole group.
            signal_group(pid, libc::SIGINT);
        }
        KillSignal::Kill => {
            let table = process_table();
            let tree = descendant_set(&table, pid);
            let mut groups: Vec<u32> = Vec::new();
            for entry in table.iter().filter(|e| tree.contains(&e.pid)) {
                let group = if entry.pgid == 0 { entry.pid } else { entry.pgid };
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
            if groups.is_empty() {
                groups.push(pid);
            }
            for group in groups {
                signal_group(group, libc::SIGKILL);
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: i32) {
    // Already-exited groups yield ESRCH; nothing to do about it.
    let rc = unsafe { libc::kill(-(pgid as i32), signal) };
    if rc != 0 {
        debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "signalling process group failed"
        );
    }
}

/// Collect `pid` plus all transitive children found in the table.
pub fn descendant_set(table: &[ProcessEntry], root: u32) -> std::collections::HashSet<u32> {
    let mut set = std::collections::HashSet::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if !set.insert(pid) {
            continue;
        }
        for entry in table.iter().filter(|e| e.ppid == pid) {
            stack.push(entry.pid);
        }
    }
    set
}

/// Snapshot of the live process table.
#[cfg(target_os = "linux")]
pub fn process_table() -> Vec<ProcessEntry> {
    let mut entries = Vec::new();
    let Ok(dir) = std::fs::read_dir("/proc") else {
        return entries;
    };
    for item in dir.flatten() {
        let name = item.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(item.path().join("stat")) else {
            continue;
        };
        if let Some(entry) = parse_proc_stat(pid, &stat) {
            entries.push(entry);
        }
    }
    entries
}

/// Snapshot of the live process table.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_table() -> Vec<ProcessEntry> {
    let output = std::process::Command::new("ps")
        .args(["-axo", "pid=,ppid=,pgid="])
        .output();
    let Ok(output) = output else {
        return Vec::new();
    };
    parse_ps_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse one `/proc/<pid>/stat` line. The command name is parenthesised and
/// may itself contain spaces or parentheses, so fields are located after the
/// *last* closing paren: `state ppid pgrp ...`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn parse_proc_stat(pid: u32, stat: &str) -> Option<ProcessEntry> {
    let tail = &stat[stat.rfind(')')? + 1..];
    let mut fields = tail.split_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgid = fields.next()?.parse().ok()?;
    Some(ProcessEntry { pid, ppid, pgid })
}

/// Parse `ps -axo pid=,ppid=,pgid=` output.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            let pgid = fields.next()?.parse().ok()?;
            Some(ProcessEntry { pid, ppid, pgid })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{descendant_set, parse_proc_stat, parse_ps_output, ProcessEntry};

    #[test]
    fn proc_stat_handles_parens_in_command_name() {
        let stat = "1234 (fun (name)) S 42 77 77 0 -1";
        let entry = parse_proc_stat(1234, stat).expect("parse");
        assert_eq!(
            entry,
            ProcessEntry {
                pid: 1234,
                ppid: 42,
                pgid: 77
            }
        );
    }

    #[test]
    fn ps_output_parses_rows() {
        let rows = parse_ps_output("  10   1  10\n  11  10  10\njunk\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].ppid, 10);
    }

    #[test]
    fn descendants_follow_ppid_links() {
        let table = vec![
            ProcessEntry { pid: 1, ppid: 0, pgid: 1 },
            ProcessEntry { pid: 10, ppid: 1, pgid: 10 },
            ProcessEntry { pid: 11, ppid: 10, pgid: 10 },
            ProcessEntry { pid: 12, ppid: 11, pgid: 12 },
            ProcessEntry { pid: 99, ppid: 1, pgid: 99 },
        ];
        let set = descendant_set(&table, 10);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&10) && set.contains(&11) && set.contains(&12));
        assert!(!set.contains(&99));
    }
}
