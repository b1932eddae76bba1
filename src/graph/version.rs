// src/graph/version.rs

//! Digest helpers for task identity and staleness tracking.
//!
//! Two digests are tracked per task:
//!
//! - the *subtree digest*: task id combined with the sorted subtree digests
//!   of its children. It changes iff the structural shape of the subtree
//!   rooted at the task changes.
//! - the *task version*: generation counter combined with the subtree
//!   digest. Any change invalidates in-flight executions.

use blake3::Hasher;

/// Opaque digest value. Wraps a blake3 hash; compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest(blake3::Hash);

impl Digest {
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Digest of a task's own id plus the sorted digests of its children.
///
/// `child_digests` must be sorted by the corresponding child task id; the
/// caller sorts so that dependency declaration order never leaks into the
/// digest.
pub fn subtree_digest(task_id: &str, child_digests: &[Digest]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(task_id.as_bytes());
    hasher.update(&[0]);
    for child in child_digests {
        hasher.update(child.as_bytes());
    }
    Digest(hasher.finalize())
}

/// Digest of `(generation, subtree_digest)`.
pub fn version_digest(generation: u64, subtree: &Digest) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(&generation.to_le_bytes());
    hasher.update(subtree.as_bytes());
    Digest(hasher.finalize())
}
