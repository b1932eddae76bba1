//! Shared helpers for rundag integration tests: adjacency builders, a
//! recording run callback, and event-log draining.

pub mod builders;
pub mod recorder;

pub use builders::adjacency;
pub use recorder::{EventLog, RunRecorder};
