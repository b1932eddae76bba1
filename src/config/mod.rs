// src/config/mod.rs

//! Task configuration discovery.
//!
//! A configuration is an external script. Asked via an environment marker,
//! it prints its declared options as a single line of JSON and exits; the
//! loader walks the transitive `deps` closure of the root configurations.

pub mod loader;
pub mod model;

pub use loader::{load_configs, LoadedConfig};
pub use model::TaskOptions;

/// Environment marker telling a configuration script to print its declared
/// options and exit successfully.
pub const DUMP_CONFIG_ENV: &str = "RUNDAG_DUMP_CONFIG";
