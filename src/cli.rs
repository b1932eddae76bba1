// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::graph::JobLimit;

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run task scripts in dependency order, re-running only what is stale.",
    long_about = None
)]
pub struct CliArgs {
    /// Root configuration scripts; their dependency closure forms the task
    /// graph.
    #[arg(value_name = "CONFIG", required = true)]
    pub roots: Vec<PathBuf>,

    /// Maximum number of tasks running at once ("unlimited" or a number;
    /// 0 also means unlimited).
    #[arg(long, value_name = "N", default_value = "unlimited")]
    pub jobs: JobLimit,

    /// Keep running: watch declared inputs and re-run stale tasks.
    #[arg(long)]
    pub watch: bool,

    /// Env file path handed to task children via the environment.
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Ask task children to emit color even without a TTY.
    #[arg(long)]
    pub force_colors: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
