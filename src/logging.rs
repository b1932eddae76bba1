// src/logging.rs

//! Logging bootstrap.
//!
//! rundag mirrors task output onto its own stdio, so the runner's own
//! diagnostics always go to stderr. The level comes from the `--log-level`
//! flag when given, otherwise from [`LOG_ENV`], otherwise `info`.

use anyhow::Result;

use crate::cli::LogLevel;

/// Environment variable controlling the runner's own log level.
pub const LOG_ENV: &str = "RUNDAG_LOG";

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("installing tracing subscriber: {err}"))
}

/// Flag beats environment beats the `info` default. An unparseable
/// environment value falls back to the default rather than failing startup.
fn resolve_level(flag: Option<LogLevel>, env: Option<&str>) -> tracing::Level {
    if let Some(flag) = flag {
        return flag.into();
    }
    env.and_then(|value| value.trim().parse().ok())
        .unwrap_or(tracing::Level::INFO)
}
