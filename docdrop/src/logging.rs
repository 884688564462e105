//! Logging setup: one plain-text layer appending to the configured log file
//! and one console layer on stderr.

use anyhow::{Context, Result};
use docdrop_core::config::AgentSection;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Map the configured level (Python-style names are accepted) onto a
/// tracing filter directive.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_directive(level)))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(agent: &AgentSection) -> Result<()> {
    if let Some(parent) = agent.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&agent.log_file)
        .with_context(|| format!("Failed to open log file {}", agent.log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(filter(&agent.log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter(&agent.log_level)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
