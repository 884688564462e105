//! # docdrop CLI
//!
//! Command parsing and wiring for the `docdrop` binary. All pipeline logic
//! lives in `docdrop-core`; this module loads configuration, installs logging
//! and connects the real adapters ([`SshTransport`], the `notify` watcher) to
//! the core [`Pipeline`].
//!
//! ## Commands
//! - `watch`: run the agent until interrupted.
//! - `check`: one-shot connectivity diagnostic (key detection, reachability,
//!   login, trivial remote command).
use crate::load_config::load_config;
use crate::logging::init_logging;
use crate::ssh::SshTransport;
use crate::watcher::{watch_directory, EVENT_CHANNEL_CAPACITY};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docdrop_core::config::{AgentConfig, AgentSection};
use docdrop_core::contract::{ExecOutput, ReachabilityProbe, RemoteTransport, SystemClock};
use docdrop_core::credential::{load_private_key, Credential};
use docdrop_core::pipeline::Pipeline;
use docdrop_core::precheck::TcpProbe;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Remote command used by `docdrop check`.
pub const CHECK_COMMAND: &str = "echo docdrop-check";

/// CLI for docdrop: publish new documents from a watched directory.
#[derive(Parser)]
#[clap(
    name = "docdrop",
    version,
    about = "Watch a directory, add front matter to new documents and publish them over SSH"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the configured directory and process new documents until interrupted
    Watch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Verify key loading, reachability and login against the remote host
    Check {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Watch { config } => {
            let config = Arc::new(load_config(&config)?);
            init_logging(&config.agent)?;
            config.trace_loaded();
            prepare_directories(&config.agent)?;
            watch(config).await
        }
        Commands::Check { config } => {
            let config = load_config(&config)?;
            init_logging(&config.agent)?;
            config.trace_loaded();
            let output = check(&config, &SshTransport, &TcpProbe).await?;
            println!("Check succeeded: {}", output.stdout.trim());
            Ok(())
        }
    }
}

fn prepare_directories(agent: &AgentSection) -> Result<()> {
    for dir in [&agent.watch_dir, &agent.processed_dir, &agent.failed_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

async fn watch(config: Arc<AgentConfig>) -> Result<()> {
    tracing::info!(command = "watch", "Starting docdrop agent");
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let _watcher = watch_directory(&config.agent.watch_dir, tx).with_context(|| {
        format!(
            "Failed to watch directory {}",
            config.agent.watch_dir.display()
        )
    })?;

    let pipeline = Pipeline::new(config.clone(), SshTransport, TcpProbe, SystemClock);
    let report = pipeline.run_until(rx, shutdown_signal()).await;
    tracing::info!(command = "watch", ?report, "docdrop agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}

/// Walk the same steps a real delivery takes, short of uploading anything.
pub async fn check<T, P>(config: &AgentConfig, transport: &T, probe: &P) -> Result<ExecOutput>
where
    T: RemoteTransport,
    P: ReachabilityProbe,
{
    let remote = &config.remote;

    match Credential::resolve(remote)? {
        Credential::PrivateKey(path) => {
            let key = load_private_key(&path)?;
            println!("Private key {} loaded as {}", key.path.display(), key.kind);
        }
        Credential::Password(_) => println!("Using password authentication"),
    }

    if !probe
        .reachable(&remote.host, remote.port, remote.connect_timeout())
        .await
    {
        anyhow::bail!("{}:{} is unreachable", remote.host, remote.port);
    }
    println!("{}:{} is reachable", remote.host, remote.port);

    let mut session = transport
        .connect(remote)
        .await
        .with_context(|| format!("Failed to open session as {}@{}", remote.user, remote.host))?;
    let result = session.exec(CHECK_COMMAND).await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close check session cleanly");
    }

    let output = result.context("Remote check command failed")?;
    if !output.stderr.is_empty() {
        eprintln!("Remote stderr: {}", output.stderr.trim());
    }
    if !output.success() {
        anyhow::bail!("Remote check command exited with code {}", output.exit_code);
    }
    Ok(output)
}
