/// `load_config` module: loads the static YAML config and injects secrets from the environment.
///
/// This is the only place where the user-supplied YAML is parsed into the
/// strongly-typed [`AgentConfig`] shared by the pipeline.
///
/// # Responsibilities
/// - Parse the YAML document into [`AgentConfig`]; missing required keys are
///   reported by name.
/// - Override `remote.password` with `DOCDROP_REMOTE_PASSWORD` when set, so
///   the secret can live in `.env` instead of the YAML file.
/// - Expand a leading `~/` in path values.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary. A
/// missing config file is fatal before any watching begins.
use anyhow::{Context, Result};
use docdrop_core::config::AgentConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const PASSWORD_ENV: &str = "DOCDROP_REMOTE_PASSWORD";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: AgentConfig = serde_yaml::from_str(&config_content)
        .map_err(|e| {
            error!(error = %e, config_path = ?path_ref, "Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {:?}", path_ref))?;

    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            info!(env = PASSWORD_ENV, "Remote password taken from environment");
            config.remote.password = Some(password);
        }
    }

    let agent = &mut config.agent;
    for path in [
        &mut agent.watch_dir,
        &mut agent.processed_dir,
        &mut agent.failed_dir,
        &mut agent.log_file,
    ] {
        *path = expand_home(path);
    }
    agent.work_dir = agent.work_dir.as_deref().map(expand_home);

    let remote = &mut config.remote;
    remote.private_key_path = remote.private_key_path.as_deref().map(expand_home);
    remote.known_hosts = remote.known_hosts.as_deref().map(expand_home);

    info!(config_path = ?path_ref, "Config loaded successfully");
    Ok(config)
}

/// Replace a leading `~` component with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
