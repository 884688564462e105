//! Immutable agent configuration.
//!
//! One [`AgentConfig`] is built at startup and shared (behind an `Arc`) with
//! every component. Nothing in the crate reads configuration from globals.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_AUTHOR: &str = "Alex";
pub const DEFAULT_EXTENSION: &str = "md";
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub remote: RemoteTarget,
}

impl AgentConfig {
    pub fn trace_loaded(&self) {
        info!(
            watch_dir = %self.agent.watch_dir.display(),
            processed_dir = %self.agent.processed_dir.display(),
            failed_dir = %self.agent.failed_dir.display(),
            remote_host = %self.remote.host,
            remote_user = %self.remote.user,
            "Loaded agent config"
        );
        debug!(
            upload_dir = %self.remote.upload_dir,
            build_command = %self.remote.build_command,
            has_private_key = self.remote.private_key_path.is_some(),
            has_password = self.remote.password.is_some(),
            on_conflict = ?self.remote.on_conflict,
            "Remote target details"
        );
    }
}

/// Local side of the agent: directories, logging and readiness tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    pub watch_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Operator identity written into every front matter block.
    #[serde(default = "default_author")]
    pub author: String,
    /// Recognised file suffix, without the dot. Matched case-sensitively.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Where enriched artifacts are written. Falls back to the system temp dir.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub settle: SettleConfig,
}

impl AgentSection {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Readiness check applied between detection and processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_settle_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_settle_max_checks")]
    pub max_checks: u32,
}

impl SettleConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_settle_delay_ms(),
            interval_ms: default_settle_interval_ms(),
            max_checks: default_settle_max_checks(),
        }
    }
}

/// The single remote host documents are delivered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub upload_dir: String,
    pub build_command: String,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for the remote build. `None` leaves it unbounded.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl RemoteTarget {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// What to do when the dated remote file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing file through an atomic rename.
    #[default]
    Replace,
    /// Fail the upload and leave the remote file alone.
    Reject,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_author() -> String {
    DEFAULT_AUTHOR.to_string()
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_settle_interval_ms() -> u64 {
    250
}

fn default_settle_max_checks() -> u32 {
    8
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout_secs() -> u64 {
    5
}
