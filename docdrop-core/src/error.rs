//! Error taxonomy for the pipeline.
//!
//! Credential and session errors describe what went wrong talking to the
//! remote host. [`PipelineError`] wraps them with the stage that failed and
//! maps onto exactly one [`Outcome`].

use crate::credential::KeyKind;
use crate::filer::Outcome;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no SSH credential configured: set remote.private_key_path or remote.password")]
    NoCredential,
    #[error("SSH private key file not found: {}", path.display())]
    KeyFileMissing { path: PathBuf },
    #[error("could not load key from {}; tried {}", path.display(), format_attempted(attempted))]
    UnloadableKey {
        path: PathBuf,
        attempted: Vec<KeyKind>,
    },
    #[error("failed to read key file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_attempted(attempted: &[KeyKind]) -> String {
    attempted
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("SSH handshake failed: {0}")]
    Handshake(String),
    #[error("host key for {host} does not match the known hosts store")]
    HostKeyMismatch { host: String },
    #[error("authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },
    #[error("file transfer failed: {0}")]
    Transfer(String),
    #[error("remote command failed: {0}")]
    Exec(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("preflight check failed: {host}:{port} unreachable")]
    PreflightUnreachable { host: String, port: u16 },
    #[error("failed to enrich {}: {source}", path.display())]
    TransformFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload to {remote_path} failed: {source}")]
    UploadFailed {
        remote_path: String,
        #[source]
        source: SessionError,
    },
    #[error("remote file {remote_path} already exists")]
    RemoteExists { remote_path: String },
    #[error("remote command `{command}` failed: {source}")]
    RemoteExecFailed {
        command: String,
        #[source]
        source: SessionError,
    },
    #[error("remote command `{command}` exited with code {code}")]
    RemoteExitStatus { command: String, code: i32 },
}

impl PipelineError {
    /// The filing outcome this failure leads to.
    pub fn outcome(&self) -> Outcome {
        match self {
            PipelineError::PreflightUnreachable { .. } => Outcome::PreflightFailed,
            PipelineError::TransformFailed { .. } => Outcome::TransformFailed,
            PipelineError::UploadFailed { .. } | PipelineError::RemoteExists { .. } => {
                Outcome::UploadFailed
            }
            PipelineError::RemoteExecFailed { .. } | PipelineError::RemoteExitStatus { .. } => {
                Outcome::RemoteExecFailed
            }
        }
    }
}
