//! Remote delivery: upload the enriched document, then run the remote build.
//!
//! Each operation opens its own session through the [`RemoteTransport`] and
//! closes it before returning, whether the operation succeeded or not.

use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::{ConflictPolicy, RemoteTarget};
use crate::contract::{ExecOutput, RemoteSession, RemoteTransport};
use crate::error::PipelineError;

/// `{upload_dir}/{stamp}_{file_name}` with a single separator.
pub fn remote_path_for(upload_dir: &str, stamp: &str, file_name: &str) -> String {
    format!("{}/{}_{}", upload_dir.trim_end_matches('/'), stamp, file_name)
}

/// Hidden sibling the upload is written to before being renamed into place.
pub fn part_path_for(remote_path: &str) -> String {
    let (dir, name) = match remote_path.rfind('/') {
        Some(idx) => (&remote_path[..idx + 1], &remote_path[idx + 1..]),
        None => ("", remote_path),
    };
    format!("{dir}.{name}.{}.part", uuid::Uuid::new_v4().simple())
}

pub struct Delivery<'a, T: ?Sized> {
    transport: &'a T,
    target: &'a RemoteTarget,
}

impl<'a, T> Delivery<'a, T>
where
    T: RemoteTransport + ?Sized,
{
    pub fn new(transport: &'a T, target: &'a RemoteTarget) -> Self {
        Self { transport, target }
    }

    /// Transfer `local` to `remote_path` via a hidden part file and a rename.
    pub async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), PipelineError> {
        let upload_failed = |source| PipelineError::UploadFailed {
            remote_path: remote_path.to_string(),
            source,
        };

        let mut session = self.transport.connect(self.target).await.map_err(upload_failed)?;
        let result = self.transfer(session.as_mut(), local, remote_path).await;
        close_session(session.as_mut()).await;

        match &result {
            Ok(()) => info!(
                local = %local.display(),
                host = %self.target.host,
                %remote_path,
                "Uploaded document"
            ),
            Err(e) => error!(%remote_path, error = %e, "Upload failed"),
        }
        result
    }

    async fn transfer(
        &self,
        session: &mut dyn RemoteSession,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), PipelineError> {
        let upload_failed = |source| PipelineError::UploadFailed {
            remote_path: remote_path.to_string(),
            source,
        };

        if self.target.on_conflict == ConflictPolicy::Reject
            && session.exists(remote_path).await.map_err(upload_failed)?
        {
            return Err(PipelineError::RemoteExists {
                remote_path: remote_path.to_string(),
            });
        }

        let part = part_path_for(remote_path);
        debug!(%part, "Writing upload to part file");

        if let Err(e) = session.put(local, &part).await {
            discard_part(session, &part).await;
            return Err(upload_failed(e));
        }
        if let Err(e) = session.rename(&part, remote_path).await {
            discard_part(session, &part).await;
            return Err(upload_failed(e));
        }
        Ok(())
    }

    /// Run `command` in a fresh session. Only a non-zero exit status counts as
    /// failure; stderr output is logged but tolerated.
    pub async fn execute(&self, command: &str) -> Result<ExecOutput, PipelineError> {
        let exec_failed = |source| PipelineError::RemoteExecFailed {
            command: command.to_string(),
            source,
        };

        let mut session = self.transport.connect(self.target).await.map_err(exec_failed)?;
        let result = session.exec(command).await;
        close_session(session.as_mut()).await;

        let output = result.map_err(exec_failed)?;
        if !output.stdout.is_empty() {
            info!(%command, stdout = %output.stdout, "Remote stdout");
        }
        if !output.stderr.is_empty() {
            warn!(%command, stderr = %output.stderr, "Remote stderr");
        }
        if !output.success() {
            error!(%command, exit_code = output.exit_code, "Remote command failed");
            return Err(PipelineError::RemoteExitStatus {
                command: command.to_string(),
                code: output.exit_code,
            });
        }
        info!(%command, "Remote command succeeded");
        Ok(output)
    }
}

async fn discard_part(session: &mut dyn RemoteSession, part: &str) {
    if let Err(e) = session.remove(part).await {
        debug!(%part, error = %e, "Could not remove part file");
    }
}

async fn close_session(session: &mut dyn RemoteSession) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close remote session cleanly");
    }
}
