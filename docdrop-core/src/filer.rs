//! Outcome filing.
//!
//! A source file is moved into its destination directory under a hidden
//! staging name first and then renamed to its final name within that
//! directory. The final rename is the only step that makes the file visible
//! under its real name.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    PreflightFailed,
    UploadFailed,
    RemoteExecFailed,
    TransformFailed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::PreflightFailed => "preflight_failed",
            Outcome::UploadFailed => "upload_failed",
            Outcome::RemoteExecFailed => "remote_exec_failed",
            Outcome::TransformFailed => "transform_failed",
        };
        f.write_str(s)
    }
}

/// A source that has been moved into the destination under its staging name
/// but not yet renamed into place.
#[derive(Debug)]
pub struct StagedMove {
    staged: PathBuf,
    final_path: PathBuf,
}

impl StagedMove {
    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Same-directory rename onto the final name.
    pub fn commit(self) -> io::Result<PathBuf> {
        if self.final_path.exists() {
            warn!(path = %self.final_path.display(), "Replacing existing file in destination");
        }
        fs::rename(&self.staged, &self.final_path)?;
        Ok(self.final_path)
    }
}

pub fn staging_name(file_name: &str) -> String {
    format!(".{file_name}.tmp")
}

/// Move `source` into `dest_dir` under its staging name, creating `dest_dir`
/// if needed.
pub fn stage_move(source: &Path, dest_dir: &Path) -> io::Result<StagedMove> {
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?
        .to_string_lossy()
        .into_owned();
    fs::create_dir_all(dest_dir)?;

    let staged = dest_dir.join(staging_name(&file_name));
    let final_path = dest_dir.join(&file_name);

    match fs::rename(source, &staged) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            debug!(source = %source.display(), dest = %dest_dir.display(), "Cross-device move, copying");
            copy_then_remove(source, &staged)?;
        }
        Err(e) => return Err(e),
    }

    Ok(StagedMove { staged, final_path })
}

/// Stage and commit in one go.
pub fn atomic_move(source: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    stage_move(source, dest_dir)?.commit()
}

fn copy_then_remove(source: &Path, staged: &Path) -> io::Result<()> {
    fs::copy(source, staged)?;
    File::open(staged)?.sync_all()?;
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(staged);
        return Err(e);
    }
    Ok(())
}

fn is_cross_device(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::CrossesDevices
}

/// Files sources into the processed or failed directory.
#[derive(Debug, Clone)]
pub struct OutcomeFiler {
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl OutcomeFiler {
    pub fn new(processed_dir: impl Into<PathBuf>, failed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
            failed_dir: failed_dir.into(),
        }
    }

    pub fn destination(&self, outcome: Outcome) -> &Path {
        if outcome.is_success() {
            &self.processed_dir
        } else {
            &self.failed_dir
        }
    }

    /// Move `source` to the directory for `outcome`. Never fails to the
    /// caller: a filing error is logged and the file is left for the operator.
    pub fn file_outcome(&self, source: &Path, outcome: Outcome) -> Option<PathBuf> {
        let dest_dir = self.destination(outcome);
        match atomic_move(source, dest_dir) {
            Ok(final_path) => {
                info!(
                    file = %source.display(),
                    dest = %final_path.display(),
                    %outcome,
                    "Filed document"
                );
                Some(final_path)
            }
            Err(e) => {
                error!(
                    file = %source.display(),
                    dest = %dest_dir.display(),
                    %outcome,
                    error = %e,
                    "Filing failed; operator intervention required"
                );
                None
            }
        }
    }
}
