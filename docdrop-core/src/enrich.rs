//! Front matter enrichment.
//!
//! Produces a transient working copy of a watched document with a generated
//! front matter block prepended. The original file is only read, never
//! written.

use chrono::NaiveDate;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

pub const FRONT_MATTER_DELIMITER: &str = "---";

/// `05OCT2025` style stamp used in front matter and remote file names.
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%d%b%Y").to_string().to_uppercase()
}

/// Turns a file stem like `my_notes` into `My Notes`.
///
/// Underscores become spaces; the first letter of every run of letters is
/// upper-cased and the rest of the run lower-cased.
pub fn title_from_stem(stem: &str) -> String {
    let mut title = String::with_capacity(stem.len());
    let mut in_word = false;
    for ch in stem.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if in_word {
                title.extend(ch.to_lowercase());
            } else {
                title.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            title.push(ch);
            in_word = false;
        }
    }
    title
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub author: String,
    pub date: String,
}

impl FrontMatter {
    pub fn for_file(file_name: &str, author: &str, date: NaiveDate) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        Self {
            title: title_from_stem(&stem),
            author: author.to_string(),
            date: date_stamp(date),
        }
    }

    /// Delimited block followed by one blank line.
    pub fn render(&self) -> String {
        format!(
            "{d}\ntitle: {}\nauthor: {}\ndate: {}\n{d}\n\n",
            self.title,
            self.author,
            self.date,
            d = FRONT_MATTER_DELIMITER
        )
    }
}

/// Working copy owned by one pipeline run.
///
/// The file is removed by [`EnrichedArtifact::remove`], or when the value is
/// dropped.
#[derive(Debug)]
pub struct EnrichedArtifact {
    path: TempPath,
    front_matter: FrontMatter,
}

impl EnrichedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn front_matter(&self) -> &FrontMatter {
        &self.front_matter
    }

    /// Delete the working copy. A file that is already gone is fine.
    pub fn remove(self) {
        let path: PathBuf = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!(artifact = %path.display(), "Removed enriched artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(artifact = %path.display(), "Enriched artifact already absent")
            }
            Err(e) => warn!(artifact = %path.display(), error = %e, "Failed to remove enriched artifact"),
        }
    }
}

/// Write front matter plus the untouched original bytes to a fresh temporary
/// file in `work_dir`.
pub fn enrich(
    source: &Path,
    author: &str,
    date: NaiveDate,
    work_dir: &Path,
) -> Result<EnrichedArtifact, PipelineError> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let original = fs::read(source).map_err(|e| PipelineError::TransformFailed {
        path: source.to_path_buf(),
        source: e,
    })?;

    let front_matter = FrontMatter::for_file(&file_name, author, date);
    debug!(file = %file_name, title = %front_matter.title, date = %front_matter.date, "Generated front matter");

    let suffix = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let write_failed = |e: io::Error| PipelineError::TransformFailed {
        path: work_dir.to_path_buf(),
        source: e,
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".docdrop-")
        .suffix(&suffix)
        .tempfile_in(work_dir)
        .map_err(write_failed)?;
    temp.write_all(front_matter.render().as_bytes())
        .map_err(write_failed)?;
    temp.write_all(&original).map_err(write_failed)?;
    temp.as_file().sync_all().map_err(write_failed)?;

    let path = temp.into_temp_path();
    info!(file = %file_name, artifact = %path.display(), "Enriched document");

    Ok(EnrichedArtifact { path, front_matter })
}
