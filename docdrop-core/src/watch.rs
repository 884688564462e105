//! Watch events and file readiness.
//!
//! The filesystem watcher adapter turns OS notifications into [`WatchEvent`]s.
//! This module decides which events name a candidate document and waits for
//! a candidate to stop growing before the pipeline reads it.

use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tracing::debug;

use crate::config::SettleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    /// Renamed or moved into the watched directory.
    MovedIn,
    DirectoryCreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Created,
        }
    }

    pub fn moved_in(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::MovedIn,
        }
    }
}

/// True for non-hidden files whose suffix is exactly `.{extension}`.
pub fn is_candidate(event: &WatchEvent, extension: &str) -> bool {
    if event.kind == WatchEventKind::DirectoryCreated {
        return false;
    }
    let Some(name) = event.path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        debug!(file = name, "Ignored hidden file");
        return false;
    }
    let matches = name
        .strip_suffix(extension)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|stem| !stem.is_empty());
    if !matches {
        debug!(file = name, "Ignored file with unrecognised extension");
    }
    matches
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Two consecutive size samples matched.
    Stable,
    /// Still changing after every check; processed anyway.
    Unstable,
    /// The file disappeared while settling.
    Vanished,
}

/// Wait the settle delay, then sample the size until it holds still.
pub async fn wait_until_settled(path: &Path, settle: &SettleConfig) -> Readiness {
    sleep(settle.delay()).await;

    let Some(mut previous) = file_size(path).await else {
        return Readiness::Vanished;
    };
    let checks = settle.max_checks.max(1);
    if checks == 1 {
        return Readiness::Stable;
    }
    for _ in 1..checks {
        sleep(settle.interval()).await;
        let Some(current) = file_size(path).await else {
            return Readiness::Vanished;
        };
        if current == previous {
            return Readiness::Stable;
        }
        debug!(file = %path.display(), previous, current, "File still growing");
        previous = current;
    }
    Readiness::Unstable
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
