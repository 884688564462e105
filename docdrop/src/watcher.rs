//! Filesystem notifications via `notify`, translated into core [`WatchEvent`]s
//! and forwarded over a bounded channel.

use docdrop_core::watch::{WatchEvent, WatchEventKind};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Start watching `dir` (non-recursively). Events stop when the returned
/// watcher is dropped.
pub fn watch_directory(
    dir: &Path,
    tx: mpsc::Sender<WatchEvent>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for watch_event in translate(&event) {
                tracing::debug!(path = %watch_event.path.display(), kind = ?watch_event.kind, "Filesystem event");
                if tx.blocking_send(watch_event).is_err() {
                    tracing::debug!("Event receiver closed; dropping event");
                    return;
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Watcher error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), "Watching directory");
    Ok(watcher)
}

/// Map a raw notification onto the events the pipeline cares about.
pub fn translate(event: &Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(CreateKind::Folder) => Some(WatchEventKind::DirectoryCreated),
        EventKind::Create(_) => None,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(WatchEventKind::MovedIn),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => Some(WatchEventKind::MovedIn),
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            let kind = match (&event.kind, kind) {
                (EventKind::Create(_), None) if path.is_dir() => WatchEventKind::DirectoryCreated,
                (EventKind::Create(_), None) => WatchEventKind::Created,
                // Some backends report both halves of a rename as `Any`.
                (EventKind::Modify(ModifyKind::Name(RenameMode::Any)), _) if !path.exists() => {
                    return None
                }
                (_, Some(kind)) => kind,
                (_, None) => return None,
            };
            Some(WatchEvent {
                path: path.clone(),
                kind,
            })
        })
        .collect()
}
