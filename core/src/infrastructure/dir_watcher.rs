// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Directory watcher: hands a directory's current
//! contents plus a stream of future changes to a handler, arming on
//! the parent first if the target doesn't exist yet.

use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum DirWatcherError {
    #[error("neither {0} nor its parent exist")]
    InvalidState(PathBuf),
    #[error("{0} is a symlink, refusing to watch")]
    SymlinkRejected(PathBuf),
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

impl crate::error::HasErrorKind for DirWatcherError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            DirWatcherError::InvalidState(_) => crate::error::ErrorKind::InvalidState,
            DirWatcherError::SymlinkRejected(_) => crate::error::ErrorKind::InvalidArgument,
            DirWatcherError::Notify(_) => crate::error::ErrorKind::Internal,
        }
    }
}

/// One observed change: the target either came into existence (its
/// current listing is delivered as a snapshot by the caller of
/// [`watch`], not by this event) or was touched.
pub enum DirChange {
    TargetAppeared,
    Changed(Event),
}

/// Start watching `target`. Returns a receiver of [`DirChange`]s; the
/// watcher itself is kept alive by the task it's moved into and is
/// dropped (stopping delivery) only when the channel's last receiver
/// is dropped.
pub fn watch(target: impl Into<PathBuf>) -> Result<mpsc::UnboundedReceiver<DirChange>, DirWatcherError> {
    let target = target.into();

    if target.is_symlink() {
        return Err(DirWatcherError::SymlinkRejected(target));
    }

    let (tx, rx) = mpsc::unbounded_channel();

    if target.is_dir() {
        spawn_watch(target, tx, true)?;
        return Ok(rx);
    }

    let parent = target.parent().map(Path::to_path_buf);
    match parent {
        Some(parent) if parent.is_dir() => {
            spawn_watch_for_appearance(parent, target, tx)?;
            Ok(rx)
        }
        _ => Err(DirWatcherError::InvalidState(target)),
    }
}

fn spawn_watch(
    target: PathBuf,
    tx: mpsc::UnboundedSender<DirChange>,
    _already_exists: bool,
) -> Result<(), DirWatcherError> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = raw_tx.send(res);
    })?;
    watcher.watch(&target, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        let _watcher = watcher;
        while let Some(res) = raw_rx.recv().await {
            match res {
                Ok(event) => {
                    if tx.send(DirChange::Changed(event)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "directory watch handler error"),
            }
        }
    });
    Ok(())
}

fn spawn_watch_for_appearance(
    parent: PathBuf,
    target: PathBuf,
    tx: mpsc::UnboundedSender<DirChange>,
) -> Result<(), DirWatcherError> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = raw_tx.send(res);
    })?;
    watcher.watch(&parent, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        let mut watcher = watcher;
        while let Some(res) = raw_rx.recv().await {
            match res {
                Ok(event) if event.paths.iter().any(|p| p == &target) => {
                    if target.is_dir() {
                        let _ = watcher.unwatch(&parent);
                        if tx.send(DirChange::TargetAppeared).is_err() {
                            return;
                        }
                        if let Err(e) = watcher.watch(&target, RecursiveMode::NonRecursive) {
                            tracing::warn!(error = %e, "failed to re-arm watch on target");
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "directory watch handler error"),
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn watching_existing_directory_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut rx = watch(dir.path()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("new.txt"), b"x").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(change.is_ok(), "expected a change notification");
    }

    #[tokio::test]
    async fn missing_target_with_missing_parent_is_invalid_state() {
        let err = watch(PathBuf::from("/this/does/not/exist/at/all")).unwrap_err();
        assert!(matches!(err, DirWatcherError::InvalidState(_)));
    }

    #[tokio::test]
    async fn symlink_to_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = watch(&link).unwrap_err();
        assert!(matches!(err, DirWatcherError::SymlinkRejected(_)));
    }
}
