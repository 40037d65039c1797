// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Filesystem-backed [`Snapshotter`]: prepares a writable directory for
//! a new snapshot by materializing its parent chain from layer blobs in
//! the content store, then commits it by diffing against the parent and
//! exporting a layer.

use crate::domain::diffkey::Change;
use crate::domain::snapshot::{Digest, Snapshot, SnapshotError};
use crate::infrastructure::content_store::ContentStore;
use crate::infrastructure::differ;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn prepare(&self, parent: Option<Digest>) -> Result<Snapshot, SnapshotError>;
    async fn commit(&self, snapshot: Snapshot) -> Result<Snapshot, SnapshotError>;
    async fn remove(&self, digest: &Digest) -> Result<(), SnapshotError>;
    fn mountpoint(&self, digest: &Digest) -> Option<PathBuf>;
}

/// A [`Snapshotter`] that materializes each committed snapshot's full
/// tree under `<data-root>/snapshots/<digest>` by applying its parent
/// chain of exported layers, caching that materialization so a chain of
/// N ancestors is only ever replayed once per process lifetime.
pub struct FsSnapshotter {
    root: PathBuf,
    store: ContentStore,
    materialized: Mutex<HashMap<String, PathBuf>>,
    layers: Mutex<HashMap<String, Vec<u8>>>,
    parents: Mutex<HashMap<String, Option<Digest>>>,
}

impl FsSnapshotter {
    pub fn new(data_root: impl Into<PathBuf>, store: ContentStore) -> std::io::Result<Self> {
        let root = data_root.into().join("snapshots");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            store,
            materialized: Mutex::new(HashMap::new()),
            layers: Mutex::new(HashMap::new()),
            parents: Mutex::new(HashMap::new()),
        })
    }

    fn staging_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(format!("staging-{}", digest.as_str()))
    }

    fn committed_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.as_str())
    }

    /// Recursively walk `digest`'s parent chain (base-first) and apply
    /// each layer into `dest`, using the in-memory materialization
    /// cache to avoid re-walking ancestors already on disk elsewhere.
    fn materialize(&self, digest: &Digest, dest: &Path) -> Result<(), SnapshotError> {
        if let Some(cached) = self.materialized.lock().get(digest.as_str()).cloned() {
            copy_tree(&cached, dest)?;
            return Ok(());
        }

        let mut chain = Vec::new();
        let mut cursor = Some(digest.clone());
        while let Some(d) = cursor {
            let layer = self
                .layers
                .lock()
                .get(d.as_str())
                .cloned()
                .ok_or_else(|| SnapshotError::NotFound(d.to_string()))?;
            chain.push(layer);
            cursor = self.parents.lock().get(d.as_str()).cloned().flatten();
        }
        chain.reverse();

        differ::apply_chain(&chain, dest)
            .map_err(|e| SnapshotError::Corruption(e.to_string()))?;
        self.materialized.lock().insert(digest.as_str().to_string(), dest.to_path_buf());
        Ok(())
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), SnapshotError> {
    std::fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| SnapshotError::Io(std::io::Error::other(e.to_string())))?;
        let rel = entry.path().strip_prefix(src).expect("walkdir yields paths under src");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Snapshotter for FsSnapshotter {
    async fn prepare(&self, parent: Option<Digest>) -> Result<Snapshot, SnapshotError> {
        let placeholder = Digest::new(format!("pending-{}", uuid::Uuid::new_v4()));
        let staging = self.staging_path(&placeholder);
        std::fs::create_dir_all(&staging)?;

        if let Some(parent_digest) = &parent {
            self.materialize(parent_digest, &staging)?;
        }

        Ok(Snapshot::prepared(placeholder, parent, staging))
    }

    async fn commit(&self, mut snapshot: Snapshot) -> Result<Snapshot, SnapshotError> {
        if !snapshot.is_prepared() {
            return Err(SnapshotError::InvalidState(format!(
                "snapshot {} is not prepared",
                snapshot.digest
            )));
        }
        let staging = snapshot
            .mountpoint
            .clone()
            .ok_or_else(|| SnapshotError::InvalidState("prepared snapshot has no mountpoint".into()))?;

        let parent_root = match &snapshot.parent {
            Some(p) => self.materialized.lock().get(p.as_str()).cloned(),
            None => None,
        };

        let changes: Vec<Change> = differ::diff_trees(parent_root.as_deref(), &staging)
            .map_err(|e| SnapshotError::Corruption(e.to_string()))?;
        let diff_key = crate::domain::diffkey::DiffKey::compute(
            snapshot.parent.as_ref().map(|p| p.as_str()),
            &changes,
        );

        let layer_bytes = differ::export_layer(&staging, &changes)
            .map_err(|e| SnapshotError::Corruption(e.to_string()))?;
        let content_digest = self
            .store
            .put(&layer_bytes)
            .map_err(|e| SnapshotError::Io(std::io::Error::other(e.to_string())))?;

        let size = dir_size(&staging)?;
        let final_digest = Digest::new(content_digest.as_str().to_string());

        self.layers.lock().insert(final_digest.as_str().to_string(), layer_bytes);
        self.parents.lock().insert(final_digest.as_str().to_string(), snapshot.parent.clone());

        let committed_path = self.committed_path(&final_digest);
        if committed_path.exists() {
            std::fs::remove_dir_all(&staging)?;
        } else {
            std::fs::rename(&staging, &committed_path)?;
        }
        self.materialized.lock().insert(final_digest.as_str().to_string(), committed_path);

        snapshot.digest = final_digest;
        snapshot.commit(diff_key, size)?;
        Ok(snapshot)
    }

    async fn remove(&self, digest: &Digest) -> Result<(), SnapshotError> {
        let path = self.committed_path(digest);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        self.materialized.lock().remove(digest.as_str());
        self.layers.lock().remove(digest.as_str());
        self.parents.lock().remove(digest.as_str());
        Ok(())
    }

    fn mountpoint(&self, digest: &Digest) -> Option<PathBuf> {
        self.materialized.lock().get(digest.as_str()).cloned()
    }
}

fn dir_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_commit_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let snapshotter = FsSnapshotter::new(dir.path(), store).unwrap();

        let snap = snapshotter.prepare(None).await.unwrap();
        let mountpoint = snap.mountpoint.clone().unwrap();
        std::fs::write(mountpoint.join("hello.txt"), b"hi").unwrap();

        let committed = snapshotter.commit(snap).await.unwrap();
        assert!(committed.is_committed());
        assert!(committed.size > 0);

        let mp = snapshotter.mountpoint(&committed.digest).unwrap();
        assert_eq!(std::fs::read(mp.join("hello.txt")).unwrap(), b"hi");

        snapshotter.remove(&committed.digest).await.unwrap();
        assert!(snapshotter.mountpoint(&committed.digest).is_none());
    }

    #[tokio::test]
    async fn child_snapshot_inherits_parent_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let snapshotter = FsSnapshotter::new(dir.path(), store).unwrap();

        let base = snapshotter.prepare(None).await.unwrap();
        std::fs::write(base.mountpoint.clone().unwrap().join("base.txt"), b"base").unwrap();
        let base = snapshotter.commit(base).await.unwrap();

        let child = snapshotter.prepare(Some(base.digest.clone())).await.unwrap();
        let child_mount = child.mountpoint.clone().unwrap();
        assert_eq!(std::fs::read(child_mount.join("base.txt")).unwrap(), b"base");
        std::fs::write(child_mount.join("child.txt"), b"child").unwrap();

        let child = snapshotter.commit(child).await.unwrap();
        let mp = snapshotter.mountpoint(&child.digest).unwrap();
        assert_eq!(std::fs::read(mp.join("base.txt")).unwrap(), b"base");
        assert_eq!(std::fs::read(mp.join("child.txt")).unwrap(), b"child");
    }
}
