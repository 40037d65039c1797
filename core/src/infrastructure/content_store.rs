// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Content-addressable blob store shared by the differ/snapshotter and
//! the build cache. Blobs are stored under
//! `<data-root>/cache/<sha256-hex>` and written via a temp-file-then-
//! rename so a reader never observes a partially written blob.

use crate::domain::snapshot::Digest;
use sha2::{Digest as _, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("blob {0} not found")]
    NotFound(Digest),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },
}

impl crate::error::HasErrorKind for ContentStoreError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            ContentStoreError::NotFound(_) => crate::error::ErrorKind::NotFound,
            ContentStoreError::Io(_) => crate::error::ErrorKind::Internal,
            ContentStoreError::DigestMismatch { .. } => crate::error::ErrorKind::Corruption,
        }
    }
}

/// A directory-backed content store keyed by sha256 digest.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn open(data_root: impl Into<PathBuf>) -> Result<Self, ContentStoreError> {
        let root = data_root.into().join("cache");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.as_str())
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.path_for(digest).is_file()
    }

    /// Write `bytes` into the store, verifying the actual sha256 matches
    /// the digest computed from the data itself (the store is self-
    /// describing: callers don't pass a digest in, they get one out).
    pub fn put(&self, bytes: &[u8]) -> Result<Digest, ContentStoreError> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = Digest::new(hex::encode(hasher.finalize()));

        let final_path = self.path_for(&digest);
        if final_path.is_file() {
            return Ok(digest);
        }

        let tmp_path = self.root.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(digest)
    }

    /// Stream a file's contents into the store under its own digest,
    /// used by the differ when staging layer tarballs that may be too
    /// large to hold fully in memory.
    pub fn put_file(&self, src: &Path) -> Result<Digest, ContentStoreError> {
        let bytes = std::fs::read(src)?;
        self.put(&bytes)
    }

    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError> {
        let path = self.path_for(digest);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentStoreError::NotFound(digest.clone())
            } else {
                ContentStoreError::Io(e)
            }
        })
    }

    pub fn remove(&self, digest: &Digest) -> Result<(), ContentStoreError> {
        let path = self.path_for(digest);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContentStoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let digest = store.put(b"hello world").unwrap();
        assert!(store.contains(&digest));
        assert_eq!(store.get(&digest).unwrap(), b"hello world");
    }

    #[test]
    fn put_is_idempotent_for_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let digest = store.put(b"gone soon").unwrap();
        store.remove(&digest).unwrap();
        store.remove(&digest).unwrap();
        assert!(!store.contains(&digest));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let digest = Digest::new("0".repeat(64));
        assert!(matches!(store.get(&digest), Err(ContentStoreError::NotFound(_))));
    }
}
