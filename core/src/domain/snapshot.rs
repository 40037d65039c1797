// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot aggregate: an exclusively-owned (while prepared) or
//! immutable (once committed) filesystem state, identified by a
//! content digest.

use crate::domain::diffkey::DiffKey;
use crate::error::{ErrorKind, HasErrorKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn new(hex_sha256: impl Into<String>) -> Self {
        Self(hex_sha256.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    Prepared,
    Committed,
}

/// A snapshot, either exclusively owned for writing (`Prepared`) or
/// immutable (`Committed`).
///
/// Invariants (enforced by [`Snapshot::commit`] / callers, not by the
/// type alone, since a prepared snapshot's mountpoint is populated by
/// an external differ before commit):
/// - a prepared snapshot has exactly one writer at a time
/// - a committed snapshot is immutable
/// - a committed snapshot's parent, if any, is also committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub digest: Digest,
    pub parent: Option<Digest>,
    pub size: u64,
    pub state: SnapshotState,
    pub mountpoint: Option<PathBuf>,
    pub diff_key: Option<DiffKey>,
}

impl Snapshot {
    pub fn prepared(digest: Digest, parent: Option<Digest>, mountpoint: PathBuf) -> Self {
        Self {
            digest,
            parent,
            size: 0,
            state: SnapshotState::Prepared,
            mountpoint: Some(mountpoint),
            diff_key: None,
        }
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.state, SnapshotState::Prepared)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, SnapshotState::Committed)
    }

    /// Transition a prepared snapshot to committed, unlinking its
    /// mountpoint and attaching the computed [`DiffKey`] and size.
    pub fn commit(&mut self, diff_key: DiffKey, size: u64) -> Result<(), SnapshotError> {
        if !self.is_prepared() {
            return Err(SnapshotError::InvalidState(format!(
                "snapshot {} is not prepared",
                self.digest
            )));
        }
        self.state = SnapshotState::Committed;
        self.mountpoint = None;
        self.diff_key = Some(diff_key);
        self.size = size;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("snapshot already exists: {0}")]
    Exists(String),
    #[error("invalid snapshot state: {0}")]
    InvalidState(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl HasErrorKind for SnapshotError {
    fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::NotFound(_) => ErrorKind::NotFound,
            SnapshotError::Exists(_) => ErrorKind::Exists,
            SnapshotError::InvalidState(_) => ErrorKind::InvalidState,
            SnapshotError::Io(_) => ErrorKind::Internal,
            SnapshotError::Corruption(_) => ErrorKind::Corruption,
        }
    }
}
