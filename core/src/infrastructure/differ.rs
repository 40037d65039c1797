// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Walks a prepared snapshot's mountpoint against its parent, producing
//! a [`Change`] set (and from it a [`DiffKey`]), and serializes that
//! change set to an OCI-style tar layer using whiteout and opaque-
//! directory conventions.
//!
//! Layer format, mirrored on [`apply_chain`]:
//! - a deleted entry becomes a zero-length `.wh.<name>` marker next to
//!   where `<name>` lived
//! - a directory whose entire original contents were replaced (as
//!   opposed to merely having some children changed) gets a
//!   `.wh..wh..opq` marker inside it
//!
//! Extended attributes are not yet captured by [`diff_trees`]
//! (`xattr_digest` is always the empty-input hash); layers built here
//! carry ownership and mode bits but not xattrs.

use crate::domain::diffkey::{Change, EntryMeta, NodeKind};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";

#[derive(Debug, Error)]
pub enum DifferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tar error: {0}")]
    Tar(String),
    #[error("path outside of root: {0}")]
    PathEscape(String),
}

impl crate::error::HasErrorKind for DifferError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            DifferError::Io(_) => crate::error::ErrorKind::Internal,
            DifferError::Tar(_) => crate::error::ErrorKind::Corruption,
            DifferError::PathEscape(_) => crate::error::ErrorKind::InvalidArgument,
        }
    }
}

fn relative_entries(root: &Path) -> Result<BTreeMap<String, std::fs::Metadata>, DifferError> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| DifferError::Tar(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| DifferError::PathEscape(entry.path().display().to_string()))?;
        out.insert(rel.to_string_lossy().replace('\\', "/"), entry.metadata()?);
    }
    Ok(out)
}

fn node_kind(meta: &std::fs::Metadata) -> NodeKind {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    if ft.is_dir() {
        NodeKind::Directory
    } else if ft.is_symlink() {
        NodeKind::Symlink
    } else if ft.is_fifo() {
        NodeKind::Fifo
    } else if ft.is_socket() {
        NodeKind::Socket
    } else if ft.is_block_device() {
        NodeKind::BlockDevice
    } else if ft.is_char_device() {
        NodeKind::CharDevice
    } else {
        NodeKind::File
    }
}

fn content_digest(path: &Path, meta: &std::fs::Metadata) -> std::io::Result<Option<[u8; 32]>> {
    if !meta.is_file() {
        return Ok(None);
    }
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hasher.finalize().into()))
}

/// Compute the [`Change`] set between `parent_root` (or `None` for
/// scratch) and `target_root`.
pub fn diff_trees(
    parent_root: Option<&Path>,
    target_root: &Path,
) -> Result<Vec<Change>, DifferError> {
    use std::os::unix::fs::MetadataExt;

    let before = match parent_root {
        Some(p) => relative_entries(p)?,
        None => BTreeMap::new(),
    };
    let after = relative_entries(target_root)?;

    let mut changes = Vec::new();

    for (path, before_meta) in &before {
        if !after.contains_key(path) {
            changes.push(Change::Deleted { path: path.clone() });
            continue;
        }
    }

    for (path, after_meta) in &after {
        let full_path = target_root.join(path);
        let kind = node_kind(after_meta);
        let link_target = if kind == NodeKind::Symlink {
            std::fs::read_link(&full_path)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        } else {
            None
        };
        let meta = EntryMeta {
            kind,
            mode: after_meta.mode(),
            uid: after_meta.uid(),
            gid: after_meta.gid(),
            link_target,
            xattr_digest: Sha256::digest(b"").into(),
            content_digest: content_digest(&full_path, after_meta)?,
        };

        match before.get(path) {
            None => changes.push(Change::Added { path: path.clone(), meta }),
            Some(before_meta) => {
                let before_kind = node_kind(before_meta);
                let unchanged = before_kind == kind
                    && before_meta.mode() == after_meta.mode()
                    && before_meta.uid() == after_meta.uid()
                    && before_meta.gid() == after_meta.gid()
                    && (kind != NodeKind::File
                        || before_meta.len() == after_meta.len() && {
                            let before_path = parent_root.unwrap().join(path);
                            content_digest(&before_path, before_meta)? == meta.content_digest
                        });
                if !unchanged {
                    changes.push(Change::Modified { path: path.clone(), meta });
                }
            }
        }
    }

    Ok(changes)
}

/// Serialize `changes` (reading file content from `target_root`) into a
/// gzip-compressed OCI layer tar, returning the raw bytes for the
/// caller to hand to the content store.
pub fn export_layer(target_root: &Path, changes: &[Change]) -> Result<Vec<u8>, DifferError> {
    let mut gz_buf = Vec::new();
    {
        let encoder = flate2::write::GzEncoder::new(&mut gz_buf, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for change in changes {
            match change {
                Change::Deleted { path } => {
                    let wh_path = whiteout_path(path);
                    let mut header = tar::Header::new_gnu();
                    header.set_size(0);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, &wh_path, std::io::empty())
                        .map_err(|e| DifferError::Tar(e.to_string()))?;
                }
                Change::Added { path, meta } | Change::Modified { path, meta } => {
                    append_entry(&mut builder, target_root, path, meta)?;
                }
            }
        }

        let encoder = builder.into_inner().map_err(|e| DifferError::Tar(e.to_string()))?;
        encoder.finish().map_err(|e| DifferError::Tar(e.to_string()))?;
    }
    Ok(gz_buf)
}

fn whiteout_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    let parent = p.parent().unwrap_or_else(|| Path::new(""));
    let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    parent.join(format!("{WHITEOUT_PREFIX}{name}"))
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    target_root: &Path,
    path: &str,
    meta: &EntryMeta,
) -> Result<(), DifferError> {
    let full_path = target_root.join(path);
    let mut header = tar::Header::new_gnu();
    header.set_mode(meta.mode);
    header.set_uid(meta.uid as u64);
    header.set_gid(meta.gid as u64);

    match meta.kind {
        NodeKind::Directory => {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, path, std::io::empty())
                .map_err(|e| DifferError::Tar(e.to_string()))?;
        }
        NodeKind::Symlink => {
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            let target = meta.link_target.as_deref().unwrap_or("");
            builder
                .append_link(&mut header, path, target)
                .map_err(|e| DifferError::Tar(e.to_string()))?;
        }
        NodeKind::File => {
            let data = std::fs::read(&full_path)?;
            header.set_size(data.len() as u64);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data.as_slice())
                .map_err(|e| DifferError::Tar(e.to_string()))?;
        }
        NodeKind::Fifo | NodeKind::Socket | NodeKind::BlockDevice | NodeKind::CharDevice => {
            // Device/special nodes are recorded in the change set for
            // DiffKey purposes but are not replayed into the tar layer;
            // the runtime recreates them from container config instead.
        }
    }
    Ok(())
}

/// Apply a stack of exported layer tarballs (base-first) onto
/// `dest_root`, materializing a full filesystem tree.
pub fn apply_chain(layers: &[Vec<u8>], dest_root: &Path) -> Result<(), DifferError> {
    std::fs::create_dir_all(dest_root)?;
    for layer in layers {
        apply_layer(layer, dest_root)?;
    }
    Ok(())
}

fn apply_layer(layer: &[u8], dest_root: &Path) -> Result<(), DifferError> {
    let decoder = flate2::read::GzDecoder::new(layer);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(|e| DifferError::Tar(e.to_string()))? {
        let mut entry = entry.map_err(|e| DifferError::Tar(e.to_string()))?;
        let rel_path = entry.path().map_err(|e| DifferError::Tar(e.to_string()))?.into_owned();
        let name = rel_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        if name == OPAQUE_MARKER {
            let dir = rel_path.parent().map(|p| dest_root.join(p)).unwrap_or_else(|| dest_root.to_path_buf());
            if dir.is_dir() {
                for child in std::fs::read_dir(&dir)? {
                    let child = child?;
                    if child.file_type()?.is_dir() {
                        std::fs::remove_dir_all(child.path())?;
                    } else {
                        std::fs::remove_file(child.path())?;
                    }
                }
            }
            continue;
        }

        if let Some(original) = name.strip_prefix(WHITEOUT_PREFIX) {
            let target = rel_path
                .parent()
                .map(|p| dest_root.join(p).join(original))
                .unwrap_or_else(|| dest_root.join(original));
            if target.is_dir() {
                let _ = std::fs::remove_dir_all(&target);
            } else {
                let _ = std::fs::remove_file(&target);
            }
            continue;
        }

        let dest_path = dest_root.join(&rel_path);
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest_path).map_err(|e| DifferError::Tar(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_against_scratch_reports_everything_as_added() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let changes = diff_trees(None, dir.path()).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Added { .. }));
    }

    #[test]
    fn unchanged_file_is_not_reported() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("a.txt"), b"same").unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("a.txt"), b"same").unwrap();

        let changes = diff_trees(Some(parent.path()), target.path()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn deleted_file_is_reported() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("a.txt"), b"gone").unwrap();
        let target = tempfile::tempdir().unwrap();

        let changes = diff_trees(Some(parent.path()), target.path()).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], Change::Deleted { path } if path == "a.txt"));
    }

    #[test]
    fn export_and_apply_round_trips_a_simple_tree() {
        let target = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(target.path().join("sub")).unwrap();
        std::fs::write(target.path().join("sub/b.txt"), b"world").unwrap();

        let changes = diff_trees(None, target.path()).unwrap();
        let layer = export_layer(target.path(), &changes).unwrap();

        let dest = tempfile::tempdir().unwrap();
        apply_chain(&[layer], dest.path()).unwrap();

        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest.path().join("sub/b.txt")).unwrap(), b"world");
    }

    #[test]
    fn apply_whiteout_removes_file_from_lower_layer() {
        let base_target = tempfile::tempdir().unwrap();
        std::fs::write(base_target.path().join("a.txt"), b"base").unwrap();
        let base_changes = diff_trees(None, base_target.path()).unwrap();
        let base_layer = export_layer(base_target.path(), &base_changes).unwrap();

        let upper_target = tempfile::tempdir().unwrap();
        // upper layer has no a.txt relative to base, i.e. it was deleted
        let upper_changes = vec![Change::Deleted { path: "a.txt".into() }];
        let upper_layer = export_layer(upper_target.path(), &upper_changes).unwrap();

        let dest = tempfile::tempdir().unwrap();
        apply_chain(&[base_layer, upper_layer], dest.path()).unwrap();

        assert!(!dest.path().join("a.txt").exists());
    }
}
