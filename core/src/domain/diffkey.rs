// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Canonical, Merkle-rooted identifier over a set of filesystem changes
//! between a base and target snapshot.
//!
//! See the module-level invariant: for a fixed (base-digest, change-set)
//! pair, [`DiffKey::compute`] always returns the same key, independent
//! of the order changes were discovered in.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of filesystem node a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
    Fifo,
    Socket,
    BlockDevice,
    CharDevice,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
            NodeKind::Symlink => "symlink",
            NodeKind::Fifo => "fifo",
            NodeKind::Socket => "socket",
            NodeKind::BlockDevice => "blockdev",
            NodeKind::CharDevice => "chardev",
        };
        f.write_str(s)
    }
}

/// Metadata describing an added or modified filesystem entry, used to
/// build the canonical per-change string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub link_target: Option<String>,
    pub xattr_digest: [u8; 32],
    pub content_digest: Option<[u8; 32]>,
}

/// One filesystem change between a base and target snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change {
    Added { path: String, meta: EntryMeta },
    Modified { path: String, meta: EntryMeta },
    Deleted { path: String },
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Added { path, .. } => path,
            Change::Modified { path, .. } => path,
            Change::Deleted { path } => path,
        }
    }

    /// The canonical per-change string folded into the Merkle digest.
    fn canonical_string(&self) -> String {
        match self {
            Change::Added { path, meta } => format!(
                "A|{}|{}|{}|{}|{}|{}|xh:{}|ch:{}",
                path,
                meta.kind,
                meta.mode,
                meta.uid,
                meta.gid,
                meta.link_target.as_deref().unwrap_or(""),
                hex::encode(meta.xattr_digest),
                meta.content_digest.map(hex::encode).unwrap_or_default(),
            ),
            Change::Modified { path, meta } => format!(
                "M|{}|{}|{}|{}|{}|{}|xh:{}|ch:{}",
                path,
                meta.kind,
                meta.mode,
                meta.uid,
                meta.gid,
                meta.link_target.as_deref().unwrap_or(""),
                hex::encode(meta.xattr_digest),
                meta.content_digest.map(hex::encode).unwrap_or_default(),
            ),
            Change::Deleted { path } => format!("D|{}", path),
        }
    }

    fn leaf_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hasher.finalize().into()
    }
}

/// Pairs adjacent leaves (duplicating the odd one out at each level)
/// until a single root remains. An empty leaf set roots to the hash of
/// the empty string, so a no-op change set still has a well-defined key.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        let mut hasher = Sha256::new();
        hasher.update(b"");
        return hasher.finalize().into();
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.chunks(2);
        while let Some(pair) = iter.next() {
            let mut hasher = Sha256::new();
            hasher.update(pair[0]);
            hasher.update(pair.get(1).unwrap_or(&pair[0]));
            next.push(hasher.finalize().into());
        }
        level = next;
    }
    level[0]
}

/// `"sha256:<hex>"` identifier over an ordered, canonicalized change set,
/// namespaced by the base snapshot digest and a schema version so the
/// same change set against a different base never collides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffKey(String);

const DIFFKEY_VERSION: &str = "diffkey:v1";

impl DiffKey {
    /// `base` is `None` for a diff against an empty (scratch) base.
    pub fn compute(base: Option<&str>, changes: &[Change]) -> Self {
        let mut sorted: Vec<&Change> = changes.iter().collect();
        sorted.sort_by(|a, b| a.path().cmp(b.path()));

        let leaves: Vec<[u8; 32]> = sorted.iter().map(|c| c.leaf_hash()).collect();
        let root = merkle_root(&leaves);

        let mut hasher = Sha256::new();
        hasher.update(DIFFKEY_VERSION.as_bytes());
        hasher.update(base.unwrap_or("scratch").as_bytes());
        hasher.update(root);
        let digest: [u8; 32] = hasher.finalize().into();

        DiffKey(format!("sha256:{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: NodeKind, content: &str) -> EntryMeta {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        EntryMeta {
            kind,
            mode: 0o644,
            uid: 0,
            gid: 0,
            link_target: None,
            xattr_digest: Sha256::digest(b"").into(),
            content_digest: Some(hasher.finalize().into()),
        }
    }

    #[test]
    fn same_change_set_same_order_yields_same_key() {
        let changes = vec![
            Change::Added { path: "a.txt".into(), meta: meta(NodeKind::File, "a") },
            Change::Added { path: "b.txt".into(), meta: meta(NodeKind::File, "b") },
        ];
        let k1 = DiffKey::compute(Some("base"), &changes);
        let k2 = DiffKey::compute(Some("base"), &changes);
        assert_eq!(k1, k2);
    }

    #[test]
    fn traversal_order_does_not_matter() {
        let a = Change::Added { path: "a.txt".into(), meta: meta(NodeKind::File, "a") };
        let b = Change::Added { path: "b.txt".into(), meta: meta(NodeKind::File, "b") };
        let forward = vec![a.clone(), b.clone()];
        let backward = vec![b, a];

        let k1 = DiffKey::compute(Some("base"), &forward);
        let k2 = DiffKey::compute(Some("base"), &backward);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_base_yields_different_key() {
        let changes = vec![Change::Deleted { path: "a.txt".into() }];
        let k1 = DiffKey::compute(Some("base1"), &changes);
        let k2 = DiffKey::compute(Some("base2"), &changes);
        assert_ne!(k1, k2);
    }

    #[test]
    fn scratch_base_is_distinct_from_named_base() {
        let changes = vec![Change::Deleted { path: "a.txt".into() }];
        let k1 = DiffKey::compute(None, &changes);
        let k2 = DiffKey::compute(Some("scratch"), &changes);
        assert_ne!(k1, k2);
    }

    #[test]
    fn merkle_root_is_deterministic_for_odd_leaf_count() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let r1 = merkle_root(&leaves);
        let r2 = merkle_root(&leaves);
        assert_eq!(r1, r2);
    }
}
