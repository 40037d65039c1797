// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Cache key/result types for the build scheduler.

use crate::domain::snapshot::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;

/// Schema version embedded in every cache key, so a future incompatible
/// change to the key derivation never silently aliases with old entries.
pub const CACHE_SCHEMA_VERSION: &str = "cache:v5";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `operation_digest` identifies the operation's content (e.g. the
    /// hash of a RUN command + its arguments); `input_digests` are the
    /// parent plus dependency snapshot digests, sorted for determinism;
    /// `platform` is e.g. `"linux/arm64"`.
    pub fn compute(operation_digest: &str, input_digests: &[Digest], platform: &str) -> Self {
        let mut sorted: Vec<&str> = input_digests.iter().map(|d| d.as_str()).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(operation_digest.as_bytes());
        for d in &sorted {
            hasher.update(b"|");
            hasher.update(d.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(platform.as_bytes());
        hasher.update(b"|");
        hasher.update(CACHE_SCHEMA_VERSION.as_bytes());

        let digest: [u8; 32] = hasher.finalize().into();
        CacheKey(format!("sha256:{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A manifest embedding everything required to replay a cache hit
/// without re-executing the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub schema_version: String,
    pub snapshot_digest: Digest,
    pub env_delta: HashMap<String, String>,
    pub meta_delta: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn new(
        snapshot_digest: Digest,
        env_delta: HashMap<String, String>,
        meta_delta: HashMap<String, String>,
    ) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION.to_string(),
            snapshot_digest,
            env_delta,
            meta_delta,
            created_at: Utc::now(),
        }
    }

    /// Schema-upgrade policy for older cache entries is deliberately
    /// strict: any mismatch is rejected rather than guessed at.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == CACHE_SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_order_independent_over_inputs() {
        let a = Digest::new("aaa");
        let b = Digest::new("bbb");
        let k1 = CacheKey::compute("op1", &[a.clone(), b.clone()], "linux/arm64");
        let k2 = CacheKey::compute("op1", &[b, a], "linux/arm64");
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_differs_by_platform() {
        let a = Digest::new("aaa");
        let k1 = CacheKey::compute("op1", &[a.clone()], "linux/arm64");
        let k2 = CacheKey::compute("op1", &[a], "linux/amd64");
        assert_ne!(k1, k2);
    }
}
