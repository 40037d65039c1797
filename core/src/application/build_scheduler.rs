// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Build scheduler and cache. Walks a DAG of
//! [`BuildNode`]s, computing a [`CacheKey`] per node and either
//! replaying a cached manifest or dispatching the node's operation to
//! an [`OperationExecutor`], committing the resulting snapshot and
//! recording a [`CachedResult`] manifest for next time.
//!
//! A node's result depends only on its own declared inputs, so
//! independent stages can run under separate [`ExecutionContext`]s
//! concurrently while any one context still serializes its own
//! filesystem mutations.

use crate::domain::build::{BuildNode, OperationKind};
use crate::domain::cache::{CacheKey, CachedResult};
use crate::domain::snapshot::{Digest, Snapshot, SnapshotError};
use crate::infrastructure::content_store::{ContentStore, ContentStoreError};
use crate::infrastructure::snapshotter::Snapshotter;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
    #[error("cache manifest schema mismatch for key {0}: upgrade policy unspecified, rejecting")]
    UnsupportedCacheSchema(String),
    #[error("build node {0} failed: {1}")]
    ExecutorFailed(String, String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl crate::error::HasErrorKind for BuildError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            BuildError::Snapshot(e) => e.kind(),
            BuildError::ContentStore(e) => e.kind(),
            BuildError::UnsupportedCacheSchema(_) => crate::error::ErrorKind::Unsupported,
            BuildError::ExecutorFailed(_, _) => crate::error::ErrorKind::Internal,
            BuildError::Serde(_) => crate::error::ErrorKind::Internal,
        }
    }
}

use crate::error::HasErrorKind;

/// Executes one [`OperationKind`] against a prepared snapshot's
/// mountpoint, returning the env/metadata deltas it produced. Runs
/// with the child snapshot already prepared; on success the scheduler
/// commits it, on error the scheduler removes it.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(
        &self,
        operation: &OperationKind,
        mountpoint: &std::path::Path,
    ) -> Result<EnvMetaDelta, String>;
}

#[derive(Debug, Clone, Default)]
pub struct EnvMetaDelta {
    pub env: HashMap<String, String>,
    pub meta: HashMap<String, String>,
}

/// Per-build-stage execution state: the running head snapshot, each
/// node's resolved snapshot digest, accumulated env/metadata deltas,
/// and the semaphore enforcing at most one filesystem-modifying
/// operation in flight per context.
pub struct ExecutionContext {
    pub head: parking_lot::Mutex<Option<Digest>>,
    pub node_snapshots: DashMap<String, Digest>,
    pub env: parking_lot::Mutex<HashMap<String, String>>,
    pub meta: parking_lot::Mutex<HashMap<String, String>>,
    semaphore: Semaphore,
}

impl ExecutionContext {
    pub fn new(head: Option<Digest>) -> Self {
        Self {
            head: parking_lot::Mutex::new(head),
            node_snapshots: DashMap::new(),
            env: parking_lot::Mutex::new(HashMap::new()),
            meta: parking_lot::Mutex::new(HashMap::new()),
            semaphore: Semaphore::new(1),
        }
    }

    fn apply_delta(&self, delta: &EnvMetaDelta) {
        self.env.lock().extend(delta.env.clone());
        self.meta.lock().extend(delta.meta.clone());
    }
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: Arc<AtomicU64>,
    pub misses: Arc<AtomicU64>,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Walks [`BuildNode`]s against a [`Snapshotter`] + [`ContentStore`],
/// consulting the cache before invoking an [`OperationExecutor`].
pub struct BuildScheduler {
    snapshotter: Arc<dyn Snapshotter>,
    store: ContentStore,
    executor: Arc<dyn OperationExecutor>,
    stats: CacheStats,
}

impl BuildScheduler {
    pub fn new(
        snapshotter: Arc<dyn Snapshotter>,
        store: ContentStore,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        Self { snapshotter, store, executor, stats: CacheStats::default() }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Run a single node within `ctx`, resolving cache hit vs. miss.
    pub async fn run_node(
        &self,
        ctx: &ExecutionContext,
        node: &BuildNode,
    ) -> Result<Digest, BuildError> {
        let parent = ctx.head.lock().clone();

        let mut inputs: Vec<Digest> = node.dependencies.clone();
        if let Some(p) = &parent {
            inputs.push(p.clone());
        }
        let cache_key = CacheKey::compute(&node.operation.digest, &inputs, &node.platform);

        if let Some(hit) = self.try_cache_hit(ctx, &cache_key).await? {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("podhost_build_cache_hits_total").increment(1);
            tracing::info!(node = %node.id.0, cache_key = %cache_key, "build cache hit");
            *ctx.head.lock() = Some(hit.clone());
            ctx.node_snapshots.insert(node.id.0.clone(), hit.clone());
            return Ok(hit);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("podhost_build_cache_misses_total").increment(1);
        tracing::info!(node = %node.id.0, cache_key = %cache_key, "build cache miss, executing");

        let _permit = ctx
            .semaphore
            .acquire()
            .await
            .expect("ExecutionContext semaphore is never closed");

        let prepared = self.snapshotter.prepare(parent.clone()).await?;
        let mountpoint = prepared.mountpoint.clone().expect("freshly prepared snapshot has a mountpoint");

        let exec_result = self.executor.execute(&node.operation.kind, &mountpoint).await;
        let delta = match exec_result {
            Ok(delta) => delta,
            Err(msg) => {
                self.snapshotter.remove(&prepared.digest).await?;
                return Err(BuildError::ExecutorFailed(node.id.0.clone(), msg));
            }
        };

        let committed = self.snapshotter.commit(prepared).await?;
        ctx.apply_delta(&delta);

        let manifest = CachedResult::new(committed.digest.clone(), delta.env, delta.meta);
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        self.store.put(&manifest_bytes)?;
        self.put_cache_entry(&cache_key, &manifest_bytes)?;

        *ctx.head.lock() = Some(committed.digest.clone());
        ctx.node_snapshots.insert(node.id.0.clone(), committed.digest.clone());
        Ok(committed.digest)
    }

    /// Run every node in `nodes` sequentially within one context. Callers
    /// that want parallel stages construct one [`ExecutionContext`] (and
    /// one task) per independent stage themselves, each stage using its
    /// own context.
    pub async fn run_stage(
        &self,
        ctx: &ExecutionContext,
        nodes: &[BuildNode],
    ) -> Result<Digest, BuildError> {
        let mut last = ctx.head.lock().clone().ok_or_else(|| {
            BuildError::Snapshot(SnapshotError::InvalidState("stage has no base snapshot".into()))
        });
        for node in nodes {
            last = Ok(self.run_node(ctx, node).await?);
        }
        last
    }

    fn cache_index_path(&self, key: &CacheKey) -> Digest {
        // The cache index maps a CacheKey to the manifest's own content
        // digest; we key that mapping in the content store itself under
        // a deterministic "index:<cache-key>" pseudo-digest so index
        // updates share the store's existing atomic write-then-rename.
        Digest::new(format!("index-{}", hex_of(key.as_str())))
    }

    fn put_cache_entry(&self, key: &CacheKey, manifest_bytes: &[u8]) -> Result<(), BuildError> {
        let digest = {
            use sha2::{Digest as _, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(manifest_bytes);
            Digest::new(hex::encode(hasher.finalize()))
        };
        let index_path = self.store.path_for(&self.cache_index_path(key));
        std::fs::write(&index_path, digest.as_str())
            .map_err(|e| BuildError::ContentStore(ContentStoreError::Io(e)))?;
        Ok(())
    }

    async fn try_cache_hit(
        &self,
        ctx: &ExecutionContext,
        key: &CacheKey,
    ) -> Result<Option<Digest>, BuildError> {
        let index_path = self.store.path_for(&self.cache_index_path(key));
        let Ok(manifest_digest_hex) = std::fs::read_to_string(&index_path) else {
            return Ok(None);
        };
        let manifest_digest = Digest::new(manifest_digest_hex.trim().to_string());
        let manifest_bytes = match self.store.get(&manifest_digest) {
            Ok(bytes) => bytes,
            Err(ContentStoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(BuildError::ContentStore(e)),
        };
        let manifest: CachedResult = serde_json::from_slice(&manifest_bytes)?;
        if !manifest.is_compatible() {
            return Err(BuildError::UnsupportedCacheSchema(key.as_str().to_string()));
        }
        ctx.apply_delta(&EnvMetaDelta { env: manifest.env_delta.clone(), meta: manifest.meta_delta.clone() });
        Ok(Some(manifest.snapshot_digest))
    }
}

fn hex_of(s: &str) -> String {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::build::{BuildOperation, NodeId};
    use crate::infrastructure::snapshotter::FsSnapshotter;

    struct EchoExecutor;

    #[async_trait]
    impl OperationExecutor for EchoExecutor {
        async fn execute(
            &self,
            operation: &OperationKind,
            mountpoint: &std::path::Path,
        ) -> Result<EnvMetaDelta, String> {
            if let OperationKind::Run { command, .. } = operation {
                std::fs::write(mountpoint.join("ran"), command.join(" ")).map_err(|e| e.to_string())?;
            }
            Ok(EnvMetaDelta::default())
        }
    }

    fn node(id: &str, digest: &str) -> BuildNode {
        BuildNode {
            id: NodeId(id.to_string()),
            operation: BuildOperation {
                digest: digest.to_string(),
                kind: OperationKind::Run { command: vec!["true".into()], env: HashMap::new() },
            },
            parent: None,
            dependencies: Vec::new(),
            platform: "linux/arm64".to_string(),
        }
    }

    fn scheduler(dir: &std::path::Path) -> BuildScheduler {
        let store = ContentStore::open(dir).unwrap();
        let snapshotter = Arc::new(FsSnapshotter::new(dir, store.clone()).unwrap());
        BuildScheduler::new(snapshotter, store, Arc::new(EchoExecutor))
    }

    #[tokio::test]
    async fn second_identical_run_is_a_cache_hit_and_skips_executor() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path());

        let ctx1 = ExecutionContext::new(None);
        let digest1 = scheduler.run_node(&ctx1, &node("n1", "op-a")).await.unwrap();
        assert_eq!(scheduler.stats().misses(), 1);
        assert_eq!(scheduler.stats().hits(), 0);

        let ctx2 = ExecutionContext::new(None);
        let digest2 = scheduler.run_node(&ctx2, &node("n1", "op-a")).await.unwrap();
        assert_eq!(scheduler.stats().hits(), 1);
        assert_eq!(digest1, digest2);
    }

    #[tokio::test]
    async fn different_operation_digest_is_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path());

        let ctx1 = ExecutionContext::new(None);
        scheduler.run_node(&ctx1, &node("n1", "op-a")).await.unwrap();

        let ctx2 = ExecutionContext::new(None);
        scheduler.run_node(&ctx2, &node("n1", "op-b")).await.unwrap();
        assert_eq!(scheduler.stats().misses(), 2);
    }

    #[tokio::test]
    async fn executor_failure_removes_prepared_snapshot() {
        struct FailingExecutor;
        #[async_trait]
        impl OperationExecutor for FailingExecutor {
            async fn execute(&self, _: &OperationKind, _: &std::path::Path) -> Result<EnvMetaDelta, String> {
                Err("boom".to_string())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let snapshotter = Arc::new(FsSnapshotter::new(dir.path(), store.clone()).unwrap());
        let scheduler = BuildScheduler::new(snapshotter, store, Arc::new(FailingExecutor));

        let ctx = ExecutionContext::new(None);
        let err = scheduler.run_node(&ctx, &node("n1", "op-a")).await.unwrap_err();
        assert!(matches!(err, BuildError::ExecutorFailed(_, _)));
    }
}
