// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end build pipeline: a multi-stage DAG running through the
//! real [`FsSnapshotter`]/[`ContentStore`]/[`ShellOperationExecutor`]
//! stack, not the in-memory fakes the scheduler's own unit tests use.
//! Covers:
//! 1. a two-node chain (RUN then COPY) producing a snapshot whose
//!    mountpoint carries both nodes' changes
//! 2. replaying the identical chain hits the cache end to end and
//!    never touches the executor

use podhost_core::application::build_scheduler::{BuildScheduler, ExecutionContext};
use podhost_core::domain::build::{BuildNode, BuildOperation, NodeId, OperationKind};
use podhost_core::infrastructure::build_executor::ShellOperationExecutor;
use podhost_core::infrastructure::content_store::ContentStore;
use podhost_core::infrastructure::snapshotter::{FsSnapshotter, Snapshotter};
use std::collections::HashMap;
use std::sync::Arc;

fn run_node(command: &str, digest: &str) -> BuildNode {
    BuildNode {
        id: NodeId(digest.to_string()),
        operation: BuildOperation {
            digest: digest.to_string(),
            kind: OperationKind::Run { command: vec!["sh".into(), "-c".into(), command.into()], env: HashMap::new() },
        },
        parent: None,
        dependencies: Vec::new(),
        platform: "linux/amd64".to_string(),
    }
}

fn copy_node(source: &str, dest: &str, digest: &str) -> BuildNode {
    BuildNode {
        id: NodeId(digest.to_string()),
        operation: BuildOperation {
            digest: digest.to_string(),
            kind: OperationKind::Copy { sources: vec![source.to_string()], dest: dest.to_string() },
        },
        parent: None,
        dependencies: Vec::new(),
        platform: "linux/amd64".to_string(),
    }
}

fn scheduler(data_root: &std::path::Path, context_root: &std::path::Path) -> (BuildScheduler, Arc<FsSnapshotter>) {
    let store = ContentStore::open(data_root).unwrap();
    let snapshotter = Arc::new(FsSnapshotter::new(data_root, store.clone()).unwrap());
    let executor = Arc::new(ShellOperationExecutor::new(context_root));
    (BuildScheduler::new(snapshotter.clone(), store, executor), snapshotter)
}

#[tokio::test]
async fn two_stage_chain_accumulates_changes_in_final_mountpoint() {
    let data_root = tempfile::tempdir().unwrap();
    let context = tempfile::tempdir().unwrap();
    std::fs::write(context.path().join("payload.txt"), b"from context").unwrap();

    let (scheduler, snapshotter) = scheduler(data_root.path(), context.path());

    // seed an empty base snapshot for the stage to build from
    let base = snapshotter.prepare(None).await.unwrap();
    let base = snapshotter.commit(base).await.unwrap();

    let ctx = ExecutionContext::new(Some(base.digest.clone()));
    let nodes = vec![
        run_node("echo ran > from-run.txt", "digest-run"),
        copy_node("payload.txt", "/from-copy.txt", "digest-copy"),
    ];

    let final_digest = scheduler.run_stage(&ctx, &nodes).await.unwrap();
    assert_eq!(scheduler.stats().misses(), 2);

    let mountpoint = snapshotter.mountpoint(&final_digest).expect("committed snapshot has a mountpoint");
    assert!(mountpoint.join("from-run.txt").exists());
    let copied = std::fs::read(mountpoint.join("from-copy.txt")).unwrap();
    assert_eq!(copied, b"from context");
}

#[tokio::test]
async fn identical_replay_is_fully_cached() {
    let data_root = tempfile::tempdir().unwrap();
    let context = tempfile::tempdir().unwrap();
    std::fs::write(context.path().join("payload.txt"), b"same content").unwrap();

    let (scheduler, _snapshotter) = scheduler(data_root.path(), context.path());
    let node = copy_node("payload.txt", "/payload.txt", "digest-copy-1");

    let ctx1 = ExecutionContext::new(None);
    scheduler.run_node(&ctx1, &node).await.unwrap();
    assert_eq!(scheduler.stats().misses(), 1);

    let ctx2 = ExecutionContext::new(None);
    scheduler.run_node(&ctx2, &node).await.unwrap();
    assert_eq!(scheduler.stats().hits(), 1);
    assert_eq!(scheduler.stats().misses(), 1, "second run must not touch the executor");
}
