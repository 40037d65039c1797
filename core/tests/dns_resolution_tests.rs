// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end DNS resolution: a real [`NetworkService`] allocation
//! feeding a real [`DnsListenerManager`] over an actual UDP socket,
//! through [`ContainerDnsResolver`] rather than a fake [`Resolver`].
//! Covers an allocated hostname resolving to its leased address, an
//! unknown hostname round-tripping NXDOMAIN, and a non-A/ANY query
//! getting NOTIMP with NODATA-style normalization.

use async_trait::async_trait;
use podhost_core::application::container_service::ContainerDnsResolver;
use podhost_core::application::network_allocator::{
    ContainerDirectory, InMemoryIpamPlugin, NetworkService,
};
use podhost_core::domain::dns::{Message, Question, RCode, RrClass, RrType};
use podhost_core::domain::network::{Attachment, NetworkConfiguration, NetworkMode};
use podhost_core::infrastructure::dns_codec;
use podhost_core::infrastructure::dns_server::DnsListenerManager;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

struct EmptyDirectory;

#[async_trait]
impl ContainerDirectory for EmptyDirectory {
    async fn attachments_for_network(&self, _network_id: &str) -> Vec<Attachment> {
        Vec::new()
    }
}

async fn bind_free_addr() -> SocketAddr {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);
    addr
}

async fn query(socket: &UdpSocket, server: SocketAddr, question: Question) -> Message {
    let request = Message::query(42, question);
    let bytes = dns_codec::encode(&request).unwrap();
    socket.send_to(&bytes, server).await.unwrap();
    let mut buf = vec![0u8; 512];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("response within timeout")
        .unwrap();
    dns_codec::decode(&buf[..n]).unwrap()
}

#[tokio::test]
async fn allocated_hostname_resolves_to_its_leased_address() {
    let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
        let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
        Arc::new(InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
    }));

    let mut cfg = NetworkConfiguration::new("net-a", NetworkMode::Bridged, "podhost-ipam");
    cfg.ipv4_cidr = Some("10.5.0.0/24".parse().unwrap());
    networks.create(cfg).await.unwrap();
    let leased = networks.allocate("net-a", "web", None).await.unwrap();

    let manager = DnsListenerManager::new();
    let bind_addr = bind_free_addr().await;
    manager.start(bind_addr, Arc::new(ContainerDnsResolver::new(networks))).await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response = query(
        &client,
        bind_addr,
        Question { name: "web".into(), qtype: RrType::A, qclass: RrClass::In },
    )
    .await;

    assert_eq!(response.rcode, RCode::NoError);
    assert_eq!(response.answers.len(), 1);
    match response.answers[0].rdata {
        podhost_core::domain::dns::RData::A(addr) => {
            assert_eq!(std::net::IpAddr::V4(addr), leased);
        }
        _ => panic!("expected an A record"),
    }

    manager.stop(bind_addr).unwrap();
}

/// Scenario 4 (known host, unsupported record type): AAAA for a host
/// that only has a leased IPv4 address is NODATA (`NoError`, zero
/// answers), distinct from NXDOMAIN for a wholly unknown host.
#[tokio::test]
async fn known_hostname_aaaa_query_is_nodata() {
    let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
        let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
        Arc::new(InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
    }));

    let mut cfg = NetworkConfiguration::new("net-a", NetworkMode::Bridged, "podhost-ipam");
    cfg.ipv4_cidr = Some("10.6.0.0/24".parse().unwrap());
    networks.create(cfg).await.unwrap();
    networks.allocate("net-a", "web", None).await.unwrap();

    let manager = DnsListenerManager::new();
    let bind_addr = bind_free_addr().await;
    manager.start(bind_addr, Arc::new(ContainerDnsResolver::new(networks))).await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response = query(
        &client,
        bind_addr,
        Question { name: "web".into(), qtype: RrType::Aaaa, qclass: RrClass::In },
    )
    .await;

    assert_eq!(response.rcode, RCode::NoError);
    assert!(response.answers.is_empty());

    manager.stop(bind_addr).unwrap();
}

#[tokio::test]
async fn unknown_hostname_is_nxdomain() {
    let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
        let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
        Arc::new(InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
    }));

    let manager = DnsListenerManager::new();
    let bind_addr = bind_free_addr().await;
    manager.start(bind_addr, Arc::new(ContainerDnsResolver::new(networks))).await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response = query(
        &client,
        bind_addr,
        Question { name: "missing.local".into(), qtype: RrType::A, qclass: RrClass::In },
    )
    .await;

    assert_eq!(response.rcode, RCode::NonExistentDomain);
    assert!(response.answers.is_empty());

    manager.stop(bind_addr).unwrap();
}

#[tokio::test]
async fn non_a_query_is_not_implemented() {
    let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
        let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
        Arc::new(InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
    }));

    let manager = DnsListenerManager::new();
    let bind_addr = bind_free_addr().await;
    manager.start(bind_addr, Arc::new(ContainerDnsResolver::new(networks))).await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response = query(
        &client,
        bind_addr,
        Question { name: "web".into(), qtype: RrType::Mx, qclass: RrClass::In },
    )
    .await;

    assert_eq!(response.rcode, RCode::NotImplemented);

    manager.stop(bind_addr).unwrap();
}
