// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Network allocator service: owns network lifecycle
//! and per-network IPAM, serialized by a process-wide FIFO lock plus a
//! `busyNetworks` advisory set so `create`/`delete` on the same id
//! never race each other.

use crate::domain::network::{
    overlaps_any_running, Attachment, NetworkConfiguration, NetworkError, NetworkState,
    NetworkStatus, DEFAULT_NETWORK, RESERVED_NONE_NETWORK,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// A one-way query into the container service's list, so the network
/// service can check "is anything still attached" without holding a
/// cyclic reference back into container management.
#[async_trait]
pub trait ContainerDirectory: Send + Sync {
    async fn attachments_for_network(&self, network_id: &str) -> Vec<Attachment>;
}

/// Per-network IPAM backend. `enable`/`disable` register/deregister the
/// network with the plugin loader; a real deployment might back this
/// with a platform network stack, but the allocation semantics (and
/// the atomic-delete-vs-attach contract around it) are identical
/// either way.
#[async_trait]
pub trait NetworkAllocatorPlugin: Send + Sync {
    /// Brings the allocator up and resolves the network's runtime
    /// status (subnet/gateway), which becomes `NetworkState::Running`.
    async fn enable(&self) -> Result<NetworkStatus, NetworkError>;
    /// Returns `Err(InvalidState)` if the plugin still considers
    /// itself in use and refuses to disable.
    async fn disable(&self) -> Result<(), NetworkError>;
    fn is_running(&self) -> bool;
    async fn allocate(&self, hostname: &str, mac: Option<String>) -> Result<IpAddr, NetworkError>;
    async fn deallocate(&self, hostname: &str) -> Result<(), NetworkError>;
    async fn lookup(&self, hostname: &str) -> Result<Option<IpAddr>, NetworkError>;
}

/// Sequential-assignment IPAM over a network's configured IPv4 subnet.
/// Good enough as the platform's built-in allocator; other plugins
/// could implement [`NetworkAllocatorPlugin`] against real bridge/tap
/// infrastructure without touching [`NetworkService`].
pub struct InMemoryIpamPlugin {
    subnet: ipnet::Ipv4Net,
    ipv6_subnet: Option<ipnet::Ipv6Net>,
    running: parking_lot::Mutex<bool>,
    leases: DashMap<String, IpAddr>,
    used: parking_lot::Mutex<std::collections::HashSet<IpAddr>>,
}

impl InMemoryIpamPlugin {
    pub fn new(subnet: ipnet::Ipv4Net, ipv6_subnet: Option<ipnet::Ipv6Net>) -> Self {
        Self {
            subnet,
            ipv6_subnet,
            running: parking_lot::Mutex::new(false),
            leases: DashMap::new(),
            used: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

#[async_trait]
impl NetworkAllocatorPlugin for InMemoryIpamPlugin {
    async fn enable(&self) -> Result<NetworkStatus, NetworkError> {
        *self.running.lock() = true;
        let gateway = self
            .subnet
            .hosts()
            .next()
            .ok_or_else(|| NetworkError::InvalidArgument("subnet has no usable host addresses".into()))?;
        Ok(NetworkStatus {
            ipv4_subnet: self.subnet,
            ipv4_gateway: gateway,
            ipv6_subnet: self.ipv6_subnet,
        })
    }

    async fn disable(&self) -> Result<(), NetworkError> {
        if !self.leases.is_empty() {
            return Err(NetworkError::InvalidState("allocator still has active leases".into()));
        }
        *self.running.lock() = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    async fn allocate(&self, hostname: &str, _mac: Option<String>) -> Result<IpAddr, NetworkError> {
        if let Some(existing) = self.leases.get(hostname) {
            return Ok(*existing);
        }
        let mut used = self.used.lock();
        let candidate = self
            .subnet
            .hosts()
            .find(|addr| !used.contains(&IpAddr::V4(*addr)))
            .ok_or_else(|| NetworkError::Unsupported("subnet exhausted".into()))?;
        let addr = IpAddr::V4(candidate);
        used.insert(addr);
        drop(used);
        self.leases.insert(hostname.to_string(), addr);
        Ok(addr)
    }

    async fn deallocate(&self, hostname: &str) -> Result<(), NetworkError> {
        if let Some((_, addr)) = self.leases.remove(hostname) {
            self.used.lock().remove(&addr);
        }
        Ok(())
    }

    async fn lookup(&self, hostname: &str) -> Result<Option<IpAddr>, NetworkError> {
        Ok(self.leases.get(hostname).map(|v| *v))
    }
}

struct Entry {
    state: NetworkState,
    plugin: Arc<dyn NetworkAllocatorPlugin>,
}

/// Standard [`NetworkService`] implementation. `busy` is an advisory
/// lock: reserving an id in it for the duration of `create`/`delete`
/// rejects concurrent operations on the same network without
/// serializing unrelated networks against each other.
pub struct NetworkService {
    networks: DashMap<String, Entry>,
    busy: DashMap<String, ()>,
    lock: crate::infrastructure::async_lock::FairAsyncLock,
    containers: Arc<dyn ContainerDirectory>,
    plugin_factory: Box<dyn Fn(&NetworkConfiguration) -> Arc<dyn NetworkAllocatorPlugin> + Send + Sync>,
}

impl NetworkService {
    pub fn new(
        containers: Arc<dyn ContainerDirectory>,
        plugin_factory: impl Fn(&NetworkConfiguration) -> Arc<dyn NetworkAllocatorPlugin> + Send + Sync + 'static,
    ) -> Self {
        Self {
            networks: DashMap::new(),
            busy: DashMap::new(),
            lock: crate::infrastructure::async_lock::FairAsyncLock::new(),
            containers,
            plugin_factory: Box::new(plugin_factory),
        }
    }

    pub async fn create(&self, config: NetworkConfiguration) -> Result<NetworkState, NetworkError> {
        if config.id == RESERVED_NONE_NETWORK {
            return Err(NetworkError::InvalidArgument("network id 'none' is reserved".into()));
        }
        if self.busy.contains_key(&config.id) {
            return Err(NetworkError::InvalidState(format!("network {} is busy", config.id)));
        }
        let id = config.id.clone();
        self.busy.insert(id.clone(), ());
        let result = self.create_locked(config).await;
        self.busy.remove(&id);
        result
    }

    async fn create_locked(&self, config: NetworkConfiguration) -> Result<NetworkState, NetworkError> {
        let _guard = self.lock.lock().await;

        if self.networks.contains_key(&config.id) {
            return Err(NetworkError::Exists(config.id));
        }

        let collected: Vec<NetworkStatus> = self
            .networks
            .iter()
            .filter_map(|e| match &e.state {
                NetworkState::Running(_, status) => Some(status.clone()),
                NetworkState::Created(_) => None,
            })
            .collect();
        let refs: Vec<&NetworkStatus> = collected.iter().collect();
        if overlaps_any_running(&config, &refs) {
            return Err(NetworkError::Exists(format!(
                "network {} subnet overlaps an existing running network",
                config.id
            )));
        }

        let plugin = (self.plugin_factory)(&config);
        let status = plugin.enable().await?;
        if !plugin.is_running() {
            return Err(NetworkError::InvalidState("allocator did not report running".into()));
        }

        let state = NetworkState::Running(config.clone(), status);
        self.networks.insert(config.id.clone(), Entry { state: state.clone(), plugin });
        tracing::info!(network_id = %config.id, "network created");
        Ok(state)
    }

    pub async fn delete(&self, id: &str) -> Result<(), NetworkError> {
        if id == DEFAULT_NETWORK {
            return Err(NetworkError::InvalidArgument("the default network cannot be deleted".into()));
        }
        if self.busy.contains_key(id) {
            return Err(NetworkError::InvalidState(format!("network {id} is busy")));
        }
        self.busy.insert(id.to_string(), ());
        let result = self.delete_locked(id).await;
        self.busy.remove(id);
        result
    }

    async fn delete_locked(&self, id: &str) -> Result<(), NetworkError> {
        let _guard = self.lock.lock().await;

        {
            let entry = self.networks.get(id).ok_or_else(|| NetworkError::NotFound(id.to_string()))?;
            if !entry.state.is_running() {
                return Err(NetworkError::InvalidState(format!("network {id} is not running")));
            }
        }

        // Still inside the process-wide lock: no attach can interleave
        // between this check and the allocator disable below.
        let attachments = self.containers.attachments_for_network(id).await;
        if !attachments.is_empty() {
            return Err(NetworkError::InvalidState(format!(
                "network {id} still has {} container attachment(s)",
                attachments.len()
            )));
        }

        let entry = self.networks.get(id).expect("checked present above");
        entry.plugin.disable().await?;
        drop(entry);

        self.networks.remove(id);
        tracing::info!(network_id = %id, "network deleted");
        Ok(())
    }

    pub async fn allocate(&self, id: &str, hostname: &str, mac: Option<String>) -> Result<IpAddr, NetworkError> {
        let entry = self.networks.get(id).ok_or_else(|| NetworkError::NotFound(id.to_string()))?;
        entry.plugin.allocate(hostname, mac).await
    }

    pub async fn deallocate(&self, id: &str, hostname: &str) -> Result<(), NetworkError> {
        let entry = self.networks.get(id).ok_or_else(|| NetworkError::NotFound(id.to_string()))?;
        entry.plugin.deallocate(hostname).await
    }

    pub async fn lookup_in(&self, id: &str, hostname: &str) -> Result<Option<IpAddr>, NetworkError> {
        let entry = self.networks.get(id).ok_or_else(|| NetworkError::NotFound(id.to_string()))?;
        entry.plugin.lookup(hostname).await
    }

    /// Scans every registered network for `hostname`.
    pub async fn lookup(&self, hostname: &str) -> Option<(String, IpAddr)> {
        for entry in self.networks.iter() {
            if let Ok(Some(addr)) = entry.plugin.lookup(hostname).await {
                return Some((entry.key().clone(), addr));
            }
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<NetworkState> {
        self.networks.get(id).map(|e| e.state.clone())
    }

    pub fn list(&self) -> Vec<NetworkState> {
        self.networks.iter().map(|e| e.state.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::network::NetworkMode;

    struct EmptyDirectory;

    #[async_trait]
    impl ContainerDirectory for EmptyDirectory {
        async fn attachments_for_network(&self, _network_id: &str) -> Vec<Attachment> {
            Vec::new()
        }
    }

    struct AttachedDirectory;

    #[async_trait]
    impl ContainerDirectory for AttachedDirectory {
        async fn attachments_for_network(&self, network_id: &str) -> Vec<Attachment> {
            let ipv4: ipnet::Ipv4Net = "10.9.0.2/24".parse().unwrap();
            vec![Attachment {
                network_id: network_id.into(),
                hostname: "c1".into(),
                ipv4,
                ipv4_gateway: "10.9.0.1".parse().unwrap(),
                ipv6: None,
                mac: None,
            }]
        }
    }

    fn config(id: &str, subnet: &str) -> NetworkConfiguration {
        let mut cfg = NetworkConfiguration::new(id, NetworkMode::Bridged, "podhost-ipam");
        cfg.ipv4_cidr = Some(subnet.parse().unwrap());
        cfg
    }

    fn service(containers: Arc<dyn ContainerDirectory>) -> NetworkService {
        NetworkService::new(containers, |cfg| {
            let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
            Arc::new(InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
        })
    }

    #[tokio::test]
    async fn create_rejects_reserved_none_id() {
        let svc = service(Arc::new(EmptyDirectory));
        let err = svc.create(config(RESERVED_NONE_NETWORK, "10.1.0.0/24")).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn create_rejects_overlapping_subnet() {
        let svc = service(Arc::new(EmptyDirectory));
        svc.create(config("net-a", "10.1.0.0/24")).await.unwrap();
        let err = svc.create(config("net-b", "10.1.0.128/25")).await.unwrap_err();
        assert!(matches!(err, NetworkError::Exists(_)));
    }

    #[tokio::test]
    async fn delete_default_network_is_rejected() {
        let svc = service(Arc::new(EmptyDirectory));
        let err = svc.delete(DEFAULT_NETWORK).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn delete_blocked_by_existing_attachment() {
        let svc = service(Arc::new(AttachedDirectory));
        svc.create(config("net-a", "10.2.0.0/24")).await.unwrap();
        let err = svc.delete("net-a").await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidState(_)));
        assert!(svc.get("net-a").is_some());
    }

    #[tokio::test]
    async fn delete_succeeds_once_unattached() {
        let svc = service(Arc::new(EmptyDirectory));
        svc.create(config("net-a", "10.3.0.0/24")).await.unwrap();
        svc.delete("net-a").await.unwrap();
        assert!(svc.get("net-a").is_none());
    }

    #[tokio::test]
    async fn allocate_then_lookup_round_trips() {
        let svc = service(Arc::new(EmptyDirectory));
        svc.create(config("net-a", "10.4.0.0/24")).await.unwrap();
        let addr = svc.allocate("net-a", "host1", None).await.unwrap();
        let found = svc.lookup_in("net-a", "host1").await.unwrap();
        assert_eq!(found, Some(addr));
        let (found_net, found_addr) = svc.lookup("host1").await.unwrap();
        assert_eq!(found_net, "net-a");
        assert_eq!(found_addr, addr);
    }
}
