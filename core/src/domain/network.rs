// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Network, network-state, and attachment aggregates.

use crate::error::{ErrorKind, HasErrorKind};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_NETWORK: &str = "default";
pub const RESERVED_NONE_NETWORK: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    Nat,
    Bridged,
    HostOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub id: String,
    pub mode: NetworkMode,
    pub ipv4_cidr: Option<Ipv4Net>,
    pub ipv6_cidr: Option<Ipv6Net>,
    pub plugin: String,
    pub labels: HashMap<String, String>,
}

impl NetworkConfiguration {
    pub fn new(id: impl Into<String>, mode: NetworkMode, plugin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode,
            ipv4_cidr: None,
            ipv6_cidr: None,
            plugin: plugin.into(),
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub ipv4_subnet: Ipv4Net,
    pub ipv4_gateway: std::net::Ipv4Addr,
    pub ipv6_subnet: Option<Ipv6Net>,
}

/// Tagged variant: a network is `Created` (config persisted, no
/// allocator) or `Running` (allocator active, status resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkState {
    Created(NetworkConfiguration),
    Running(NetworkConfiguration, NetworkStatus),
}

impl NetworkState {
    pub fn config(&self) -> &NetworkConfiguration {
        match self {
            NetworkState::Created(c) => c,
            NetworkState::Running(c, _) => c,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, NetworkState::Running(..))
    }
}

/// One network interface allocated to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub network_id: String,
    pub hostname: String,
    pub ipv4: Ipv4Net,
    pub ipv4_gateway: std::net::Ipv4Addr,
    pub ipv6: Option<Ipv6Net>,
    pub mac: Option<String>,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network not found: {0}")]
    NotFound(String),
    #[error("network already exists: {0}")]
    Exists(String),
    #[error("invalid network state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl HasErrorKind for NetworkError {
    fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::NotFound(_) => ErrorKind::NotFound,
            NetworkError::Exists(_) => ErrorKind::Exists,
            NetworkError::InvalidState(_) => ErrorKind::InvalidState,
            NetworkError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            NetworkError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Two IPv4/IPv6 CIDRs overlap when either one's network address falls
/// inside the other (handles both subset and superset cases, and equal
/// subnets, without requiring a specific direction).
pub fn ipv4_overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

pub fn ipv6_overlaps(a: &Ipv6Net, b: &Ipv6Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Checks a candidate configuration's subnets against every currently
/// running network's resolved subnet. IPv4 and IPv6 are checked
/// independently.
pub fn overlaps_any_running(candidate: &NetworkConfiguration, running: &[&NetworkStatus]) -> bool {
    if let Some(cand_v4) = candidate.ipv4_cidr {
        if running
            .iter()
            .any(|s| ipv4_overlaps(&cand_v4, &s.ipv4_subnet))
        {
            return true;
        }
    }
    if let Some(cand_v6) = candidate.ipv6_cidr {
        if running
            .iter()
            .filter_map(|s| s.ipv6_subnet.as_ref())
            .any(|v6| ipv6_overlaps(&cand_v6, v6))
        {
            return true;
        }
    }
    false
}

/// Convenience used by tests and call sites that only have `IpNet`
/// values rather than typed v4/v6 nets.
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    match (a, b) {
        (IpNet::V4(a), IpNet::V4(b)) => ipv4_overlaps(a, b),
        (IpNet::V6(a), IpNet::V6(b)) => ipv6_overlaps(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_subnets_overlap() {
        let a: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let b: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        assert!(ipv4_overlaps(&a, &b));
    }

    #[test]
    fn subset_subnet_overlaps_superset() {
        let a: Ipv4Net = "10.0.0.0/16".parse().unwrap();
        let b: Ipv4Net = "10.0.5.0/24".parse().unwrap();
        assert!(ipv4_overlaps(&a, &b));
        assert!(ipv4_overlaps(&b, &a));
    }

    #[test]
    fn disjoint_subnets_do_not_overlap() {
        let a: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let b: Ipv4Net = "10.1.0.0/24".parse().unwrap();
        assert!(!ipv4_overlaps(&a, &b));
    }
}
