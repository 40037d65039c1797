// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Container aggregate and restart policy.

use crate::domain::network::Attachment;
use crate::error::{ErrorKind, HasErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    No,
    OnFailure,
    Always,
}

impl RestartPolicy {
    pub fn should_restart(&self, exit_code: i32, manually_stopped: bool) -> bool {
        if manually_stopped {
            return false;
        }
        match self {
            RestartPolicy::No => false,
            RestartPolicy::OnFailure => exit_code != 0,
            RestartPolicy::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedPort {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub init: Vec<String>,
    pub terminal: bool,
    pub networks: Vec<String>,
    pub published_ports: Vec<PublishedPort>,
    pub restart_policy: RestartPolicy,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub config: ContainerConfig,
    pub status: ContainerStatus,
    pub attachments: Vec<Attachment>,
    pub manually_stopped: bool,
}

impl Container {
    pub fn new(id: impl Into<String>, config: ContainerConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: ContainerStatus::Created,
            attachments: Vec::new(),
            manually_stopped: false,
        }
    }

    pub fn attaches_network(&self, network_id: &str) -> bool {
        self.attachments.iter().any(|a| a.network_id == network_id)
            || self.config.networks.iter().any(|n| n == network_id)
    }

    /// `rm` on a running container fails unless forced.
    pub fn can_remove(&self, force: bool) -> bool {
        force || !matches!(self.status, ContainerStatus::Running)
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container already exists: {0}")]
    Exists(String),
    #[error("invalid container state: {0}")]
    InvalidState(String),
    #[error("ambiguous id prefix: {0}")]
    Ambiguous(String),
}

impl HasErrorKind for ContainerError {
    fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::NotFound(_) => ErrorKind::NotFound,
            ContainerError::Exists(_) => ErrorKind::Exists,
            ContainerError::InvalidState(_) => ErrorKind::InvalidState,
            ContainerError::Ambiguous(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Resolve a (possibly partial) id against a list of known ids. An
/// exact match always wins over any prefix match; a non-unique prefix
/// with no exact match is ambiguous.
pub fn resolve_id<'a>(query: &str, known: &'a [String]) -> Result<&'a str, ContainerError> {
    if let Some(exact) = known.iter().find(|id| id.as_str() == query) {
        return Ok(exact.as_str());
    }
    let matches: Vec<&String> = known.iter().filter(|id| id.starts_with(query)).collect();
    match matches.len() {
        0 => Err(ContainerError::NotFound(query.to_string())),
        1 => Ok(matches[0].as_str()),
        _ => Err(ContainerError::Ambiguous(query.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_prefix() {
        let ids = vec!["abc123".to_string(), "abc".to_string()];
        assert_eq!(resolve_id("abc", &ids).unwrap(), "abc");
    }

    #[test]
    fn unique_prefix_resolves() {
        let ids = vec!["abc123".to_string(), "def456".to_string()];
        assert_eq!(resolve_id("abc".into(), &ids).unwrap(), "abc123");
    }

    #[test]
    fn ambiguous_prefix_errors() {
        let ids = vec!["abc123".to_string(), "abc456".to_string()];
        assert!(matches!(
            resolve_id("abc", &ids),
            Err(ContainerError::Ambiguous(_))
        ));
    }

    #[test]
    fn restart_policy_always_restarts_unless_manually_stopped() {
        assert!(RestartPolicy::Always.should_restart(0, false));
        assert!(!RestartPolicy::Always.should_restart(0, true));
    }

    #[test]
    fn restart_policy_on_failure_only_restarts_nonzero_exit() {
        assert!(!RestartPolicy::OnFailure.should_restart(0, false));
        assert!(RestartPolicy::OnFailure.should_restart(1, false));
    }
}
