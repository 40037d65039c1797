// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Node configuration manifest, loaded from TOML and covering the
//! subsystems this crate actually configures: data root, default
//! network CIDRs, DNS bind addresses, PTY history buffer size, restart
//! backoff, build cache size/TTL.

use crate::domain::pty::DEFAULT_HISTORY_CAPACITY;
use crate::infrastructure::restart_supervisor::{INITIAL_BACKOFF, MAX_BACKOFF};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level on-disk configuration for a podhost node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_root: PathBuf,
    pub network: NetworkDefaults,
    pub dns: DnsDefaults,
    pub pty: PtyDefaults,
    pub restart: RestartDefaults,
    pub build: BuildDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkDefaults {
    pub default_ipv4_cidr: String,
    pub default_ipv6_cidr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsDefaults {
    pub bind_addresses: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyDefaults {
    pub history_capacity_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartDefaults {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    pub cache_max_bytes: u64,
    pub cache_ttl_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            network: NetworkDefaults::default(),
            dns: DnsDefaults::default(),
            pty: PtyDefaults::default(),
            restart: RestartDefaults::default(),
            build: BuildDefaults::default(),
        }
    }
}

impl Default for NetworkDefaults {
    fn default() -> Self {
        Self { default_ipv4_cidr: "10.88.0.0/16".to_string(), default_ipv6_cidr: None }
    }
}

impl Default for DnsDefaults {
    fn default() -> Self {
        Self { bind_addresses: vec!["127.0.0.1:5353".parse().expect("valid literal socket addr")] }
    }
}

impl Default for PtyDefaults {
    fn default() -> Self {
        Self { history_capacity_bytes: DEFAULT_HISTORY_CAPACITY }
    }
}

impl Default for RestartDefaults {
    fn default() -> Self {
        Self { initial_backoff_ms: INITIAL_BACKOFF.as_millis() as u64, max_backoff_ms: MAX_BACKOFF.as_millis() as u64 }
    }
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self { cache_max_bytes: 10 * 1024 * 1024 * 1024, cache_ttl_secs: 14 * 24 * 60 * 60 }
    }
}

fn default_data_root() -> PathBuf {
    if let Some(root) = std::env::var_os("PODHOST_APP_ROOT") {
        return PathBuf::from(root);
    }
    dirs_home().join(".podhost")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"))
}

impl RestartDefaults {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl BuildDefaults {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl crate::error::HasErrorKind for NodeConfigError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            NodeConfigError::Read { .. } => crate::error::ErrorKind::Internal,
            NodeConfigError::Parse { .. } => crate::error::ErrorKind::InvalidArgument,
            NodeConfigError::Invalid(_) => crate::error::ErrorKind::InvalidArgument,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| NodeConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| NodeConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn to_toml_string(&self) -> Result<String, NodeConfigError> {
        toml::to_string_pretty(self).map_err(|e| NodeConfigError::Invalid(e.to_string()))
    }

    /// Discovery precedence: explicit CLI path, `PODHOST_APP_ROOT`/config.toml,
    /// `~/.podhost/config.toml`, `/etc/podhost/config.toml`, else defaults.
    pub fn discover_config() -> Option<PathBuf> {
        if let Some(root) = std::env::var_os("PODHOST_APP_ROOT") {
            let candidate = PathBuf::from(root).join("config.toml");
            if candidate.exists() {
                return Some(candidate);
            }
        }
        let home_candidate = dirs_home().join(".podhost").join("config.toml");
        if home_candidate.exists() {
            return Some(home_candidate);
        }
        let system_candidate = PathBuf::from("/etc/podhost/config.toml");
        if system_candidate.exists() {
            return Some(system_candidate);
        }
        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, NodeConfigError> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "loading configuration from explicit path");
            Self::from_toml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!(path = %path.display(), "loading configuration from discovered path");
            Self::from_toml_file(&path)?
        } else {
            tracing::warn!("no configuration file found, using built-in defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overrides recognized at the process boundary:
    /// `PODHOST_APP_ROOT` repoints the data root, `PODHOST_INSTALL_ROOT`
    /// and `PODHOST_REGISTRY_DOMAIN` are read by the CLI/install layer
    /// directly and not reflected here; `PODHOST_LEGACY_STDIO` affects
    /// I/O ownership selection, not this config.
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = std::env::var_os("PODHOST_APP_ROOT") {
            self.data_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.network
            .default_ipv4_cidr
            .parse::<ipnet::Ipv4Net>()
            .map_err(|e| NodeConfigError::Invalid(format!("network.default_ipv4_cidr: {e}")))?;
        if let Some(v6) = &self.network.default_ipv6_cidr {
            v6.parse::<ipnet::Ipv6Net>()
                .map_err(|e| NodeConfigError::Invalid(format!("network.default_ipv6_cidr: {e}")))?;
        }
        if self.dns.bind_addresses.is_empty() {
            return Err(NodeConfigError::Invalid("dns.bind_addresses must not be empty".into()));
        }
        if self.pty.history_capacity_bytes == 0 {
            return Err(NodeConfigError::Invalid("pty.history_capacity_bytes must be positive".into()));
        }
        if self.restart.initial_backoff_ms == 0 || self.restart.initial_backoff_ms > self.restart.max_backoff_ms {
            return Err(NodeConfigError::Invalid(
                "restart.initial_backoff_ms must be positive and <= max_backoff_ms".into(),
            ));
        }
        if self.build.cache_max_bytes == 0 {
            return Err(NodeConfigError::Invalid("build.cache_max_bytes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn toml_round_trips() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed: NodeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_root, config.data_root);
        assert_eq!(parsed.network.default_ipv4_cidr, config.network.default_ipv4_cidr);
    }

    #[test]
    fn invalid_cidr_fails_validation() {
        let mut config = NodeConfig::default();
        config.network.default_ipv4_cidr = "not-a-cidr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_dns_binds_fails_validation() {
        let mut config = NodeConfig::default();
        config.dns.bind_addresses.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn app_root_env_override_repoints_data_root() {
        // SAFETY: test-local env var, not read concurrently by other
        // tests in this module.
        unsafe { std::env::set_var("PODHOST_APP_ROOT", "/tmp/podhost-test-root") };
        let mut config = NodeConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.data_root, PathBuf::from("/tmp/podhost-test-root"));
        unsafe { std::env::remove_var("PODHOST_APP_ROOT") };
    }
}
