// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for the podhost daemon's internal RPC surface: a thin
//! `reqwest` wrapper with one method per route, `anyhow::Result` plus
//! `.context(...)` at every call site, and non-2xx responses turned
//! into an `anyhow::bail!` carrying the response body. Response bodies
//! are the domain types themselves (`podhost_core::domain::*`) rather
//! than ad hoc wire DTOs, since this crate and the daemon share the
//! same `podhost-core` dependency.

use anyhow::{Context, Result};
use podhost_core::domain::build::{BuildNode, NodeId};
use podhost_core::domain::container::{Container, ContainerConfig};
use podhost_core::domain::network::{NetworkConfiguration, NetworkState};
use podhost_core::domain::snapshot::Digest;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Request body for `POST /api/builds`: one sequential stage of build
/// nodes run against a fresh (or continued, via `base`) execution
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStageRequest {
    pub base: Option<Digest>,
    pub nodes: Vec<BuildNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStageResponse {
    pub head: Digest,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(port: u16) -> Result<Self> {
        let client = Client::builder()
            // No global timeout: container attach/logs are long-lived streams.
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client, base_url: format!("http://localhost:{port}") })
    }

    async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body).map(|e| e.error).unwrap_or(body);
        anyhow::bail!("{action} failed ({status}): {detail}")
    }

    // --- networks --------------------------------------------------

    pub async fn create_network(&self, config: NetworkConfiguration) -> Result<NetworkState> {
        let response = self
            .client
            .post(format!("{}/api/networks", self.base_url))
            .json(&config)
            .send()
            .await
            .context("failed to create network")?;
        Self::check_status(response, "create network")
            .await?
            .json()
            .await
            .context("failed to parse network response")
    }

    pub async fn list_networks(&self) -> Result<Vec<NetworkState>> {
        let response =
            self.client.get(format!("{}/api/networks", self.base_url)).send().await.context("failed to list networks")?;
        Self::check_status(response, "list networks")
            .await?
            .json()
            .await
            .context("failed to parse networks response")
    }

    pub async fn inspect_network(&self, id: &str) -> Result<NetworkState> {
        let response = self
            .client
            .get(format!("{}/api/networks/{id}", self.base_url))
            .send()
            .await
            .context("failed to inspect network")?;
        Self::check_status(response, "inspect network")
            .await?
            .json()
            .await
            .context("failed to parse network response")
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/api/networks/{id}", self.base_url))
            .send()
            .await
            .context("failed to delete network")?;
        Self::check_status(response, "delete network").await?;
        Ok(())
    }

    // --- containers --------------------------------------------------

    pub async fn create_container(&self, config: ContainerConfig) -> Result<Container> {
        let response = self
            .client
            .post(format!("{}/api/containers", self.base_url))
            .json(&config)
            .send()
            .await
            .context("failed to create container")?;
        Self::check_status(response, "create container")
            .await?
            .json()
            .await
            .context("failed to parse container response")
    }

    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        let response = self
            .client
            .get(format!("{}/api/containers", self.base_url))
            .send()
            .await
            .context("failed to list containers")?;
        Self::check_status(response, "list containers")
            .await?
            .json()
            .await
            .context("failed to parse containers response")
    }

    pub async fn inspect_container(&self, query: &str) -> Result<Container> {
        let response = self
            .client
            .get(format!("{}/api/containers/{query}", self.base_url))
            .send()
            .await
            .context("failed to inspect container")?;
        Self::check_status(response, "inspect container")
            .await?
            .json()
            .await
            .context("failed to parse container response")
    }

    pub async fn start_container(&self, query: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/containers/{query}/start", self.base_url))
            .send()
            .await
            .context("failed to start container")?;
        Self::check_status(response, "start container").await?;
        Ok(())
    }

    pub async fn stop_container(&self, query: &str, force: bool) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/containers/{query}/stop?force={force}", self.base_url))
            .send()
            .await
            .context("failed to stop container")?;
        Self::check_status(response, "stop container").await?;
        Ok(())
    }

    pub async fn delete_container(&self, query: &str, force: bool) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/api/containers/{query}?force={force}", self.base_url))
            .send()
            .await
            .context("failed to delete container")?;
        Self::check_status(response, "delete container").await?;
        Ok(())
    }

    /// Replay-only logs: the container's retained history buffer, no
    /// live subscription.
    pub async fn container_logs(&self, query: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/api/containers/{query}/logs", self.base_url))
            .send()
            .await
            .context("failed to fetch container logs")?;
        let response = Self::check_status(response, "fetch container logs").await?;
        Ok(response.bytes().await.context("failed to read logs body")?.to_vec())
    }

    /// Attach to a container's live stdout stream, invoking `on_chunk`
    /// for every byte chunk received (history replay first, then live
    /// output) until the daemon closes the connection.
    pub async fn attach_container(
        &self,
        query: &str,
        no_history: bool,
        mut on_chunk: impl FnMut(&[u8]),
    ) -> Result<()> {
        use futures::StreamExt;

        let response = self
            .client
            .get(format!("{}/api/containers/{query}/attach?no_history={no_history}", self.base_url))
            .send()
            .await
            .context("failed to attach to container")?;
        let response = Self::check_status(response, "attach to container").await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("failed to read attach stream chunk")?;
            on_chunk(&chunk);
        }
        Ok(())
    }

    // --- build ---------------------------------------------------------

    pub async fn run_build_stage(&self, request: BuildStageRequest) -> Result<BuildStageResponse> {
        let response = self
            .client
            .post(format!("{}/api/builds", self.base_url))
            .json(&request)
            .send()
            .await
            .context("failed to submit build stage")?;
        Self::check_status(response, "run build stage")
            .await?
            .json()
            .await
            .context("failed to parse build stage response")
    }

    // --- daemon lifecycle ------------------------------------------------

    pub async fn health(&self) -> Result<bool> {
        let response = self.client.get(format!("{}/health", self.base_url)).send().await;
        Ok(matches!(response, Ok(r) if r.status() == StatusCode::OK))
    }
}

/// Convenience for CLI code building a stage from one ordered list of
/// node ids resolved against a build plan; kept here (rather than in
/// `podhost-core`) since it's purely a request-shaping helper for this
/// SDK's callers.
pub fn stage_for(base: Option<Digest>, nodes: Vec<BuildNode>) -> BuildStageRequest {
    BuildStageRequest { base, nodes }
}

pub fn node_ids(nodes: &[BuildNode]) -> Vec<NodeId> {
    nodes.iter().map(|n| n.id.clone()).collect()
}
